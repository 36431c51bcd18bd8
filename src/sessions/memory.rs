//! An in-process [`SessionStore`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Session, SessionID, SessionStore};
use crate::faults::Faults;
use crate::Result;

/// Operations of [`MemorySessionStore`] that can be made to fail.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFailPoint {
	Load,
	Save,
	Delete,
}

/// An in-process [`SessionStore`].
///
/// Cloning yields a handle to the same sessions.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
	/// The stored sessions.
	sessions: Arc<Mutex<HashMap<SessionID, Session>>>,

	/// Armed failure points.
	faults: Faults<SessionFailPoint>,
}

impl MemorySessionStore {
	/// Creates a new, empty [`MemorySessionStore`].
	pub fn new() -> Self {
		Self {
			sessions: Arc::default(),
			faults: Faults::new(),
		}
	}

	/// Makes the next invocation of `point` fail with a backend error.
	pub fn fail_next(&self, point: SessionFailPoint) {
		self.faults.arm(point);
	}

	/// Returns the amount of stored sessions.
	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	/// Whether there are no stored sessions.
	pub fn is_empty(&self) -> bool {
		self.sessions.lock().is_empty()
	}

	/// Returns a copy of the session with the given `id`, regardless of its expiration date.
	pub fn get(&self, id: SessionID) -> Option<Session> {
		self.sessions.lock().get(&id).cloned()
	}
}

impl Default for MemorySessionStore {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionStore for MemorySessionStore {
	async fn load(&self, id: SessionID) -> Result<Option<Session>> {
		self.faults.check(SessionFailPoint::Load)?;

		let mut sessions = self.sessions.lock();

		if sessions.get(&id).is_some_and(Session::is_expired) {
			sessions.remove(&id);
			return Ok(None);
		}

		Ok(sessions.get(&id).map(|session| {
			Session::from_parts(session.id(), session.user_id().cloned(), session.expires_on())
		}))
	}

	async fn save(&self, session: &Session) -> Result<()> {
		self.faults.check(SessionFailPoint::Save)?;
		self.sessions.lock().insert(session.id(), session.clone());

		Ok(())
	}

	async fn delete(&self, id: SessionID) -> Result<()> {
		self.faults.check(SessionFailPoint::Delete)?;
		self.sessions.lock().remove(&id);

		Ok(())
	}
}
