//! One-shot fault injection for the in-memory backends.
//!
//! The in-memory [database] and [session store] can be told to fail the next call of a specific
//! operation. This is how the rollback and error paths of the login flow and the session
//! middleware get exercised without a real database.
//!
//! [database]: crate::database::memory
//! [session store]: crate::sessions::memory

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Error, Result};

/// A set of armed faults.
///
/// Cloning a [`Faults`] yields a handle to the same set.
pub(crate) struct Faults<P> {
	/// Operations that will fail the next time they are invoked.
	armed: Arc<Mutex<HashSet<P>>>,
}

impl<P> Faults<P>
where
	P: fmt::Debug + Eq + Hash,
{
	/// Creates an empty set of faults.
	pub(crate) fn new() -> Self {
		Self {
			armed: Arc::default(),
		}
	}

	/// Makes the next invocation of `point` fail.
	pub(crate) fn arm(&self, point: P) {
		self.armed.lock().insert(point);
	}

	/// Whether `point` was armed, disarming it in the process.
	pub(crate) fn take(&self, point: &P) -> bool {
		let armed = self.armed.lock().remove(point);

		if armed {
			tracing::debug!(?point, "triggering injected fault");
		}

		armed
	}

	/// Returns an error if `point` was armed, disarming it in the process.
	#[track_caller]
	pub(crate) fn check(&self, point: P) -> Result<()> {
		if self.take(&point) {
			return Err(Error::backend(format_args!("injected failure ({point:?})")));
		}

		Ok(())
	}
}

impl<P> Clone for Faults<P> {
	fn clone(&self) -> Self {
		Self {
			armed: Arc::clone(&self.armed),
		}
	}
}

impl<P> fmt::Debug for Faults<P>
where
	P: fmt::Debug,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.armed.lock().iter()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;

	#[derive(Debug, PartialEq, Eq, Hash)]
	enum Point {
		Read,
		Write,
	}

	#[test]
	fn faults_fire_once() -> anyhow::Result<()> {
		let faults = Faults::new();

		faults.arm(Point::Write);

		testing::assert!(faults.check(Point::Read).is_ok());
		testing::assert!(faults.check(Point::Write).is_err());
		testing::assert!(faults.check(Point::Write).is_ok());

		Ok(())
	}
}
