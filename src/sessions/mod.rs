//! Server-side sessions.
//!
//! A [`Session`] is identified by a random [`SessionID`], which is sent to the client in the
//! [`COOKIE_NAME`] cookie. The session itself lives in a [`SessionStore`] and carries the
//! [external ID] of the user who logged in, if any.
//!
//! # Life Cycle
//!
//!    1. [`SessionManager::get()`] reads the cookie from the request headers and loads the session
//!       from the store. A missing, malformed, unknown or expired cookie yields a fresh, empty
//!       session.
//!    2. The caller mutates the session, e.g. by [setting] or [removing] the user ID.
//!    3. [`SessionManager::save()`] extends the session, persists it and returns a
//!       [`SessionCookie`], which has to be included in the response. Alternatively,
//!       [`SessionManager::delete()`] ends the session and returns a cookie removing it from
//!       the client.
//!
//! [external ID]: crate::authorization::ExternalID
//! [setting]: Session::set_user_id()
//! [removing]: Session::remove_user_id()

use std::future::Future;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::Cookie;
use time::OffsetDateTime;

use crate::authorization::ExternalID;
use crate::{Error, Result};

mod id;
pub use id::SessionID;

pub mod memory;
pub mod mysql;

/// The HTTP cookie name that stores the user's [session ID].
///
/// [session ID]: SessionID
pub const COOKIE_NAME: &str = "authorization";

/// How long a session stays valid after it was last saved.
pub const EXPIRES_AFTER: time::Duration = time::Duration::WEEK;

/// A user session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
	/// The session's ID.
	id: SessionID,

	/// The external ID of the logged-in user.
	user_id: Option<ExternalID>,

	/// When this session expires.
	expires_on: OffsetDateTime,

	/// Whether this session has never been saved.
	is_new: bool,
}

impl Session {
	/// Creates a new, empty session with a random ID.
	pub fn new() -> Self {
		Self {
			id: SessionID::new(),
			user_id: None,
			expires_on: Self::next_expiration(),
			is_new: true,
		}
	}

	/// Reassembles a session that was loaded from a [`SessionStore`].
	pub fn from_parts(
		id: SessionID,
		user_id: Option<ExternalID>,
		expires_on: OffsetDateTime,
	) -> Self {
		Self {
			id,
			user_id,
			expires_on,
			is_new: false,
		}
	}

	/// Returns this session's ID.
	pub const fn id(&self) -> SessionID {
		self.id
	}

	/// Returns the external ID of the logged-in user.
	pub const fn user_id(&self) -> Option<&ExternalID> {
		self.user_id.as_ref()
	}

	/// Associates this session with a user.
	pub fn set_user_id(&mut self, user_id: ExternalID) {
		self.user_id = Some(user_id);
	}

	/// Removes the association with a user, returning the previous value.
	pub fn remove_user_id(&mut self) -> Option<ExternalID> {
		self.user_id.take()
	}

	/// Returns when this session expires.
	pub const fn expires_on(&self) -> OffsetDateTime {
		self.expires_on
	}

	/// Whether this session has expired.
	pub fn is_expired(&self) -> bool {
		self.expires_on <= OffsetDateTime::now_utc()
	}

	/// Whether this session has never been saved.
	pub const fn is_new(&self) -> bool {
		self.is_new
	}

	/// Generates a new expiration date.
	fn next_expiration() -> OffsetDateTime {
		OffsetDateTime::now_utc() + EXPIRES_AFTER
	}
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}

/// Persistent storage for [`Session`]s.
pub trait SessionStore: Send + Sync + 'static {
	/// Loads the session with the given `id`.
	///
	/// Expired sessions are treated as if they did not exist.
	fn load(&self, id: SessionID) -> impl Future<Output = Result<Option<Session>>> + Send;

	/// Inserts or replaces a session.
	///
	/// Sessions handed to the store are never [new](Session::is_new()).
	fn save(&self, session: &Session) -> impl Future<Output = Result<()>> + Send;

	/// Deletes the session with the given `id`.
	fn delete(&self, id: SessionID) -> impl Future<Output = Result<()>> + Send;
}

/// Reads sessions from requests and writes them back into responses.
#[derive(Debug)]
pub struct SessionManager<S> {
	/// The session store.
	store: Arc<S>,

	/// The `Domain` field for session cookies.
	cookie_domain: Arc<str>,
}

impl<S> Clone for SessionManager<S> {
	fn clone(&self) -> Self {
		Self {
			store: Arc::clone(&self.store),
			cookie_domain: Arc::clone(&self.cookie_domain),
		}
	}
}

impl<S> SessionManager<S>
where
	S: SessionStore,
{
	/// Creates a new [`SessionManager`].
	pub fn new<D>(store: S, cookie_domain: D) -> Self
	where
		D: Into<String>,
	{
		Self {
			store: Arc::new(store),
			cookie_domain: Arc::from(cookie_domain.into()),
		}
	}

	/// Returns the underlying session store.
	pub fn store(&self) -> &S {
		&self.store
	}

	/// Fetches the session belonging to a request.
	///
	/// Only failures of the session store are reported as errors.
	#[tracing::instrument(
		level = "debug",
		target = "warden::sessions",
		skip_all,
		fields(session.id = tracing::field::Empty),
		err(level = "debug"),
	)]
	pub async fn get(&self, headers: &HeaderMap) -> Result<Session> {
		let Some(session_id) = session_id_from_headers(headers) else {
			tracing::debug!("no session cookie; starting new session");
			return Ok(Session::new());
		};

		tracing::Span::current().record("session.id", format_args!("{session_id}"));

		match self.store.load(session_id).await? {
			Some(session) if !session.is_expired() => Ok(session),
			Some(_) | None => {
				tracing::debug!("session is unknown or expired; starting new session");
				Ok(Session::new())
			}
		}
	}

	/// Extends and persists a session.
	///
	/// The returned cookie has to be included in the response.
	#[tracing::instrument(
		level = "debug",
		target = "warden::sessions",
		skip_all,
		fields(session.id = %session.id),
		err(level = "debug"),
	)]
	pub async fn save(&self, session: &mut Session) -> Result<SessionCookie> {
		let was_new = std::mem::replace(&mut session.is_new, false);

		session.expires_on = Session::next_expiration();

		if let Err(error) = self.store.save(session).await {
			session.is_new = was_new;
			return Err(error);
		}

		tracing::debug!(until = %session.expires_on, "saved session");

		Ok(SessionCookie(self.cookie(session)))
	}

	/// Ends a session.
	///
	/// Sessions that have been persisted before are deleted from the store. The returned cookie
	/// instructs the client to drop its session cookie, and has to be included in the response.
	#[tracing::instrument(
		level = "debug",
		target = "warden::sessions",
		skip_all,
		fields(session.id = %session.id),
		err(level = "debug"),
	)]
	pub async fn delete(&self, session: Session) -> Result<SessionCookie> {
		if !session.is_new {
			self.store.delete(session.id).await?;
			tracing::debug!("deleted session");
		}

		let mut cookie = self.cookie(&session);

		cookie.make_removal();

		Ok(SessionCookie(cookie))
	}

	/// Builds the cookie identifying `session`.
	fn cookie(&self, session: &Session) -> Cookie<'static> {
		Cookie::build((COOKIE_NAME, session.id.to_string()))
			.domain(String::from(&*self.cookie_domain))
			.path("/")
			.secure(cfg!(feature = "production"))
			.http_only(true)
			.expires(session.expires_on)
			.build()
	}
}

/// Whether the `Cookie` headers of a request carry a well-formed session ID.
pub(crate) fn has_session_cookie(headers: &HeaderMap) -> bool {
	session_id_from_headers(headers).is_some()
}

/// Extracts the session ID from the `Cookie` headers of a request.
fn session_id_from_headers(headers: &HeaderMap) -> Option<SessionID> {
	headers
		.get_all(header::COOKIE)
		.into_iter()
		.flat_map(|value| value.to_str())
		.flat_map(|value| Cookie::split_parse_encoded(value.trim().to_owned()))
		.flatten()
		.filter(|cookie| cookie.name() == COOKIE_NAME)
		.find_map(|cookie| {
			cookie
				.value()
				.parse::<SessionID>()
				.inspect_err(|error| {
					tracing::debug! {
						cookie.value = %cookie.value(),
						%error,
						"found session cookie but failed to parse value",
					}
				})
				.ok()
		})
}

/// A session cookie that will be sent back to the client.
#[derive(Debug, Clone)]
pub struct SessionCookie(Cookie<'static>);

impl SessionCookie {
	/// Returns the underlying cookie.
	pub fn cookie(&self) -> &Cookie<'static> {
		&self.0
	}

	/// Encodes the cookie as a `Set-Cookie` header value.
	pub fn header_value(&self) -> Result<HeaderValue> {
		self.0
			.encoded()
			.to_string()
			.parse::<HeaderValue>()
			.map_err(|error| Error::logic("session cookie is not a valid header value").context(error))
	}
}

impl IntoResponseParts for SessionCookie {
	type Error = Error;

	fn into_response_parts(self, mut response: ResponseParts) -> Result<ResponseParts> {
		let cookie = self.header_value()?;

		tracing::debug!(target: "warden::sessions", "inserting session cookie into response headers");

		response.headers_mut().append(header::SET_COOKIE, cookie);

		Ok(response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sessions::memory::{MemorySessionStore, SessionFailPoint};
	use crate::testing;

	fn manager() -> (SessionManager<MemorySessionStore>, MemorySessionStore) {
		let store = MemorySessionStore::new();

		(SessionManager::new(store.clone(), "localhost"), store)
	}

	fn headers_with(cookie: &str) -> anyhow::Result<HeaderMap> {
		let mut headers = HeaderMap::new();

		headers.insert(header::COOKIE, cookie.parse()?);

		Ok(headers)
	}

	#[tokio::test]
	async fn missing_cookie_yields_new_session() -> anyhow::Result<()> {
		let (manager, _) = manager();
		let session = manager.get(&HeaderMap::new()).await?;

		testing::assert!(session.is_new());
		testing::assert!(session.user_id().is_none());

		Ok(())
	}

	#[tokio::test]
	async fn saved_session_is_found_again() -> anyhow::Result<()> {
		let (manager, store) = manager();
		let mut session = manager.get(&HeaderMap::new()).await?;

		session.set_user_id(ExternalID::new("ext-1"));

		let cookie = manager.save(&mut session).await?;

		testing::assert_eq!(cookie.cookie().name(), COOKIE_NAME);
		testing::assert_eq!(cookie.cookie().value(), session.id().to_string());
		testing::assert_eq!(cookie.cookie().http_only(), Some(true));
		testing::assert_eq!(store.len(), 1);

		let headers = headers_with(&format!("theme=dark; {COOKIE_NAME}={}", session.id()))?;
		let found = manager.get(&headers).await?;

		testing::assert!(!found.is_new());
		testing::assert_eq!(found.id(), session.id());
		testing::assert_eq!(found.user_id(), Some(&ExternalID::new("ext-1")));

		Ok(())
	}

	#[tokio::test]
	async fn garbage_and_unknown_cookies_yield_new_sessions() -> anyhow::Result<()> {
		let (manager, _) = manager();

		let session = manager
			.get(&headers_with(&format!("{COOKIE_NAME}=garbage"))?)
			.await?;

		testing::assert!(session.is_new());

		let unknown = SessionID::new();
		let session = manager
			.get(&headers_with(&format!("{COOKIE_NAME}={unknown}"))?)
			.await?;

		testing::assert!(session.is_new());
		testing::assert_ne!(session.id(), unknown);

		Ok(())
	}

	#[tokio::test]
	async fn store_failures_are_errors() -> anyhow::Result<()> {
		let (manager, store) = manager();
		let headers = headers_with(&format!("{COOKIE_NAME}={}", SessionID::new()))?;

		store.fail_next(SessionFailPoint::Load);

		testing::assert!(manager.get(&headers).await.is_err());

		let mut session = Session::new();

		store.fail_next(SessionFailPoint::Save);

		testing::assert!(manager.save(&mut session).await.is_err());
		testing::assert!(session.is_new());
		testing::assert!(store.is_empty());

		Ok(())
	}

	#[tokio::test]
	async fn stored_sessions_are_not_new() -> anyhow::Result<()> {
		let (manager, store) = manager();
		let mut session = Session::new();

		manager.save(&mut session).await?;

		testing::assert!(!session.is_new());
		testing::assert!(store.get(session.id()).is_some_and(|stored| !stored.is_new()));

		Ok(())
	}

	#[tokio::test]
	async fn deleted_session_is_gone() -> anyhow::Result<()> {
		let (manager, store) = manager();
		let mut session = Session::new();

		session.set_user_id(ExternalID::new("ext-1"));
		manager.save(&mut session).await?;

		let headers = headers_with(&format!("{COOKIE_NAME}={}", session.id()))?;
		let cookie = manager.delete(session.clone()).await?;

		testing::assert_eq!(cookie.cookie().name(), COOKIE_NAME);
		testing::assert_eq!(cookie.cookie().value(), "");
		testing::assert!(store.is_empty());
		testing::assert_ne!(manager.get(&headers).await?.id(), session.id());

		Ok(())
	}

	#[tokio::test]
	async fn deleting_new_session_does_not_touch_the_store() -> anyhow::Result<()> {
		let (manager, store) = manager();

		store.fail_next(SessionFailPoint::Delete);

		let cookie = manager.delete(Session::new()).await?;

		testing::assert_eq!(cookie.cookie().value(), "");

		// the armed fault is still pending
		testing::assert!(manager.delete(Session::from_parts(
			SessionID::new(),
			None,
			OffsetDateTime::now_utc() + EXPIRES_AFTER,
		))
		.await
		.is_err());

		Ok(())
	}
}
