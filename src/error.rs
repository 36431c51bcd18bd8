//! Runtime errors.
//!
//! This module exposes the [`Error`] type that is used across the code base for bubbling up
//! errors. Any foreign errors that can occur at runtime can be turned into an [`Error`]. Specific
//! error cases have dedicated constructors, see all the methods on [`Error`].
//!
//! Errors carry a stack of [attachments][context] describing which operation failed, e.g.
//! "could not save user". Callers that need to branch on the kind of failure should use
//! [`Error::kind()`].
//!
//! [`Error`] implements [`IntoResponse`], which means it can be returned from HTTP handlers,
//! middleware, etc.
//!
//! [`Error`]: struct@Error
//! [context]: Error::context()

use std::fmt::{self, Display, Formatter};
use std::panic::Location;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use itertools::Itertools;
use serde_json::json;
use thiserror::Error;

/// Type alias for a [`Result<T, E>`] with its `E` parameter set to [`Error`].
///
/// [`Result`]: std::result::Result
/// [`Error`]: struct@Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The crate's core error type.
///
/// It carries information about the kind of error that occurred, where it occurred, and any extra
/// information like error sources or descriptions of the operation that failed.
#[derive(Debug, Error)]
pub struct Error {
	/// The kind of error that occurred.
	///
	/// This is used for determining the HTTP status code and error message for the response
	/// body, when an error is returned from a request.
	kind: ErrorKind,

	/// The source code location of where the error occurred.
	location: Location<'static>,

	/// Extra information about the error, like source errors or context messages.
	attachments: Vec<Attachment>,
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let Self {
			kind,
			location,
			attachments,
		} = self;

		write!(f, "[{location}] {kind}")?;

		if !attachments.is_empty() {
			write!(f, ":")?;

			for attachment in attachments.iter().rev() {
				write!(f, "\n  - {attachment}")?;
			}
		}

		Ok(())
	}
}

/// The different kinds of errors that can occur at runtime.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ErrorKind {
	/// The request requires a logged-in user, but there is none.
	#[error("you are not logged in")]
	Unauthorized,

	/// The logged-in user lacks a permission.
	#[error("you are not permitted to perform this action")]
	InsufficientPermissions {
		/// The permission code that was required.
		code: String,
	},

	/// A login was attempted for a deactivated account.
	///
	/// The message of this error is meant to be shown to the user as-is.
	#[error("User {name} is not active, please contact administrator.")]
	InactiveUser {
		/// The account's display name.
		name: String,
	},

	/// A unique constraint was violated.
	#[error("{what} already exists")]
	AlreadyExists {
		/// What kind of record already exists.
		what: &'static str,
	},

	/// An internal invariant did not hold.
	#[error("logic assertion failed: {0}")]
	Logic(String),

	/// The SQL database returned an error.
	#[cfg_attr(test, error("database error: {0}"))]
	#[cfg_attr(not(test), error("database error"))]
	Database(#[from] sqlx::Error),

	/// A non-SQL persistence backend failed.
	#[error("storage backend failure: {0}")]
	Backend(String),
}

#[allow(clippy::missing_docs_in_private_items)]
type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Generic error attachments.
#[derive(Debug, derive_more::Display)]
#[display("'{context}' at {location}")]
struct Attachment {
	/// The attachment context.
	///
	/// This could be a more concrete error type, or simply an error message.
	context: BoxedError,

	/// The source code location of where this attachment was created.
	location: Location<'static>,
}

impl Attachment {
	/// Creates a new [`Attachment`].
	#[track_caller]
	fn new<C>(context: C) -> Self
	where
		C: Into<BoxedError>,
	{
		Self {
			context: context.into(),
			location: *Location::caller(),
		}
	}
}

impl Error {
	/// Creates a new [`Error`] of the given [`ErrorKind`].
	///
	/// [`Error`]: struct@Error
	#[track_caller]
	fn new<E>(kind: E) -> Self
	where
		E: Into<ErrorKind>,
	{
		Self {
			kind: kind.into(),
			location: *Location::caller(),
			attachments: Vec::new(),
		}
	}

	/// Returns the kind of error that occurred.
	pub const fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Whether this error was caused by a login of a deactivated account.
	pub const fn is_inactive_user(&self) -> bool {
		matches!(self.kind, ErrorKind::InactiveUser { .. })
	}

	/// Whether this error was caused by a unique constraint violation.
	pub const fn is_already_exists(&self) -> bool {
		matches!(self.kind, ErrorKind::AlreadyExists { .. })
	}

	/// Returns the context messages attached to this error, most recent first.
	pub fn contexts(&self) -> impl Iterator<Item = String> + '_ {
		self.attachments
			.iter()
			.rev()
			.map(|attachment| attachment.context.to_string())
	}

	/// Attach additional context to an error.
	///
	/// This can be another, more concrete, error type, or simply an error message.
	/// If `ctx` is also an [`Error`], it will have its attachments transferred to `self`.
	///
	/// [`Error`]: struct@Error
	#[track_caller]
	pub(crate) fn context<E>(mut self, ctx: E) -> Self
	where
		E: Into<BoxedError>,
	{
		match Into::<BoxedError>::into(ctx).downcast::<Self>() {
			Ok(mut err) => {
				self.attachments.append(&mut err.attachments);
				self.attachments.push(Attachment::new(err.kind));
			}
			Err(other) => {
				self.attachments.push(Attachment::new(other));
			}
		}

		self
	}

	/// An error signaling a missing login.
	///
	/// Produces a `401 Unauthorized` status.
	#[track_caller]
	pub(crate) fn unauthorized() -> Self {
		Self::new(ErrorKind::Unauthorized)
	}

	/// An error signaling an authorization failure caused by a missing permission.
	///
	/// Produces a `403 Forbidden` status.
	#[track_caller]
	pub(crate) fn insufficient_permissions<C>(code: C) -> Self
	where
		C: Into<String>,
	{
		Self::new(ErrorKind::InsufficientPermissions { code: code.into() })
	}

	/// An error signaling that a deactivated account tried to log in.
	///
	/// Produces a `403 Forbidden` status.
	#[track_caller]
	pub(crate) fn inactive_user<N>(name: N) -> Self
	where
		N: Into<String>,
	{
		Self::new(ErrorKind::InactiveUser { name: name.into() })
	}

	/// An error signaling that a record already exists.
	///
	/// Produces a `409 Conflict` status.
	#[track_caller]
	pub(crate) fn already_exists(what: &'static str) -> Self {
		Self::new(ErrorKind::AlreadyExists { what })
	}

	/// A generic `500 Internal Server Error`.
	///
	/// This constructor is reserved for errors that _should not_ occur, but _may_ occur. If
	/// such an error is ever returned, that's a bug.
	#[track_caller]
	pub(crate) fn logic<T>(message: T) -> Self
	where
		T: Display,
	{
		Self::new(ErrorKind::Logic(message.to_string()))
	}

	/// A failure in a storage backend that is not SQL based.
	///
	/// Produces a `500 Internal Server Error` status.
	#[track_caller]
	pub(crate) fn backend<T>(message: T) -> Self
	where
		T: Display,
	{
		Self::new(ErrorKind::Backend(message.to_string()))
	}

	/// The HTTP status code this error maps to.
	fn status(&self) -> StatusCode {
		use ErrorKind as E;

		match self.kind {
			E::Unauthorized => StatusCode::UNAUTHORIZED,
			E::InsufficientPermissions { .. } | E::InactiveUser { .. } => StatusCode::FORBIDDEN,
			E::AlreadyExists { .. } => StatusCode::CONFLICT,
			E::Logic(_) | E::Database(_) | E::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for Error {
	#[track_caller]
	fn into_response(self) -> Response {
		let message = self.kind.to_string();
		let status = self.status();

		if status == StatusCode::INTERNAL_SERVER_ERROR {
			tracing::error!(target: "warden::audit_log", error = %self, "internal server error occurred");
		} else {
			tracing::debug! {
				location = %self.location,
				kind = ?self.kind,
				attachments = ?self.attachments,
				error_message = %message,
				"returning error from request handler"
			};
		}

		let mut json = json!({ "message": message });

		if cfg!(not(feature = "production")) && !self.attachments.is_empty() {
			json["debug_info"] = self
				.attachments
				.iter()
				.rev()
				.map(|attachment| format!("{attachment}"))
				.collect_vec()
				.into();
		}

		(status, Json(json)).into_response()
	}
}

impl From<sqlx::Error> for Error {
	#[track_caller]
	fn from(error: sqlx::Error) -> Self {
		Self::new(error)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;

	#[test]
	fn context_is_listed_most_recent_first() -> anyhow::Result<()> {
		let error = Error::backend("disk on fire")
			.context("could not save user")
			.context("login failed");

		let contexts = error.contexts().collect_vec();

		testing::assert_eq!(contexts, ["login failed", "could not save user"]);
		testing::assert!(error.to_string().contains("storage backend failure: disk on fire"));

		Ok(())
	}

	#[test]
	fn nested_errors_keep_their_attachments() -> anyhow::Result<()> {
		let inner = Error::backend("connection reset").context("could not load user");
		let outer = Error::logic("unexpected state").context(inner);
		let contexts = outer.contexts().collect_vec();

		testing::assert_eq!(contexts.len(), 2);
		testing::assert!(contexts[0].contains("connection reset"));
		testing::assert_eq!(contexts[1], "could not load user");

		Ok(())
	}

	#[test]
	fn inactive_user_message_is_user_facing() -> anyhow::Result<()> {
		let error = Error::inactive_user("Ann");

		testing::assert!(error.is_inactive_user());
		testing::assert_eq!(
			error.kind().to_string(),
			"User Ann is not active, please contact administrator."
		);
		testing::assert_eq!(error.into_response().status(), StatusCode::FORBIDDEN);

		Ok(())
	}

	#[test]
	fn statuses() -> anyhow::Result<()> {
		testing::assert_eq!(Error::unauthorized().status(), StatusCode::UNAUTHORIZED);
		testing::assert_eq!(
			Error::insufficient_permissions("bans").status(),
			StatusCode::FORBIDDEN
		);
		testing::assert_eq!(Error::already_exists("group").status(), StatusCode::CONFLICT);
		testing::assert_eq!(
			Error::backend("boom").status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);

		Ok(())
	}
}
