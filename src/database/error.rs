//! Utilities for dealing with database errors.

use crate::Error;

/// Extension trait for dealing with SQL errors.
pub trait SqlErrorExt {
	/// Checks if this is a "duplicate entry" error.
	fn is_duplicate_entry(&self) -> bool;

	/// Turns a "duplicate entry" error into an ["already exists"] error for `what`, and any other
	/// error into a database error.
	///
	/// ["already exists"]: crate::ErrorKind::AlreadyExists
	#[track_caller]
	fn or_already_exists(self, what: &'static str) -> Error;
}

impl SqlErrorExt for sqlx::Error {
	fn is_duplicate_entry(&self) -> bool {
		self.as_database_error()
			.is_some_and(|err| matches!(err.code().as_deref(), Some("23000")))
	}

	#[track_caller]
	fn or_already_exists(self, what: &'static str) -> Error {
		if self.is_duplicate_entry() {
			Error::already_exists(what).context(self)
		} else {
			Error::from(self)
		}
	}
}
