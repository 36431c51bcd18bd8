//! Helper macro to make "ID" types.
//!
//! Defining concrete types for different kinds of IDs makes it harder to accidentally mix them up,
//! e.g. passing a group's ID where a permission's ID is expected.

/// A helper macro for defining an "ID" type.
///
/// All database tables with an integer `id` column get their own types defined by this macro.
///
/// # Example
///
/// ```rust,ignore
/// // This will expand to a unit struct called `GroupID` that wraps a `u64` and implements various
/// // traits so it can be treated like a `u64`, but still expresses a semantic difference.
/// make_id!(GroupID);
/// ```
macro_rules! make_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[repr(transparent)]
		#[derive(
			Debug,
			Clone,
			Copy,
			PartialEq,
			Eq,
			PartialOrd,
			Ord,
			Hash,
			::derive_more::Display,
			::derive_more::Into,
			::derive_more::From,
			::serde::Serialize,
			::serde::Deserialize,
			::sqlx::Type,
		)]
		#[serde(transparent)]
		#[sqlx(transparent)]
		#[display("{_0}")]
		pub struct $name(pub u64);

		impl ::std::ops::Deref for $name {
			type Target = u64;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
	};
}

pub(crate) use make_id;
