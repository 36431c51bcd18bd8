//! Session IDs.

use std::str::FromStr;

use derive_more::{Debug, Display, From, Into};
use sqlx::database::{HasArguments, HasValueRef};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::MySql;
use uuid::fmt::Hyphenated;
use uuid::Uuid;

/// A session ID.
///
/// This is a randomly generated UUID, and the value of the session cookie.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
#[debug("*****")]
#[display("{_0}")]
pub struct SessionID(Uuid);

impl SessionID {
	/// Generates a new random session ID.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl FromStr for SessionID {
	type Err = uuid::Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		value.parse::<Uuid>().map(Self)
	}
}

impl sqlx::Type<MySql> for SessionID {
	fn type_info() -> <MySql as sqlx::Database>::TypeInfo {
		<Hyphenated as sqlx::Type<MySql>>::type_info()
	}
}

impl<'q> sqlx::Encode<'q, MySql> for SessionID {
	fn encode_by_ref(&self, buf: &mut <MySql as HasArguments<'q>>::ArgumentBuffer) -> IsNull {
		<Hyphenated as sqlx::Encode<'q, MySql>>::encode_by_ref(self.0.as_hyphenated(), buf)
	}
}

impl<'r> sqlx::Decode<'r, MySql> for SessionID {
	fn decode(value: <MySql as HasValueRef<'r>>::ValueRef) -> Result<Self, BoxDynError> {
		<Hyphenated as sqlx::Decode<'r, MySql>>::decode(value)
			.map(Uuid::from)
			.map(Self)
	}
}
