//! Users, groups, permissions and the external identities users log in with.

use derive_more::{Debug, Display};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::make_id::make_id;
use crate::{Error, Result};

make_id! {
	/// The primary key of a [`User`].
	UserID
}

make_id! {
	/// The primary key of a [`Group`].
	GroupID
}

make_id! {
	/// The primary key of a [`Permission`].
	PermissionID
}

/// The subject identifier an identity provider issued for a user.
///
/// This is distinct from [`UserID`]; every external ID maps to exactly one user, and that mapping
/// never changes once it has been created.
#[derive(
	Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[debug("{_0:?}")]
#[display("{_0}")]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ExternalID(String);

impl ExternalID {
	/// Creates a new [`ExternalID`].
	pub fn new<S>(id: S) -> Self
	where
		S: Into<String>,
	{
		Self(id.into())
	}

	/// Returns the raw identifier.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ExternalID {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for ExternalID {
	fn from(id: String) -> Self {
		Self(id)
	}
}

/// A permission that can be granted to users and groups.
///
/// Feature modules gate their actions on the [`code`](Permission::code); the
/// [`name`](Permission::name) is only for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
	/// The permission's ID.
	pub id: PermissionID,

	/// The stable, unique identifier of this permission.
	pub code: String,

	/// A human-readable name.
	pub name: String,
}

/// A named set of permissions that users can be members of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
	/// The group's ID.
	pub id: GroupID,

	/// The group's unique name.
	pub name: String,

	/// The permissions granted to every member of the group.
	pub permissions: Vec<Permission>,
}

impl Group {
	/// Checks whether this group has been granted the permission with the given `code`.
	pub fn has_permission(&self, code: &str) -> bool {
		self.permissions
			.iter()
			.any(|permission| permission.code == code)
	}
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
	/// The user's ID.
	pub id: UserID,

	/// The user's display name.
	pub name: String,

	/// The user's email address.
	pub email: String,

	/// URL of the user's avatar image.
	pub avatar_url: String,

	/// Whether the user may log in.
	pub active: bool,

	/// When the user last logged in.
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_login: Option<OffsetDateTime>,

	/// Permissions granted to this user directly.
	pub permissions: Vec<Permission>,

	/// Groups this user is a member of.
	pub groups: Vec<Group>,
}

impl User {
	/// Returns the codes of every permission this user holds, either directly or through one of
	/// their groups.
	///
	/// The codes are sorted and free of duplicates.
	pub fn permissions(&self) -> impl Iterator<Item = &str> + '_ {
		self.permissions
			.iter()
			.chain(self.groups.iter().flat_map(|group| &group.permissions))
			.map(|permission| permission.code.as_str())
			.sorted_unstable()
			.dedup()
	}

	/// Checks whether this user holds the permission with the given `code`.
	pub fn has_permission(&self, code: &str) -> bool {
		self.permissions
			.iter()
			.any(|permission| permission.code == code)
			|| self.groups.iter().any(|group| group.has_permission(code))
	}

	/// Ensures this user holds the permission with the given `code`.
	///
	/// The returned error produces a `403 Forbidden` status.
	pub fn require(&self, code: &str) -> Result<()> {
		if self.has_permission(code) {
			Ok(())
		} else {
			Err(Error::insufficient_permissions(code))
		}
	}
}

/// An [`ExternalID`] together with the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
	/// The identity provider's subject identifier.
	pub id: ExternalID,

	/// The user this identity belongs to.
	pub user: User,
}

/// Values for a user that is about to be created.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
	/// The user's display name.
	pub name: &'a str,

	/// The user's email address.
	pub email: &'a str,

	/// URL of the user's avatar image.
	pub avatar_url: &'a str,

	/// Whether the user may log in.
	pub active: bool,
}

/// The profile an identity provider reported after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
	/// The identity provider's subject identifier.
	pub external_id: ExternalID,

	/// The user's display name.
	pub name: String,

	/// The user's email address.
	pub email: String,

	/// URL of the user's avatar image.
	pub avatar_url: String,
}

impl Profile {
	/// Creates a new [`Profile`].
	pub fn new<I, N, E, A>(external_id: I, name: N, email: E, avatar_url: A) -> Self
	where
		I: Into<ExternalID>,
		N: Into<String>,
		E: Into<String>,
		A: Into<String>,
	{
		Self {
			external_id: external_id.into(),
			name: name.into(),
			email: email.into(),
			avatar_url: avatar_url.into(),
		}
	}
}
