//! The persistence capability the authorization core is built on.
//!
//! [`Database`] covers the operations that run outside of a transaction: loading the permission
//! registry, bootstrapping the superuser group and resolving users for incoming requests.
//! Logins run inside a [`Transaction`], which either commits as a whole or leaves no trace.
//!
//! Two backends are provided:
//!    - [`mysql::MySqlDatabase`], backed by [`sqlx`]
//!    - [`memory::MemoryDatabase`], an in-process store for development and tests

use std::future::Future;

use crate::authorization::{
	ExternalID,
	ExternalIdentity,
	Group,
	GroupID,
	NewUser,
	Permission,
	PermissionID,
	User,
};
use crate::Result;

mod error;
pub use error::SqlErrorExt;

pub mod memory;
pub mod mysql;

/// Access to persisted users, groups and permissions.
///
/// Implementations must enforce the following unique constraints and report violations as
/// ["already exists"] errors:
///    - permission codes
///    - group names
///    - external IDs
///    - (group, permission) grants
///
/// ["already exists"]: crate::Error::is_already_exists()
pub trait Database: Clone + Send + Sync + 'static {
	/// The transaction type returned by [`Database::begin()`].
	type Transaction: Transaction;

	/// Starts a new transaction.
	fn begin(&self) -> impl Future<Output = Result<Self::Transaction>> + Send;

	/// Loads every permission.
	fn permissions(&self) -> impl Future<Output = Result<Vec<Permission>>> + Send;

	/// Looks up a permission by its unique code.
	fn permission_by_code(
		&self,
		code: &str,
	) -> impl Future<Output = Result<Option<Permission>>> + Send;

	/// Looks up a group by its unique name, including the group's permissions.
	fn group_by_name(&self, name: &str) -> impl Future<Output = Result<Option<Group>>> + Send;

	/// Creates a new group without any permissions.
	fn create_group(&self, name: &str) -> impl Future<Output = Result<Group>> + Send;

	/// Creates a new permission.
	fn create_permission(
		&self,
		code: &str,
		name: &str,
	) -> impl Future<Output = Result<Permission>> + Send;

	/// Grants a permission to a group.
	fn grant_group_permission(
		&self,
		group_id: GroupID,
		permission_id: PermissionID,
	) -> impl Future<Output = Result<()>> + Send;

	/// Looks up the user an external ID belongs to.
	///
	/// Inactive users are treated as if they did not exist. The user's direct permissions, groups,
	/// and group permissions are loaded eagerly.
	fn active_user_by_external_id(
		&self,
		external_id: &ExternalID,
	) -> impl Future<Output = Result<Option<User>>> + Send;
}

/// A database transaction.
///
/// Dropping a transaction without calling [`Transaction::commit()`] rolls it back.
pub trait Transaction: Send + 'static {
	/// Looks up an external identity and the user it belongs to.
	fn identity(
		&mut self,
		external_id: &ExternalID,
	) -> impl Future<Output = Result<Option<ExternalIdentity>>> + Send;

	/// Creates a new user and the external identity pointing to it.
	fn create_identity(
		&mut self,
		external_id: &ExternalID,
		user: NewUser<'_>,
	) -> impl Future<Output = Result<ExternalIdentity>> + Send;

	/// Updates a user's profile, activation flag and last login.
	fn save_user(&mut self, user: &User) -> impl Future<Output = Result<()>> + Send;

	/// Commits the transaction.
	fn commit(self) -> impl Future<Output = Result<()>> + Send;

	/// Rolls back the transaction.
	fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
