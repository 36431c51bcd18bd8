//! An in-process [`Database`].
//!
//! Everything lives inside a single [`tokio::sync::Mutex`]. A [`MemoryTransaction`] holds the lock
//! for its entire lifetime and works on a copy of the data, which is written back on commit. This
//! makes transactions fully serializable, and dropping one without committing leaves no trace.
//!
//! Individual operations can be made to fail with [`MemoryDatabase::fail_next()`].

use std::collections::BTreeMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Database, Transaction};
use crate::authorization::{
	ExternalID,
	ExternalIdentity,
	Group,
	GroupID,
	NewUser,
	Permission,
	PermissionID,
	User,
	UserID,
};
use crate::faults::Faults;
use crate::{Error, Result};

/// Operations of the in-memory backend that can be made to fail.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
	Begin,
	Permissions,
	PermissionByCode,
	GroupByName,
	CreateGroup,

	/// Makes [`Database::create_group()`] behave as if another writer created the same group
	/// just before: the group is stored, but the call reports a conflict.
	CreateGroupConflict,

	CreatePermission,
	GrantGroupPermission,
	ActiveUserByExternalId,
	Identity,
	CreateIdentity,
	SaveUser,
	Commit,
}

/// An in-process [`Database`].
///
/// Cloning yields a handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
	/// The committed state.
	state: Arc<Mutex<State>>,

	/// Armed failure points.
	faults: Faults<FailPoint>,
}

/// A user row.
#[derive(Debug, Clone)]
struct UserRow {
	/// The user's display name.
	name: String,

	/// The user's email address.
	email: String,

	/// URL of the user's avatar image.
	avatar_url: String,

	/// Whether the user may log in.
	active: bool,

	/// When the user last logged in.
	last_login: Option<OffsetDateTime>,

	/// Direct permission grants.
	permissions: Vec<PermissionID>,

	/// Group memberships.
	groups: Vec<GroupID>,
}

/// A group row.
#[derive(Debug, Clone)]
struct GroupRow {
	/// The group's unique name.
	name: String,

	/// Permission grants.
	permissions: Vec<PermissionID>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::missing_docs_in_private_items)]
struct State {
	/// The last ID handed out, shared by all tables.
	last_id: u64,
	permissions: BTreeMap<PermissionID, Permission>,
	groups: BTreeMap<GroupID, GroupRow>,
	users: BTreeMap<UserID, UserRow>,
	identities: BTreeMap<ExternalID, UserID>,
}

impl State {
	/// Hands out a new ID.
	fn next_id(&mut self) -> u64 {
		self.last_id += 1;
		self.last_id
	}

	/// Resolves a list of permission IDs.
	fn permissions_of(&self, ids: &[PermissionID]) -> Vec<Permission> {
		ids.iter()
			.filter_map(|id| self.permissions.get(id))
			.cloned()
			.collect()
	}

	/// Builds a [`Group`], including its permissions.
	fn group(&self, id: GroupID) -> Option<Group> {
		self.groups.get(&id).map(|row| Group {
			id,
			name: row.name.clone(),
			permissions: self.permissions_of(&row.permissions),
		})
	}

	/// Builds a [`User`], including direct permissions and groups.
	fn user(&self, id: UserID) -> Option<User> {
		self.users.get(&id).map(|row| User {
			id,
			name: row.name.clone(),
			email: row.email.clone(),
			avatar_url: row.avatar_url.clone(),
			active: row.active,
			last_login: row.last_login,
			permissions: self.permissions_of(&row.permissions),
			groups: row
				.groups
				.iter()
				.filter_map(|&group_id| self.group(group_id))
				.collect(),
		})
	}

	/// Returns a mutable reference to a user row.
	fn user_mut(&mut self, id: UserID) -> Result<&mut UserRow> {
		self.users
			.get_mut(&id)
			.ok_or_else(|| Error::logic(format_args!("user {id} does not exist")))
	}
}

impl MemoryDatabase {
	/// Creates a new, empty [`MemoryDatabase`].
	pub fn new() -> Self {
		Self {
			state: Arc::default(),
			faults: Faults::new(),
		}
	}

	/// Makes the next invocation of `point` fail with a backend error.
	pub fn fail_next(&self, point: FailPoint) {
		self.faults.arm(point);
	}

	/// Returns the amount of users.
	pub async fn user_count(&self) -> usize {
		self.state.lock().await.users.len()
	}

	/// Returns the amount of external identities.
	pub async fn identity_count(&self) -> usize {
		self.state.lock().await.identities.len()
	}

	/// Sets a user's activation flag.
	pub async fn set_active(&self, user_id: UserID, active: bool) -> Result<()> {
		self.state.lock().await.user_mut(user_id)?.active = active;

		Ok(())
	}

	/// Makes a user a member of a group.
	pub async fn add_member(&self, group_id: GroupID, user_id: UserID) -> Result<()> {
		let mut state = self.state.lock().await;

		if !state.groups.contains_key(&group_id) {
			return Err(Error::logic(format_args!("group {group_id} does not exist")));
		}

		let user = state.user_mut(user_id)?;

		if user.groups.contains(&group_id) {
			return Err(Error::already_exists("group member"));
		}

		user.groups.push(group_id);

		Ok(())
	}

	/// Grants a permission to a user directly.
	pub async fn grant_user_permission(
		&self,
		user_id: UserID,
		permission_id: PermissionID,
	) -> Result<()> {
		let mut state = self.state.lock().await;

		if !state.permissions.contains_key(&permission_id) {
			return Err(Error::logic(format_args!("permission {permission_id} does not exist")));
		}

		let user = state.user_mut(user_id)?;

		if user.permissions.contains(&permission_id) {
			return Err(Error::already_exists("user permission"));
		}

		user.permissions.push(permission_id);

		Ok(())
	}
}

impl Default for MemoryDatabase {
	fn default() -> Self {
		Self::new()
	}
}

impl Database for MemoryDatabase {
	type Transaction = MemoryTransaction;

	async fn begin(&self) -> Result<MemoryTransaction> {
		self.faults.check(FailPoint::Begin)?;

		let guard = Arc::clone(&self.state).lock_owned().await;
		let working = guard.clone();

		Ok(MemoryTransaction {
			guard,
			working,
			faults: self.faults.clone(),
		})
	}

	async fn permissions(&self) -> Result<Vec<Permission>> {
		self.faults.check(FailPoint::Permissions)?;

		Ok(self.state.lock().await.permissions.values().cloned().collect())
	}

	async fn permission_by_code(&self, code: &str) -> Result<Option<Permission>> {
		self.faults.check(FailPoint::PermissionByCode)?;

		Ok(self
			.state
			.lock()
			.await
			.permissions
			.values()
			.find(|permission| permission.code == code)
			.cloned())
	}

	async fn group_by_name(&self, name: &str) -> Result<Option<Group>> {
		self.faults.check(FailPoint::GroupByName)?;

		let state = self.state.lock().await;

		Ok(state
			.groups
			.iter()
			.find(|(_, group)| group.name == name)
			.and_then(|(&id, _)| state.group(id)))
	}

	async fn create_group(&self, name: &str) -> Result<Group> {
		self.faults.check(FailPoint::CreateGroup)?;

		let mut state = self.state.lock().await;

		if state.groups.values().any(|group| group.name == name) {
			return Err(Error::already_exists("group"));
		}

		let id = GroupID(state.next_id());

		state.groups.insert(id, GroupRow {
			name: name.to_owned(),
			permissions: Vec::new(),
		});

		if self.faults.take(&FailPoint::CreateGroupConflict) {
			return Err(Error::already_exists("group"));
		}

		Ok(Group {
			id,
			name: name.to_owned(),
			permissions: Vec::new(),
		})
	}

	async fn create_permission(&self, code: &str, name: &str) -> Result<Permission> {
		self.faults.check(FailPoint::CreatePermission)?;

		let mut state = self.state.lock().await;

		if state
			.permissions
			.values()
			.any(|permission| permission.code == code)
		{
			return Err(Error::already_exists("permission"));
		}

		let permission = Permission {
			id: PermissionID(state.next_id()),
			code: code.to_owned(),
			name: name.to_owned(),
		};

		state.permissions.insert(permission.id, permission.clone());

		Ok(permission)
	}

	async fn grant_group_permission(
		&self,
		group_id: GroupID,
		permission_id: PermissionID,
	) -> Result<()> {
		self.faults.check(FailPoint::GrantGroupPermission)?;

		let mut state = self.state.lock().await;

		if !state.permissions.contains_key(&permission_id) {
			return Err(Error::logic(format_args!("permission {permission_id} does not exist")));
		}

		let group = state
			.groups
			.get_mut(&group_id)
			.ok_or_else(|| Error::logic(format_args!("group {group_id} does not exist")))?;

		if group.permissions.contains(&permission_id) {
			return Err(Error::already_exists("group permission"));
		}

		group.permissions.push(permission_id);

		Ok(())
	}

	async fn active_user_by_external_id(&self, external_id: &ExternalID) -> Result<Option<User>> {
		self.faults.check(FailPoint::ActiveUserByExternalId)?;

		let state = self.state.lock().await;

		Ok(state
			.identities
			.get(external_id)
			.and_then(|&user_id| state.user(user_id))
			.filter(|user| user.active))
	}
}

/// A transaction of a [`MemoryDatabase`].
///
/// Other transactions and operations wait until this one is committed or dropped.
#[derive(Debug)]
pub struct MemoryTransaction {
	/// The lock on the committed state.
	guard: OwnedMutexGuard<State>,

	/// The state as seen by this transaction.
	working: State,

	/// Armed failure points.
	faults: Faults<FailPoint>,
}

impl Transaction for MemoryTransaction {
	async fn identity(&mut self, external_id: &ExternalID) -> Result<Option<ExternalIdentity>> {
		self.faults.check(FailPoint::Identity)?;

		Ok(self
			.working
			.identities
			.get(external_id)
			.and_then(|&user_id| self.working.user(user_id))
			.map(|user| ExternalIdentity {
				id: external_id.clone(),
				user,
			}))
	}

	async fn create_identity(
		&mut self,
		external_id: &ExternalID,
		user: NewUser<'_>,
	) -> Result<ExternalIdentity> {
		self.faults.check(FailPoint::CreateIdentity)?;

		if self.working.identities.contains_key(external_id) {
			return Err(Error::already_exists("external identity"));
		}

		let user_id = UserID(self.working.next_id());

		self.working.users.insert(user_id, UserRow {
			name: user.name.to_owned(),
			email: user.email.to_owned(),
			avatar_url: user.avatar_url.to_owned(),
			active: user.active,
			last_login: None,
			permissions: Vec::new(),
			groups: Vec::new(),
		});

		self.working
			.identities
			.insert(external_id.clone(), user_id);

		let user = self
			.working
			.user(user_id)
			.ok_or_else(|| Error::logic("freshly inserted user is missing"))?;

		Ok(ExternalIdentity {
			id: external_id.clone(),
			user,
		})
	}

	async fn save_user(&mut self, user: &User) -> Result<()> {
		self.faults.check(FailPoint::SaveUser)?;

		let row = self.working.user_mut(user.id)?;

		row.name.clone_from(&user.name);
		row.email.clone_from(&user.email);
		row.avatar_url.clone_from(&user.avatar_url);
		row.active = user.active;
		row.last_login = user.last_login;

		Ok(())
	}

	async fn commit(mut self) -> Result<()> {
		self.faults.check(FailPoint::Commit)?;

		*self.guard = self.working;

		Ok(())
	}

	async fn rollback(self) -> Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;

	fn ann() -> NewUser<'static> {
		NewUser {
			name: "Ann",
			email: "ann@x.com",
			avatar_url: "http://a/ann.png",
			active: true,
		}
	}

	#[tokio::test]
	async fn unique_constraints_are_enforced() -> anyhow::Result<()> {
		let database = MemoryDatabase::new();
		let group = database.create_group("Editors").await?;
		let permission = database.create_permission("bans", "Bans").await?;

		database.grant_group_permission(group.id, permission.id).await?;

		testing::assert!(database.create_group("Editors").await.unwrap_err().is_already_exists());
		testing::assert!(database
			.create_permission("bans", "Other")
			.await
			.unwrap_err()
			.is_already_exists());
		testing::assert!(database
			.grant_group_permission(group.id, permission.id)
			.await
			.unwrap_err()
			.is_already_exists());

		let group = database.group_by_name("Editors").await?;

		testing::assert_eq!(group.map(|group| group.permissions), Some(vec![permission]));

		Ok(())
	}

	#[tokio::test]
	async fn dropped_transaction_leaves_no_trace() -> anyhow::Result<()> {
		let database = MemoryDatabase::new();
		let mut transaction = database.begin().await?;

		transaction
			.create_identity(&ExternalID::new("ext-1"), ann())
			.await?;

		drop(transaction);

		testing::assert_eq!(database.user_count().await, 0);
		testing::assert_eq!(database.identity_count().await, 0);

		Ok(())
	}

	#[tokio::test]
	async fn committed_transaction_is_visible() -> anyhow::Result<()> {
		let database = MemoryDatabase::new();
		let external_id = ExternalID::new("ext-1");
		let mut transaction = database.begin().await?;
		let identity = transaction.create_identity(&external_id, ann()).await?;

		testing::assert!(transaction
			.create_identity(&external_id, ann())
			.await
			.unwrap_err()
			.is_already_exists());

		transaction.commit().await?;

		let user = database.active_user_by_external_id(&external_id).await?;

		testing::assert_eq!(user.as_ref().map(|user| user.id), Some(identity.user.id));

		database.set_active(identity.user.id, false).await?;

		testing::assert!(database
			.active_user_by_external_id(&external_id)
			.await?
			.is_none());

		Ok(())
	}

	#[tokio::test]
	async fn failed_commit_discards_changes() -> anyhow::Result<()> {
		let database = MemoryDatabase::new();
		let mut transaction = database.begin().await?;

		transaction
			.create_identity(&ExternalID::new("ext-1"), ann())
			.await?;

		database.fail_next(FailPoint::Commit);

		testing::assert!(transaction.commit().await.is_err());
		testing::assert_eq!(database.user_count().await, 0);

		Ok(())
	}
}
