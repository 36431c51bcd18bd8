//! Named roles backed by predicates over [`User`]s.
//!
//! Every permission registered through [`Authorization::add_permission()`] becomes a role with the
//! same name, which is held by every user that holds the permission. Other parts of an
//! application (e.g. an admin interface) can then ask the [`RoleRegistry`] which roles a user has
//! without knowing anything about permissions.
//!
//! [`Authorization::add_permission()`]: crate::authorization::Authorization::add_permission

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::User;

/// A predicate deciding whether a user holds a role.
pub type RolePredicate = Arc<dyn Fn(&User) -> bool + Send + Sync>;

/// A facility that roles can be registered with.
pub trait RoleRegistry: Send + Sync + 'static {
	/// Registers a role.
	///
	/// Registering a role that already exists replaces its predicate.
	fn register(&self, role: &str, predicate: RolePredicate);
}

/// The default, in-process [`RoleRegistry`].
///
/// Roles are kept in registration order.
#[derive(Default)]
pub struct Roles {
	/// Registered roles and their predicates.
	roles: RwLock<Vec<(String, RolePredicate)>>,
}

impl Roles {
	/// Creates an empty [`Roles`] registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether `role` has been registered.
	pub fn contains(&self, role: &str) -> bool {
		self.roles.read().iter().any(|(name, _)| name == role)
	}

	/// Returns the amount of registered roles.
	pub fn len(&self) -> usize {
		self.roles.read().len()
	}

	/// Whether no roles have been registered.
	pub fn is_empty(&self) -> bool {
		self.roles.read().is_empty()
	}

	/// Checks whether `user` holds `role`.
	///
	/// Unknown roles are never held.
	pub fn matches(&self, role: &str, user: &User) -> bool {
		self.roles
			.read()
			.iter()
			.find(|(name, _)| name == role)
			.is_some_and(|(_, predicate)| predicate(user))
	}

	/// Returns every role `user` holds, in registration order.
	pub fn roles_of(&self, user: &User) -> Vec<String> {
		self.roles
			.read()
			.iter()
			.filter(|(_, predicate)| predicate(user))
			.map(|(name, _)| name.clone())
			.collect()
	}
}

impl RoleRegistry for Roles {
	fn register(&self, role: &str, predicate: RolePredicate) {
		let mut roles = self.roles.write();

		match roles.iter_mut().find(|(name, _)| name == role) {
			Some((_, existing)) => *existing = predicate,
			None => roles.push((role.to_owned(), predicate)),
		}

		tracing::trace!(target: "warden::roles", role, "registered role");
	}
}

impl fmt::Debug for Roles {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list()
			.entries(self.roles.read().iter().map(|(name, _)| name))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::authorization::{Permission, PermissionID, UserID};
	use crate::testing;

	fn user_with(codes: &[&str]) -> User {
		User {
			id: UserID(1),
			name: String::from("Ann"),
			email: String::from("ann@x.com"),
			avatar_url: String::from("http://a/ann.png"),
			active: true,
			last_login: None,
			permissions: codes
				.iter()
				.zip(1..)
				.map(|(code, id)| Permission {
					id: PermissionID(id),
					code: (*code).to_owned(),
					name: (*code).to_owned(),
				})
				.collect(),
			groups: Vec::new(),
		}
	}

	fn holds(code: &'static str) -> RolePredicate {
		Arc::new(move |user: &User| user.has_permission(code))
	}

	#[test]
	fn roles_keep_registration_order() -> anyhow::Result<()> {
		let roles = Roles::new();

		roles.register("maps", holds("maps"));
		roles.register("bans", holds("bans"));
		roles.register("servers", holds("servers"));

		let user = user_with(&["servers", "maps"]);

		testing::assert_eq!(roles.roles_of(&user), ["maps", "servers"]);
		testing::assert!(roles.matches("maps", &user));
		testing::assert!(!roles.matches("bans", &user));
		testing::assert!(!roles.matches("unknown", &user));

		Ok(())
	}

	#[test]
	fn reregistering_replaces_predicate() -> anyhow::Result<()> {
		let roles = Roles::new();
		let user = user_with(&[]);

		roles.register("everyone", Arc::new(|_: &User| false));
		roles.register("everyone", Arc::new(|_: &User| true));

		testing::assert_eq!(roles.len(), 1);
		testing::assert!(roles.matches("everyone", &user));

		Ok(())
	}
}
