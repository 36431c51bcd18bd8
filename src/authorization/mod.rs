//! Identities, permissions and logins.
//!
//! [`Authorization`] ties together a [`Database`], a [`SessionManager`] and a [`RoleRegistry`]:
//!
//!    - [`Authorization::configure()`] loads the permission registry and makes sure the superuser
//!      group exists
//!    - [`Authorization::add_permission()`] registers permission codes; every registered
//!      permission is granted to the superuser group
//!    - [`Authorization::login()`] creates or refreshes a user after a successful login with an
//!      identity provider, and stores the user's [external ID] in the session
//!    - the [session middleware] resolves the logged-in user for every request, which handlers
//!      can then access through the [`CurrentUser`] and [`Authenticated`] extractors
//!
//! [external ID]: ExternalID
//! [session middleware]: crate::middleware::session

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::HeaderMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::database::{Database, Transaction};
use crate::sessions::{SessionCookie, SessionManager, SessionStore};
use crate::{Error, Result};

mod models;
pub use models::{
	ExternalID,
	ExternalIdentity,
	Group,
	GroupID,
	NewUser,
	Permission,
	PermissionID,
	Profile,
	User,
	UserID,
};

mod roles;
pub use roles::{RolePredicate, RoleRegistry, Roles};

mod extract;
pub use extract::{Authenticated, CurrentUser};

/// The authorization core.
///
/// Cloning yields a handle to the same registry.
pub struct Authorization<D, S> {
	/// Shared state.
	inner: Arc<Inner<D, S>>,
}

#[allow(clippy::missing_docs_in_private_items)]
struct Inner<D, S> {
	database: D,
	sessions: SessionManager<S>,
	roles: Arc<dyn RoleRegistry>,

	/// Held for the entire duration of [`Authorization::add_permission()`].
	registry: Mutex<Registry>,
}

/// The permission cache and the superuser group.
#[derive(Debug)]
struct Registry {
	/// Every known permission, keyed by code.
	permissions: HashMap<String, Permission>,

	/// The group that is granted every registered permission.
	superuser_group: Group,
}

/// The result of a successful [login].
///
/// [login]: Authorization::login()
#[derive(Debug)]
#[must_use = "the session cookie has to be sent back to the client"]
pub struct Login {
	/// The user that logged in.
	pub user: User,

	/// The session cookie identifying the user from now on.
	pub session: SessionCookie,
}

/// The outcome of resolving the session of a request.
#[derive(Debug)]
pub(crate) struct ResolvedSession {
	/// The logged-in user, if any.
	pub(crate) user: Option<User>,

	/// A cookie for an updated session, if the session had to be modified.
	pub(crate) cookie: Option<SessionCookie>,
}

impl<D, S> Clone for Authorization<D, S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<D, S> fmt::Debug for Authorization<D, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Authorization").finish_non_exhaustive()
	}
}

impl<D, S> Authorization<D, S>
where
	D: Database,
	S: SessionStore,
{
	/// Loads every persisted permission and finds or creates the superuser group.
	///
	/// Any failure is fatal; the application should not start without a working authorization
	/// core.
	#[tracing::instrument(level = "debug", name = "authorization::configure", skip_all, fields(
		superuser_group = %superuser_group,
	), err(level = "debug"))]
	pub async fn configure(
		database: D,
		sessions: SessionManager<S>,
		roles: Arc<dyn RoleRegistry>,
		superuser_group: &str,
	) -> Result<Self> {
		let permissions = database
			.permissions()
			.await
			.map_err(|error| error.context("could not load permissions"))?
			.into_iter()
			.map(|permission| (permission.code.clone(), permission))
			.collect::<HashMap<_, _>>();

		tracing::debug!(amount = permissions.len(), "loaded permissions");

		let superuser_group = find_or_create_group(&database, superuser_group).await?;

		tracing::debug!(group.id = %superuser_group.id, "loaded superuser group");

		Ok(Self {
			inner: Arc::new(Inner {
				database,
				sessions,
				roles,
				registry: Mutex::new(Registry {
					permissions,
					superuser_group,
				}),
			}),
		})
	}

	/// Returns the underlying database.
	pub fn database(&self) -> &D {
		&self.inner.database
	}

	/// Returns the session manager.
	pub fn sessions(&self) -> &SessionManager<S> {
		&self.inner.sessions
	}

	/// Registers a permission.
	///
	/// Unknown codes are persisted first. The permission is then granted to the superuser group,
	/// unless it already is, and registered as a role that is held by every user holding the
	/// permission. Calling this again with the same `code` performs no writes.
	#[tracing::instrument(level = "debug", name = "authorization::add_permission", skip(self), err(level = "debug"))]
	pub async fn add_permission(&self, code: &str, name: &str) -> Result<()> {
		let mut registry = self.inner.registry.lock().await;

		let permission = match registry.permissions.get(code) {
			Some(permission) => permission.clone(),
			None => {
				let permission = self.find_or_create_permission(code, name).await?;

				registry
					.permissions
					.insert(permission.code.clone(), permission.clone());

				permission
			}
		};

		if !registry.superuser_group.has_permission(code) {
			match self
				.inner
				.database
				.grant_group_permission(registry.superuser_group.id, permission.id)
				.await
			{
				Ok(()) => {
					tracing::debug!(%code, "granted permission to superuser group");
				}
				Err(error) if error.is_already_exists() => {
					tracing::debug!(%code, "superuser group already holds permission");
				}
				Err(error) => {
					return Err(error.context("could not add permission to superuser group"));
				}
			}

			registry.superuser_group.permissions.push(permission);
		}

		let role = code.to_owned();

		self.inner.roles.register(
			code,
			Arc::new(move |user: &User| user.has_permission(&role)),
		);

		Ok(())
	}

	/// Persists a permission that is missing from the registry.
	///
	/// The code may already be stored if it was created after [`Authorization::configure()`],
	/// e.g. by another instance sharing the same database. The stored permission is used then.
	async fn find_or_create_permission(&self, code: &str, name: &str) -> Result<Permission> {
		let error = match self.inner.database.create_permission(code, name).await {
			Ok(permission) => {
				tracing::info!(target: "warden::audit_log", %code, %name, "created permission");
				return Ok(permission);
			}
			Err(error) if error.is_already_exists() => error,
			Err(error) => return Err(error.context("could not create permission")),
		};

		tracing::debug!(%code, "permission is already stored; fetching it");

		self.inner
			.database
			.permission_by_code(code)
			.await
			.map_err(|error| error.context("could not load permission"))?
			.ok_or_else(|| error.context("could not create permission"))
	}

	/// Returns the registered permission with the given `code`.
	pub async fn permission(&self, code: &str) -> Option<Permission> {
		self.inner
			.registry
			.lock()
			.await
			.permissions
			.get(code)
			.cloned()
	}

	/// Whether a permission with the given `code` has been registered.
	pub async fn has_permission(&self, code: &str) -> bool {
		self.inner
			.registry
			.lock()
			.await
			.permissions
			.contains_key(code)
	}

	/// Returns a snapshot of the superuser group.
	pub async fn superuser_group(&self) -> Group {
		self.inner.registry.lock().await.superuser_group.clone()
	}

	/// Logs in the user described by `profile`.
	///
	/// The user and their external identity are created on first login, and refreshed with the
	/// values from `profile` on every login. All of this happens in one transaction, which is
	/// rolled back on any failure. Deactivated users are rejected with an [inactive user] error.
	///
	/// Only after the transaction has been committed, the user's external ID is written into the
	/// session of the request described by `headers`. If that fails, the login itself has
	/// still succeeded, and [`Authorization::issue_session()`] can be retried on its own.
	///
	/// [inactive user]: crate::ErrorKind::InactiveUser
	#[tracing::instrument(level = "debug", name = "authorization::login", skip_all, fields(
		user.external_id = %profile.external_id,
		user.id = tracing::field::Empty,
	), err(level = "debug"))]
	pub async fn login(&self, headers: &HeaderMap, profile: &Profile) -> Result<Login> {
		let user = match self.login_transaction(profile).await {
			Ok(user) => user,
			Err(error) => {
				if error.is_inactive_user() {
					tracing::warn!(target: "warden::audit_log", external_id = %profile.external_id, "rejected login of inactive user");
				}

				return Err(error);
			}
		};

		tracing::Span::current().record("user.id", format_args!("{}", user.id));
		tracing::info!(target: "warden::audit_log", user_id = %user.id, user_name = %user.name, "user logged in");

		let session = self.issue_session(headers, &profile.external_id).await?;

		Ok(Login { user, session })
	}

	/// Runs the transactional part of [`Authorization::login()`].
	async fn login_transaction(&self, profile: &Profile) -> Result<User> {
		let mut transaction = self
			.inner
			.database
			.begin()
			.await
			.map_err(|error| error.context("could not start transaction"))?;

		let identity = match transaction.identity(&profile.external_id).await {
			Ok(Some(identity)) => identity,
			Ok(None) => {
				tracing::debug!("first login; creating user");

				let new_user = NewUser {
					name: &profile.name,
					email: &profile.email,
					avatar_url: &profile.avatar_url,
					active: true,
				};

				match transaction
					.create_identity(&profile.external_id, new_user)
					.await
				{
					Ok(identity) => identity,
					Err(error) => {
						return Err(rollback(transaction, error.context("could not create user id")).await);
					}
				}
			}
			Err(error) => {
				return Err(rollback(transaction, error.context("could not load user")).await);
			}
		};

		let mut user = identity.user;

		if !user.active {
			return Err(rollback(transaction, Error::inactive_user(user.name)).await);
		}

		user.name.clone_from(&profile.name);
		user.email.clone_from(&profile.email);
		user.avatar_url.clone_from(&profile.avatar_url);
		user.last_login = Some(OffsetDateTime::now_utc());

		if let Err(error) = transaction.save_user(&user).await {
			return Err(rollback(transaction, error.context("could not save user")).await);
		}

		transaction
			.commit()
			.await
			.map_err(|error| error.context("transaction failed"))?;

		Ok(user)
	}

	/// Associates the session of the request described by `headers` with `external_id`.
	///
	/// This is the last step of [`Authorization::login()`], and may be retried on its own if it
	/// failed there.
	#[tracing::instrument(level = "debug", name = "authorization::issue_session", skip_all, fields(
		user.external_id = %external_id,
	), err(level = "debug"))]
	pub async fn issue_session(
		&self,
		headers: &HeaderMap,
		external_id: &ExternalID,
	) -> Result<SessionCookie> {
		let mut session = self
			.inner
			.sessions
			.get(headers)
			.await
			.map_err(|error| error.context("could not get session store"))?;

		session.set_user_id(external_id.clone());

		self.inner
			.sessions
			.save(&mut session)
			.await
			.map_err(|error| error.context("could not save session"))
	}

	/// Ends the session of the request described by `headers`.
	///
	/// The session is deleted from the store, and the returned cookie removes it from the client.
	#[tracing::instrument(level = "debug", name = "authorization::logout", skip_all, err(level = "debug"))]
	pub async fn logout(&self, headers: &HeaderMap) -> Result<SessionCookie> {
		let session = self
			.inner
			.sessions
			.get(headers)
			.await
			.map_err(|error| error.context("could not get session store"))?;

		if let Some(external_id) = session.user_id() {
			tracing::info!(target: "warden::audit_log", %external_id, "user logged out");
		}

		self.inner
			.sessions
			.delete(session)
			.await
			.map_err(|error| error.context("could not delete session"))
	}

	/// Resolves the user logged into the session of the request described by `headers`.
	///
	/// Sessions pointing to users that do not exist anymore, or have been deactivated, are
	/// cleared and persisted; the request then proceeds anonymously.
	#[tracing::instrument(level = "debug", name = "authorization::resolve", skip_all, fields(
		user.external_id = tracing::field::Empty,
	), err(level = "debug"))]
	pub(crate) async fn resolve(&self, headers: &HeaderMap) -> Result<ResolvedSession> {
		let mut session = self
			.inner
			.sessions
			.get(headers)
			.await
			.map_err(|error| error.context("could not get session store"))?;

		let Some(external_id) = session.user_id().cloned() else {
			return Ok(ResolvedSession {
				user: None,
				cookie: None,
			});
		};

		tracing::Span::current().record("user.external_id", format_args!("{external_id}"));

		let user = self
			.inner
			.database
			.active_user_by_external_id(&external_id)
			.await
			.map_err(|error| error.context("could not load user"))?;

		if let Some(user) = user {
			tracing::debug!(user.id = %user.id, "resolved user");

			return Ok(ResolvedSession {
				user: Some(user),
				cookie: None,
			});
		}

		tracing::info!(target: "warden::audit_log", %external_id, "clearing session of unknown or inactive user");

		session.remove_user_id();

		let cookie = self
			.inner
			.sessions
			.save(&mut session)
			.await
			.map_err(|error| error.context("could not save session"))?;

		Ok(ResolvedSession {
			user: None,
			cookie: Some(cookie),
		})
	}
}

/// Looks up a group by name, creating it if it does not exist yet.
async fn find_or_create_group<D>(database: &D, name: &str) -> Result<Group>
where
	D: Database,
{
	let existing = database
		.group_by_name(name)
		.await
		.map_err(|error| error.context("could not load superuser group"))?;

	if let Some(group) = existing {
		return Ok(group);
	}

	match database.create_group(name).await {
		Ok(group) => {
			tracing::info!(target: "warden::audit_log", group_id = %group.id, %name, "created superuser group");
			Ok(group)
		}
		Err(error) if error.is_already_exists() => {
			tracing::debug!("superuser group was created concurrently; fetching it again");

			database
				.group_by_name(name)
				.await
				.map_err(|error| error.context("could not load superuser group"))?
				.ok_or_else(|| Error::logic("superuser group exists but could not be found"))
		}
		Err(error) => Err(error.context("could not create superuser group")),
	}
}

/// Rolls back `transaction`, returning the error that caused the rollback.
async fn rollback<T>(transaction: T, error: Error) -> Error
where
	T: Transaction,
{
	if let Err(rollback_error) = transaction.rollback().await {
		tracing::warn!(%rollback_error, "failed to roll back transaction");
	}

	error
}
