//! A [`Database`] backed by MySQL.
//!
//! The schema lives in `database/migrations` and is applied by [`MySqlDatabase::migrate()`].

use std::fmt;

use sqlx::mysql::{MySqlConnection, MySqlPoolOptions};
use sqlx::{MySql, Pool};
use time::OffsetDateTime;
use url::Url;

use super::{Database, SqlErrorExt, Transaction};
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
use crate::Result;

/// A [`Database`] backed by a MySQL connection pool.
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
	/// The connection pool.
	pool: Pool<MySql>,
}

impl MySqlDatabase {
	/// Creates a new [`MySqlDatabase`] from an existing connection pool.
	pub fn new(pool: Pool<MySql>) -> Self {
		Self { pool }
	}

	/// Connects to the database at `url`.
	#[tracing::instrument(level = "debug", target = "warden::database", skip_all, err(level = "debug"))]
	pub async fn connect(url: &Url) -> Result<Self> {
		let pool = MySqlPoolOptions::new().connect(url.as_str()).await?;

		Ok(Self::new(pool))
	}

	/// Returns the underlying connection pool.
	pub fn pool(&self) -> &Pool<MySql> {
		&self.pool
	}

	/// Applies all pending migrations.
	#[tracing::instrument(level = "debug", target = "warden::database", skip_all, err(level = "debug"))]
	pub async fn migrate(&self) -> Result<()> {
		sqlx::migrate!("./database/migrations")
			.run(&self.pool)
			.await
			.map_err(sqlx::Error::from)?;

		Ok(())
	}
}

/// The columns selected for a [`User`], in order.
type UserRow = (UserID, String, String, String, bool, Option<OffsetDateTime>);

/// The columns selected for a [`Permission`], in order.
type PermissionRow = (PermissionID, String, String);

#[allow(clippy::missing_docs_in_private_items)]
fn permission_from_row((id, code, name): PermissionRow) -> Permission {
	Permission { id, code, name }
}

/// Loads the permissions granted to a group.
async fn group_permissions(
	conn: &mut MySqlConnection,
	group_id: GroupID,
) -> sqlx::Result<Vec<Permission>> {
	let rows = sqlx::query_as::<_, PermissionRow>(
		r#"
		SELECT
		  p.id,
		  p.code,
		  p.name
		FROM
		  Permissions p
		  JOIN GroupPermissions gp ON gp.permission_id = p.id
		WHERE
		  gp.group_id = ?
		ORDER BY
		  p.id
		"#,
	)
	.bind(group_id)
	.fetch_all(&mut *conn)
	.await?;

	Ok(rows.into_iter().map(permission_from_row).collect())
}

/// Loads a group by its name, including its permissions.
async fn group_by_name(conn: &mut MySqlConnection, name: &str) -> sqlx::Result<Option<Group>> {
	let Some((id, name)) = sqlx::query_as::<_, (GroupID, String)>(
		r#"
		SELECT
		  id,
		  name
		FROM
		  UserGroups
		WHERE
		  name = ?
		"#,
	)
	.bind(name)
	.fetch_optional(&mut *conn)
	.await?
	else {
		return Ok(None);
	};

	let permissions = group_permissions(conn, id).await?;

	Ok(Some(Group {
		id,
		name,
		permissions,
	}))
}

/// Completes a user row with its direct permissions and groups.
async fn load_user(conn: &mut MySqlConnection, row: UserRow) -> sqlx::Result<User> {
	let (id, name, email, avatar_url, active, last_login) = row;

	let permissions = sqlx::query_as::<_, PermissionRow>(
		r#"
		SELECT
		  p.id,
		  p.code,
		  p.name
		FROM
		  Permissions p
		  JOIN UserPermissions up ON up.permission_id = p.id
		WHERE
		  up.user_id = ?
		ORDER BY
		  p.id
		"#,
	)
	.bind(id)
	.fetch_all(&mut *conn)
	.await?
	.into_iter()
	.map(permission_from_row)
	.collect();

	let group_rows = sqlx::query_as::<_, (GroupID, String)>(
		r#"
		SELECT
		  g.id,
		  g.name
		FROM
		  UserGroups g
		  JOIN GroupMembers m ON m.group_id = g.id
		WHERE
		  m.user_id = ?
		ORDER BY
		  g.id
		"#,
	)
	.bind(id)
	.fetch_all(&mut *conn)
	.await?;

	let mut groups = Vec::with_capacity(group_rows.len());

	for (group_id, group_name) in group_rows {
		groups.push(Group {
			id: group_id,
			name: group_name,
			permissions: group_permissions(conn, group_id).await?,
		});
	}

	Ok(User {
		id,
		name,
		email,
		avatar_url,
		active,
		last_login,
		permissions,
		groups,
	})
}

impl Database for MySqlDatabase {
	type Transaction = MySqlTransaction;

	async fn begin(&self) -> Result<MySqlTransaction> {
		let transaction = self.pool.begin().await?;

		Ok(MySqlTransaction { transaction })
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn permissions(&self) -> Result<Vec<Permission>> {
		let rows = sqlx::query_as::<_, PermissionRow>(
			r#"
			SELECT
			  id,
			  code,
			  name
			FROM
			  Permissions
			ORDER BY
			  id
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(permission_from_row).collect())
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn permission_by_code(&self, code: &str) -> Result<Option<Permission>> {
		let row = sqlx::query_as::<_, PermissionRow>(
			r#"
			SELECT
			  id,
			  code,
			  name
			FROM
			  Permissions
			WHERE
			  code = ?
			"#,
		)
		.bind(code)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(permission_from_row))
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn group_by_name(&self, name: &str) -> Result<Option<Group>> {
		let mut conn = self.pool.acquire().await?;

		Ok(group_by_name(&mut conn, name).await?)
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn create_group(&self, name: &str) -> Result<Group> {
		let id = sqlx::query("INSERT INTO UserGroups (name) VALUES (?)")
			.bind(name)
			.execute(&self.pool)
			.await
			.map_err(|error| error.or_already_exists("group"))?
			.last_insert_id();

		Ok(Group {
			id: GroupID(id),
			name: name.to_owned(),
			permissions: Vec::new(),
		})
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn create_permission(&self, code: &str, name: &str) -> Result<Permission> {
		let id = sqlx::query("INSERT INTO Permissions (code, name) VALUES (?, ?)")
			.bind(code)
			.bind(name)
			.execute(&self.pool)
			.await
			.map_err(|error| error.or_already_exists("permission"))?
			.last_insert_id();

		Ok(Permission {
			id: PermissionID(id),
			code: code.to_owned(),
			name: name.to_owned(),
		})
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn grant_group_permission(
		&self,
		group_id: GroupID,
		permission_id: PermissionID,
	) -> Result<()> {
		sqlx::query("INSERT INTO GroupPermissions (group_id, permission_id) VALUES (?, ?)")
			.bind(group_id)
			.bind(permission_id)
			.execute(&self.pool)
			.await
			.map_err(|error| error.or_already_exists("group permission"))?;

		Ok(())
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn active_user_by_external_id(&self, external_id: &ExternalID) -> Result<Option<User>> {
		let mut conn = self.pool.acquire().await?;

		let Some(row) = sqlx::query_as::<_, UserRow>(
			r#"
			SELECT
			  u.id,
			  u.name,
			  u.email,
			  u.avatar_url,
			  u.active,
			  u.last_login
			FROM
			  Users u
			  JOIN ExternalIdentities e ON e.user_id = u.id
			WHERE
			  e.id = ?
			  AND u.active = TRUE
			"#,
		)
		.bind(external_id)
		.fetch_optional(&mut *conn)
		.await?
		else {
			return Ok(None);
		};

		Ok(Some(load_user(&mut conn, row).await?))
	}
}

/// A transaction of a [`MySqlDatabase`].
pub struct MySqlTransaction {
	/// The underlying SQL transaction.
	transaction: sqlx::Transaction<'static, MySql>,
}

impl fmt::Debug for MySqlTransaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MySqlTransaction").finish_non_exhaustive()
	}
}

impl Transaction for MySqlTransaction {
	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn identity(&mut self, external_id: &ExternalID) -> Result<Option<ExternalIdentity>> {
		let Some(row) = sqlx::query_as::<_, UserRow>(
			r#"
			SELECT
			  u.id,
			  u.name,
			  u.email,
			  u.avatar_url,
			  u.active,
			  u.last_login
			FROM
			  ExternalIdentities e
			  JOIN Users u ON u.id = e.user_id
			WHERE
			  e.id = ?
			FOR UPDATE
			"#,
		)
		.bind(external_id)
		.fetch_optional(&mut *self.transaction)
		.await?
		else {
			return Ok(None);
		};

		let user = load_user(&mut self.transaction, row).await?;

		Ok(Some(ExternalIdentity {
			id: external_id.clone(),
			user,
		}))
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip(self), err(level = "debug"))]
	async fn create_identity(
		&mut self,
		external_id: &ExternalID,
		user: NewUser<'_>,
	) -> Result<ExternalIdentity> {
		let user_id = sqlx::query(
			r#"
			INSERT INTO
			  Users (name, email, avatar_url, active)
			VALUES
			  (?, ?, ?, ?)
			"#,
		)
		.bind(user.name)
		.bind(user.email)
		.bind(user.avatar_url)
		.bind(user.active)
		.execute(&mut *self.transaction)
		.await?
		.last_insert_id();

		let user_id = UserID(user_id);

		sqlx::query("INSERT INTO ExternalIdentities (id, user_id) VALUES (?, ?)")
			.bind(external_id)
			.bind(user_id)
			.execute(&mut *self.transaction)
			.await
			.map_err(|error| error.or_already_exists("external identity"))?;

		Ok(ExternalIdentity {
			id: external_id.clone(),
			user: User {
				id: user_id,
				name: user.name.to_owned(),
				email: user.email.to_owned(),
				avatar_url: user.avatar_url.to_owned(),
				active: user.active,
				last_login: None,
				permissions: Vec::new(),
				groups: Vec::new(),
			},
		})
	}

	#[tracing::instrument(level = "trace", target = "warden::database", skip_all, fields(user.id = %user.id), err(level = "debug"))]
	async fn save_user(&mut self, user: &User) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE
			  Users
			SET
			  name = ?,
			  email = ?,
			  avatar_url = ?,
			  active = ?,
			  last_login = ?
			WHERE
			  id = ?
			"#,
		)
		.bind(&user.name)
		.bind(&user.email)
		.bind(&user.avatar_url)
		.bind(user.active)
		.bind(user.last_login)
		.bind(user.id)
		.execute(&mut *self.transaction)
		.await?;

		Ok(())
	}

	async fn commit(self) -> Result<()> {
		self.transaction.commit().await?;

		Ok(())
	}

	async fn rollback(self) -> Result<()> {
		self.transaction.rollback().await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::env;

	use super::*;
	use crate::testing;

	#[tokio::test]
	#[ignore = "requires a MySQL database at `DATABASE_URL`"]
	async fn login_roundtrip() -> anyhow::Result<()> {
		let url = env::var("DATABASE_URL")?.parse::<Url>()?;
		let database = MySqlDatabase::connect(&url).await?;

		database.migrate().await?;

		let external_id = ExternalID::new(format!("test-{}", uuid::Uuid::new_v4()));
		let new_user = NewUser {
			name: "Ann",
			email: "ann@x.com",
			avatar_url: "http://a/ann.png",
			active: true,
		};

		let mut transaction = database.begin().await?;
		let identity = transaction.create_identity(&external_id, new_user).await?;

		testing::assert!(transaction
			.create_identity(&external_id, new_user)
			.await
			.unwrap_err()
			.is_already_exists());

		drop(transaction);

		testing::assert!(database
			.active_user_by_external_id(&external_id)
			.await?
			.is_none());

		let mut transaction = database.begin().await?;
		let mut user = transaction
			.create_identity(&external_id, new_user)
			.await?
			.user;

		user.last_login = Some(OffsetDateTime::now_utc());
		transaction.save_user(&user).await?;
		transaction.commit().await?;

		let found = database.active_user_by_external_id(&external_id).await?;

		testing::assert_eq!(found.map(|user| user.name), Some(identity.user.name));

		Ok(())
	}
}
