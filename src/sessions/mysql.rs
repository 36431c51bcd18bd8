//! A [`SessionStore`] backed by MySQL.

use sqlx::{MySql, Pool};
use time::OffsetDateTime;

use super::{Session, SessionID, SessionStore};
use crate::authorization::ExternalID;
use crate::Result;

/// A [`SessionStore`] backed by the `Sessions` table.
#[derive(Debug, Clone)]
pub struct MySqlSessionStore {
	/// The connection pool.
	pool: Pool<MySql>,
}

impl MySqlSessionStore {
	/// Creates a new [`MySqlSessionStore`].
	pub fn new(pool: Pool<MySql>) -> Self {
		Self { pool }
	}

	/// Deletes all expired sessions, returning how many there were.
	#[tracing::instrument(level = "debug", target = "warden::sessions", skip(self), err(level = "debug"))]
	pub async fn delete_expired(&self) -> Result<u64> {
		let deleted = sqlx::query("DELETE FROM Sessions WHERE expires_on <= NOW()")
			.execute(&self.pool)
			.await?
			.rows_affected();

		Ok(deleted)
	}
}

impl SessionStore for MySqlSessionStore {
	#[tracing::instrument(level = "trace", target = "warden::sessions", skip(self), err(level = "debug"))]
	async fn load(&self, id: SessionID) -> Result<Option<Session>> {
		let session = sqlx::query_as::<_, (SessionID, Option<ExternalID>, OffsetDateTime)>(
			r#"
			SELECT
			  id,
			  user_id,
			  expires_on
			FROM
			  Sessions
			WHERE
			  id = ?
			  AND expires_on > NOW()
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?
		.map(|(id, user_id, expires_on)| Session::from_parts(id, user_id, expires_on));

		Ok(session)
	}

	#[tracing::instrument(level = "trace", target = "warden::sessions", skip_all, fields(session.id = %session.id()), err(level = "debug"))]
	async fn save(&self, session: &Session) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO
			  Sessions (id, user_id, expires_on)
			VALUES
			  (?, ?, ?)
			ON DUPLICATE KEY UPDATE
			  user_id = VALUES(user_id),
			  expires_on = VALUES(expires_on)
			"#,
		)
		.bind(session.id())
		.bind(session.user_id())
		.bind(session.expires_on())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(level = "trace", target = "warden::sessions", skip(self), err(level = "debug"))]
	async fn delete(&self, id: SessionID) -> Result<()> {
		sqlx::query("DELETE FROM Sessions WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(())
	}
}
