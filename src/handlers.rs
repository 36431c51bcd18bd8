//! HTTP handlers served by the `warden` binary.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{routing, Json, Router};
use serde::Serialize;

use crate::authorization::{Authenticated, Authorization, User};
use crate::database::Database;
use crate::middleware::SessionLayer;
use crate::sessions::{SessionCookie, SessionStore};
use crate::Result;

/// Returns a router with every route, wrapped in the [session middleware].
///
/// [session middleware]: crate::middleware::session
pub fn router<D, S>(auth: Authorization<D, S>) -> Router
where
	D: Database,
	S: SessionStore,
{
	Router::new()
		.route("/", routing::get(|| async { "(͡ ͡° ͜ つ ͡͡°)" }))
		.route("/me", routing::get(me))
		.route("/auth/logout", routing::get(logout::<D, S>))
		.with_state(auth.clone())
		.layer(SessionLayer::new(auth))
}

/// Response body of `GET /me`.
#[derive(Debug, Serialize)]
struct Me {
	/// The logged-in user.
	#[serde(flatten)]
	user: User,

	/// Every permission the user holds, directly or through one of their groups.
	effective_permissions: Vec<String>,
}

/// Returns the logged-in user.
async fn me(Authenticated(user): Authenticated) -> Json<Me> {
	let effective_permissions = user.permissions().map(ToOwned::to_owned).collect();

	Json(Me {
		user,
		effective_permissions,
	})
}

/// Logs out the current session.
#[tracing::instrument(level = "debug", skip_all, err(level = "debug"))]
async fn logout<D, S>(
	State(auth): State<Authorization<D, S>>,
	headers: HeaderMap,
) -> Result<(SessionCookie, StatusCode)>
where
	D: Database,
	S: SessionStore,
{
	let cookie = auth.logout(&headers).await?;

	Ok((cookie, StatusCode::NO_CONTENT))
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use axum::body::Body;
	use axum::extract::Request;
	use axum::http::header;
	use axum::response::Response;
	use tower::ServiceExt;

	use super::*;
	use crate::authorization::{Profile, RoleRegistry, Roles};
	use crate::database::memory::MemoryDatabase;
	use crate::sessions::memory::MemorySessionStore;
	use crate::sessions::{SessionManager, COOKIE_NAME};
	use crate::testing;

	async fn setup() -> anyhow::Result<Authorization<MemoryDatabase, MemorySessionStore>> {
		let auth = Authorization::configure(
			MemoryDatabase::new(),
			SessionManager::new(MemorySessionStore::new(), "localhost"),
			Arc::new(Roles::new()) as Arc<dyn RoleRegistry>,
			"Super users",
		)
		.await?;

		Ok(auth)
	}

	fn request(path: &str, cookie: Option<&SessionCookie>) -> anyhow::Result<Request> {
		let mut request = axum::http::Request::builder().uri(path);

		if let Some(cookie) = cookie {
			request = request.header(
				header::COOKIE,
				format!("{COOKIE_NAME}={}", cookie.cookie().value()),
			);
		}

		Ok(request.body(Body::empty())?)
	}

	async fn json(response: Response) -> anyhow::Result<serde_json::Value> {
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;

		Ok(serde_json::from_slice(&body)?)
	}

	#[tokio::test]
	async fn me_requires_login() -> anyhow::Result<()> {
		let auth = setup().await?;
		let response = router(auth).oneshot(request("/me", None)?).await?;

		testing::assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

		Ok(())
	}

	#[tokio::test]
	async fn me_returns_logged_in_user() -> anyhow::Result<()> {
		let auth = setup().await?;

		auth.add_permission("bans", "Manage bans").await?;

		let profile = Profile::new("ext-1", "Ann", "ann@x.com", "http://a/ann.png");
		let login = auth.login(&HeaderMap::new(), &profile).await?;
		let response = router(auth)
			.oneshot(request("/me", Some(&login.session))?)
			.await?;

		testing::assert_eq!(response.status(), StatusCode::OK);

		let body = json(response).await?;

		testing::assert_eq!(body["name"], "Ann");
		testing::assert_eq!(body["email"], "ann@x.com");
		testing::assert_eq!(body["effective_permissions"], serde_json::json!([]));

		Ok(())
	}

	#[tokio::test]
	async fn logout_ends_the_session() -> anyhow::Result<()> {
		let auth = setup().await?;
		let profile = Profile::new("ext-1", "Ann", "ann@x.com", "http://a/ann.png");
		let login = auth.login(&HeaderMap::new(), &profile).await?;
		let app = router(auth);

		let response = app
			.clone()
			.oneshot(request("/auth/logout", Some(&login.session))?)
			.await?;

		testing::assert_eq!(response.status(), StatusCode::NO_CONTENT);
		testing::assert!(response.headers().get(header::SET_COOKIE).is_some());

		let response = app
			.oneshot(request("/me", Some(&login.session))?)
			.await?;

		testing::assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

		Ok(())
	}
}
