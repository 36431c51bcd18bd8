//! Extractors for the user resolved by the [session middleware].
//!
//! [session middleware]: crate::middleware::session

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request;
use derive_more::{Deref, Into};

use super::User;
use crate::{Error, Result};

/// The user logged into the current request's session, if any.
///
/// Requests without a logged-in user are not rejected.
#[derive(Debug, Clone, Deref, Into)]
pub struct CurrentUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
	S: Send + Sync,
{
	type Rejection = Infallible;

	async fn from_request_parts(
		request: &mut request::Parts,
		_state: &S,
	) -> Result<Self, Self::Rejection> {
		Ok(Self(request.extensions.get::<User>().cloned()))
	}
}

/// The user logged into the current request's session.
///
/// Requests without a logged-in user are rejected with `401 Unauthorized`.
#[derive(Debug, Clone, Deref, Into)]
pub struct Authenticated(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
	S: Send + Sync,
{
	type Rejection = Error;

	#[tracing::instrument(level = "trace", name = "authorization::authenticated", skip_all, err(level = "debug"))]
	async fn from_request_parts(request: &mut request::Parts, _state: &S) -> Result<Self> {
		request
			.extensions
			.get::<User>()
			.cloned()
			.map(Self)
			.ok_or_else(|| Error::unauthorized())
	}
}

#[cfg(test)]
mod tests {
	use axum::http::{Request, StatusCode};
	use axum::response::IntoResponse;

	use super::*;
	use crate::authorization::UserID;
	use crate::testing;

	fn ann() -> User {
		User {
			id: UserID(1),
			name: String::from("Ann"),
			email: String::from("ann@x.com"),
			avatar_url: String::from("http://a/ann.png"),
			active: true,
			last_login: None,
			permissions: Vec::new(),
			groups: Vec::new(),
		}
	}

	#[tokio::test]
	async fn anonymous_requests() -> anyhow::Result<()> {
		let (mut parts, ()) = Request::builder().uri("/").body(())?.into_parts();

		let CurrentUser(user) = CurrentUser::from_request_parts(&mut parts, &()).await?;

		testing::assert!(user.is_none());

		let rejection = Authenticated::from_request_parts(&mut parts, &())
			.await
			.unwrap_err();

		testing::assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);

		Ok(())
	}

	#[tokio::test]
	async fn logged_in_requests() -> anyhow::Result<()> {
		let (mut parts, ()) = Request::builder().uri("/").body(())?.into_parts();

		parts.extensions.insert(ann());

		let CurrentUser(user) = CurrentUser::from_request_parts(&mut parts, &()).await?;

		testing::assert_eq!(user.map(|user| user.name), Some(String::from("Ann")));

		let Authenticated(user) = Authenticated::from_request_parts(&mut parts, &()).await?;

		testing::assert_eq!(user.id, UserID(1));

		Ok(())
	}
}
