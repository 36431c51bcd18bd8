//! A [`tower::Service`] resolving the logged-in user of every request.
//!
//! The middleware fetches the request's session and, if it carries an [external ID], looks up the
//! matching active user. The user is then inserted into the request's extensions, where it can
//! be picked up by the [`CurrentUser`] and [`Authenticated`] extractors.
//!
//! If the session points to a user that does not exist anymore, or has been deactivated, the
//! external ID is removed from the session and the request proceeds anonymously. The updated
//! session cookie is attached to the response.
//!
//! The ID of the resolved user is also attached to the response's extensions, so the
//! [request logs] can include it.
//!
//! Failures of the session store or the database abort the request with
//! `500 Internal Server Error`.
//!
//! [external ID]: crate::authorization::ExternalID
//! [request logs]: crate::middleware::logging
//! [`CurrentUser`]: crate::authorization::CurrentUser
//! [`Authenticated`]: crate::authorization::Authenticated

use std::fmt;
use std::task::{self, Poll};

use axum::extract::Request;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;

use crate::authorization::Authorization;
use crate::database::Database;
use crate::sessions::SessionStore;

/// A layer producing the [`SessionMiddleware`] middleware.
pub struct SessionLayer<D, S> {
	/// The authorization core.
	auth: Authorization<D, S>,
}

impl<D, S> SessionLayer<D, S> {
	/// Creates a new [`SessionLayer`].
	pub fn new(auth: Authorization<D, S>) -> Self {
		Self { auth }
	}
}

impl<D, S> Clone for SessionLayer<D, S> {
	fn clone(&self) -> Self {
		Self {
			auth: self.auth.clone(),
		}
	}
}

impl<D, S> fmt::Debug for SessionLayer<D, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionLayer").finish_non_exhaustive()
	}
}

impl<Svc, D, S> tower::Layer<Svc> for SessionLayer<D, S> {
	type Service = SessionMiddleware<Svc, D, S>;

	fn layer(&self, inner: Svc) -> Self::Service {
		SessionMiddleware {
			auth: self.auth.clone(),
			inner,
		}
	}
}

/// A middleware for resolving the logged-in user.
///
/// You can create an instance of this service using [`SessionLayer`].
pub struct SessionMiddleware<Svc, D, S> {
	/// The authorization core.
	auth: Authorization<D, S>,

	/// The inner service.
	inner: Svc,
}

impl<Svc, D, S> Clone for SessionMiddleware<Svc, D, S>
where
	Svc: Clone,
{
	fn clone(&self) -> Self {
		Self {
			auth: self.auth.clone(),
			inner: self.inner.clone(),
		}
	}
}

impl<Svc, D, S> fmt::Debug for SessionMiddleware<Svc, D, S>
where
	Svc: fmt::Debug,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionMiddleware")
			.field("inner", &self.inner)
			.finish_non_exhaustive()
	}
}

impl<Svc, D, S> tower::Service<Request> for SessionMiddleware<Svc, D, S>
where
	Svc: tower::Service<Request, Response = Response> + Clone + Send + 'static,
	Svc::Future: Send,
	D: Database,
	S: SessionStore,
{
	type Response = Response;
	type Error = Svc::Error;
	type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request) -> Self::Future {
		let auth = self.auth.clone();

		// the clone might not be ready yet; keep the instance `poll_ready()` was called on
		let clone = self.inner.clone();
		let inner = std::mem::replace(&mut self.inner, clone);

		Box::pin(svc_impl(auth, inner, req))
	}
}

/// The relevant implementation of `<SessionMiddleware as tower::Service>::call()`.
#[tracing::instrument(level = "debug", name = "middleware::session", skip_all)]
async fn svc_impl<Svc, D, S>(
	auth: Authorization<D, S>,
	mut inner: Svc,
	mut req: Request,
) -> Result<Response, Svc::Error>
where
	Svc: tower::Service<Request, Response = Response> + Clone + Send + 'static,
	Svc::Future: Send,
	D: Database,
	S: SessionStore,
{
	let resolved = match auth.resolve(req.headers()).await {
		Ok(resolved) => resolved,
		Err(error) => return Ok(error.into_response()),
	};

	let user_id = resolved.user.as_ref().map(|user| user.id);

	if let Some(user) = resolved.user {
		tracing::trace!(user.id = %user.id, "inserting user into request extensions");
		req.extensions_mut().insert(user);
	}

	let mut response = inner.call(req).await?;

	if let Some(user_id) = user_id {
		response.extensions_mut().insert(user_id);
	}

	if let Some(cookie) = resolved.cookie {
		match cookie.header_value() {
			Ok(cookie) => {
				response.headers_mut().append(header::SET_COOKIE, cookie);
			}
			Err(error) => return Ok(error.into_response()),
		}
	}

	Ok(response)
}
