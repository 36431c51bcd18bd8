//! Request logging built on the [`Trace`] middleware from [`tower_http`].
//!
//! Every request gets its own span carrying a random request ID, the client address and whether
//! the request came with a session cookie. Once the response is ready, the span is completed with
//! the status, the latency and, if the [session middleware] resolved one, the logged-in user.
//! Rejected requests (`401` / `403`) are reported to the audit log.
//!
//! The configured layer contains unique function types and cannot be named, which is why
//! [`layer!()`] expands to the expression instead of a function returning it.
//!
//! [`Trace`]: tower_http::trace::Trace
//! [session middleware]: crate::middleware::session

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::Response;
use tower_http::classify::ServerErrorsFailureClass;
use uuid::Uuid;

use crate::authorization::UserID;
use crate::sessions;

/// Creates a middleware that will log incoming HTTP requests.
macro_rules! layer {
	() => {
		::tower_http::trace::TraceLayer::new_for_http()
			.make_span_with($crate::middleware::logging::make_span)
			.on_response($crate::middleware::logging::on_response)
			.on_failure($crate::middleware::logging::on_failure)
	};
}

pub(crate) use layer;

/// Opens the span for a request.
pub(crate) fn make_span(request: &Request) -> tracing::Span {
	let client = request
		.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map(|ConnectInfo(addr)| addr.ip().to_string());

	tracing::info_span! {
		target: "warden::http",
		"request",
		request.id = %Uuid::new_v4(),
		request.client = client.as_deref().unwrap_or("unknown"),
		request.method = %request.method(),
		request.path = request.uri().path(),
		session = sessions::has_session_cookie(request.headers()),
		user.id = tracing::field::Empty,
		response.status = tracing::field::Empty,
		latency = tracing::field::Empty,
	}
}

/// Completes the request span.
pub(crate) fn on_response(response: &Response, latency: Duration, span: &tracing::Span) {
	let status = response.status();

	span.record("response.status", status.as_u16())
		.record("latency", format_args!("{latency:?}"));

	if let Some(user_id) = response.extensions().get::<UserID>() {
		span.record("user.id", **user_id);
	}

	if is_rejection(status) {
		tracing::info!(target: "warden::audit_log", parent: span, %status, "request rejected");
	}
}

/// Reports server errors.
pub(crate) fn on_failure(failure: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span) {
	match failure {
		ServerErrorsFailureClass::Error(error) => {
			tracing::error!(target: "warden::audit_log", parent: span, %error, ?latency, "request failed");
		}
		ServerErrorsFailureClass::StatusCode(status) => {
			tracing::error!(target: "warden::audit_log", parent: span, %status, ?latency, "request failed");
		}
	}
}

/// Whether `status` means the caller was not allowed to do what they asked for.
fn is_rejection(status: StatusCode) -> bool {
	matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
	use std::convert::Infallible;

	use axum::body::Body;
	use axum::http::header;
	use axum::response::IntoResponse;
	use tower::{service_fn, Layer, ServiceExt};

	use super::*;
	use crate::sessions::COOKIE_NAME;
	use crate::testing;

	#[test]
	fn only_authorization_failures_are_rejections() -> anyhow::Result<()> {
		testing::assert!(is_rejection(StatusCode::UNAUTHORIZED));
		testing::assert!(is_rejection(StatusCode::FORBIDDEN));
		testing::assert!(!is_rejection(StatusCode::NOT_FOUND));
		testing::assert!(!is_rejection(StatusCode::INTERNAL_SERVER_ERROR));

		Ok(())
	}

	#[tokio::test]
	async fn layer_passes_responses_through() -> anyhow::Result<()> {
		let service = layer!().layer(service_fn(|_: Request| async {
			let mut response = StatusCode::FORBIDDEN.into_response();

			response.extensions_mut().insert(UserID(7));

			Ok::<_, Infallible>(response)
		}));

		let request = axum::http::Request::builder()
			.uri("/me")
			.header(header::COOKIE, format!("{COOKIE_NAME}=garbage"))
			.body(Body::empty())?;

		let response = service.oneshot(request).await?;

		testing::assert_eq!(response.status(), StatusCode::FORBIDDEN);
		testing::assert_eq!(response.extensions().get::<UserID>(), Some(&UserID(7)));

		Ok(())
	}
}
