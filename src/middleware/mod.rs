//! HTTP middleware.
//!
//! Middlewares are implemented as [tower services].
//! This means they can integrate with [`axum`], but are also re-usable independently of that.
//!
//! [tower services]: tower::Service

pub(crate) mod logging;

pub mod session;
pub use session::{SessionLayer, SessionMiddleware};
