#![doc = include_str!("../README.md")]
// TODO: remove once https://github.com/tokio-rs/tracing/issues/2912 lands
#![allow(clippy::blocks_in_conditions)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::extract::ConnectInfo;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;

mod error;
pub use error::{Error, ErrorKind, Result};

mod config;
pub use config::{Config, DEFAULT_SUPERUSER_GROUP};

mod make_id;
mod faults;

#[cfg(test)]
mod testing;

pub mod authorization;
pub mod database;
pub mod sessions;
pub mod middleware;
pub mod handlers;

use authorization::{Authorization, RoleRegistry, Roles};
use database::mysql::MySqlDatabase;
use sessions::mysql::MySqlSessionStore;
use sessions::SessionManager;

/// Permissions registered by the `warden` server on startup.
pub const BUILTIN_PERMISSIONS: &[(&str, &str)] = &[
	("users.view", "View users"),
	("users.manage", "Activate and deactivate users"),
	("permissions.manage", "Grant and revoke permissions"),
];

#[allow(clippy::missing_docs_in_private_items)]
type Server = axum::serve::Serve<
	IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
	axum::middleware::AddExtension<Router, ConnectInfo<SocketAddr>>,
>;

/// Run the server.
///
/// This function will not exit until a SIGINT signal is received.
/// If you want to supply a custom signal for graceful shutdown, use [`run_until()`] instead.
pub async fn run(config: Config) -> anyhow::Result<()> {
	server(config)
		.await
		.context("build http server")?
		.with_graceful_shutdown(sigint())
		.await
		.context("run http server")
}

/// Run the server until a given future completes.
///
/// This function is the same as [`run()`], except that it also waits for the provided `until`
/// future, and shuts down the server when that future resolves.
pub async fn run_until<Until>(config: Config, until: Until) -> anyhow::Result<()>
where
	Until: Future<Output = ()> + Send + 'static,
{
	server(config)
		.await
		.context("build http server")?
		.with_graceful_shutdown(async move {
			tokio::select! {
				() = until => {}
				() = sigint() => {}
			}
		})
		.await
		.context("run http server")
}

/// Runs the necessary setup and returns a future that will run the server when polled.
///
/// See [`run()`] and [`run_until()`].
async fn server(config: Config) -> anyhow::Result<Server> {
	tracing::debug!(addr = %config.addr, "establishing TCP connection");

	let tcp_listener = TcpListener::bind(config.addr)
		.await
		.context("bind tcp socket")?;

	let addr = tcp_listener.local_addr().context("get tcp addr")?;

	tracing::info!(%addr, prod = cfg!(feature = "production"), "listening for requests");

	let database = MySqlDatabase::connect(&config.database_url)
		.await
		.context("connect to database")?;

	database.migrate().await.context("run migrations")?;

	let session_store = MySqlSessionStore::new(database.pool().clone());
	let expired = session_store
		.delete_expired()
		.await
		.context("delete expired sessions")?;

	tracing::debug!(amount = expired, "deleted expired sessions");

	let sessions = SessionManager::new(session_store, config.cookie_domain);
	let roles = Arc::new(Roles::new()) as Arc<dyn RoleRegistry>;
	let auth = Authorization::configure(database, sessions, roles, &config.superuser_group)
		.await
		.context("configure authorization")?;

	for &(code, name) in BUILTIN_PERMISSIONS {
		auth.add_permission(code, name)
			.await
			.with_context(|| format!("register permission `{code}`"))?;
	}

	tracing::debug!("initializing HTTP service");

	let service = handlers::router(auth)
		.layer(middleware::logging::layer!())
		.into_make_service_with_connect_info::<SocketAddr>();

	Ok(axum::serve(tcp_listener, service))
}

/// Waits for a SIGINT signal from the operating system.
#[tracing::instrument(name = "runtime::signals")]
async fn sigint() {
	let signal_result = signal::ctrl_c().await;

	if let Err(err) = signal_result {
		tracing::error!(target: "warden::audit_log", "failed to receive SIGINT: {err}");
	} else {
		tracing::warn!(target: "warden::audit_log", "received SIGINT; shutting down...");
	}
}
