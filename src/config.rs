//! Module containing the [`Config`] struct.

use std::env;
use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use derive_more::Debug;
use url::Url;

/// The name of the group that is granted every registered permission, unless overridden by
/// `WARDEN_SUPERUSER_GROUP`.
pub const DEFAULT_SUPERUSER_GROUP: &str = "Super users";

/// Configuration values.
///
/// These are read from the environment on startup.
#[derive(Debug, Clone)]
pub struct Config {
	/// The ip address and port the HTTP server is going to listen on.
	#[debug("{addr}")]
	pub addr: SocketAddr,

	/// The database URL to connect to.
	#[debug("{}", database_url.host_str().unwrap_or("*****"))]
	pub database_url: Url,

	/// The `Domain` value to be used in session cookies.
	pub cookie_domain: String,

	/// The name of the distinguished group that receives every permission.
	pub superuser_group: String,

	/// Directory to write log files to, if any.
	pub log_dir: Option<PathBuf>,
}

impl Config {
	/// Creates a new [`Config`] object by reading from the environment.
	pub fn new() -> anyhow::Result<Self> {
		let ip_addr = parse_from_env_opt("WARDEN_IP")?.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
		let port = parse_from_env("WARDEN_PORT")?;
		let addr = SocketAddr::new(ip_addr, port);
		let database_url = parse_from_env("DATABASE_URL")?;
		let cookie_domain = parse_from_env("WARDEN_COOKIE_DOMAIN")?;
		let superuser_group = parse_from_env_opt("WARDEN_SUPERUSER_GROUP")?
			.unwrap_or_else(|| String::from(DEFAULT_SUPERUSER_GROUP));
		let log_dir = parse_from_env_opt("WARDEN_LOG_DIR")?;

		Ok(Self {
			addr,
			database_url,
			cookie_domain,
			superuser_group,
			log_dir,
		})
	}
}

/// Parses an environment variable into a `T`.
fn parse_from_env<T>(var: &str) -> anyhow::Result<T>
where
	T: FromStr,
	T::Err: StdError + Send + Sync + 'static,
{
	let value = env::var(var).with_context(|| format!("missing `{var}` environment variable"))?;

	if value.is_empty() {
		anyhow::bail!("`{var}` cannot be empty");
	}

	<T as FromStr>::from_str(&value).with_context(|| format!("failed to parse `{var}`"))
}

/// Parses an environment variable into an `Option<T>`, returning `None` if the variable is not
/// set or empty.
fn parse_from_env_opt<T>(var: &str) -> anyhow::Result<Option<T>>
where
	T: FromStr,
	T::Err: StdError + Send + Sync + 'static,
{
	let Some(value) = env::var(var).ok() else {
		return Ok(None);
	};

	if value.is_empty() {
		return Ok(None);
	}

	<T as FromStr>::from_str(&value)
		.map(Some)
		.with_context(|| format!("failed to parse `{var}`"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;

	#[test]
	fn optional_values_treat_empty_as_unset() -> anyhow::Result<()> {
		env::set_var("WARDEN_TEST_EMPTY", "");

		let value = parse_from_env_opt::<String>("WARDEN_TEST_EMPTY")?;

		testing::assert!(value.is_none());
		testing::assert!(parse_from_env::<String>("WARDEN_TEST_EMPTY").is_err());

		Ok(())
	}

	#[test]
	fn parse_errors_name_the_variable() -> anyhow::Result<()> {
		env::set_var("WARDEN_TEST_PORT", "not-a-port");

		let error = parse_from_env::<u16>("WARDEN_TEST_PORT").unwrap_err();

		testing::assert!(format!("{error:#}").contains("WARDEN_TEST_PORT"));

		Ok(())
	}
}
