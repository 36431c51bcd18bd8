//! Trace capturing facilities.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// The filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "warden=info,warn";

/// Initializes [`tracing-subscriber`].
///
/// Logs are always written to stderr, and additionally to daily rotated files in `log_dir`, if
/// specified.
///
/// NOTE: the returned [`WorkerGuard`] flushes pending file logs when dropped, which means it has
/// to stay alive until the program exits!
///
/// [`tracing-subscriber`]: tracing_subscriber
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
	let (files, guard) = match log_dir {
		None => (None, None),
		Some(log_dir) => {
			let (layer, guard) = files(log_dir).context("initialize files tracing layer")?;
			(Some(layer), Some(guard))
		}
	};

	tracing_subscriber::registry()
		.with(stderr())
		.with(files)
		.init();

	tracing::info!("initialized tracing");

	Ok(guard)
}

/// Reads the filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
fn filter() -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Creates a tracing layer that will emit logs to stderr.
fn stderr<S>() -> impl Layer<S>
where
	S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
	tracing_subscriber::fmt::layer()
		.pretty()
		.with_ansi(true)
		.with_file(true)
		.with_level(true)
		.with_line_number(true)
		.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
		.with_target(true)
		.with_thread_names(true)
		.with_writer(io::stderr)
		.with_filter(filter())
}

/// Creates a tracing layer that will emit logs to files in `log_dir`.
///
/// The returned [`WorkerGuard`] must be kept alive so it can perform cleanup when the application
/// shuts down.
fn files<S>(log_dir: &Path) -> anyhow::Result<(impl Layer<S>, WorkerGuard)>
where
	S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
	if !log_dir.exists() {
		fs::create_dir_all(log_dir).context("create log dir")?;
	}

	let log_dir = log_dir.canonicalize().context("canonicalize log dir path")?;

	let (writer, guard) = tracing_appender::rolling::Builder::new()
		.rotation(Rotation::DAILY)
		.filename_prefix("warden")
		.filename_suffix("log")
		.build(&log_dir)
		.map(tracing_appender::non_blocking)
		.context("failed to initialize logger")?;

	let layer = tracing_subscriber::fmt::layer()
		.compact()
		.with_ansi(false)
		.with_file(true)
		.with_level(true)
		.with_line_number(true)
		.with_span_events(FmtSpan::FULL)
		.with_target(true)
		.with_thread_names(true)
		.with_writer(writer)
		.with_filter(filter());

	Ok((layer, guard))
}
