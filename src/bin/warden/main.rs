use anyhow::Context;

mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	if let Err(error) = dotenvy::dotenv() {
		eprintln!("WARN: failed to load `.env` file: {error}");
	}

	let config = warden::Config::new().context("load configuration")?;
	let _guard = logging::init(config.log_dir.as_deref()).context("initialize tracing")?;

	if cfg!(not(feature = "production")) {
		tracing::warn!("running in development mode");
	}

	warden::run(config).await
}
