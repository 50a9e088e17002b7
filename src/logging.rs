use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "ROOST_LOG";
const DEFAULT_FILTER: &str = "roost=info";

/// Send logs to a daily rolling file in `dir`.
///
/// stdout belongs to the prompt, so nothing is logged there. Keep the returned
/// guard alive for the whole run or buffered lines are lost on exit.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
  let appender = tracing_appender::rolling::daily(dir, "roost.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
