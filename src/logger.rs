use std::sync::Arc;

use crate::routines::settings::Settings;
use anyhow::{Context, Result};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for the library
///
/// This function sets up logging for the library. It uses the `tracing`
/// crate, and the `tracing-subscriber` crate for formatting.
///
/// The log level is defined in the configuration bundle, and defaults to `INFO`.
///
/// Log messages are written to stdout, and additionally to a log file if one
/// is specified in the configuration.
pub fn setup_log(settings: &Settings) -> Result<()> {
    let env_filter = EnvFilter::new(&settings.log.level);
    let subscriber = Registry::default().with(env_filter);

    // Define layer for an optional log file
    let file_layer = match &settings.log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            let layer = fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_timer(CompactTimestamp);
            Some(layer)
        }
        None => None,
    };

    // Define layer for stdout
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(CompactTimestamp);

    // Combine layers with subscriber
    subscriber
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .context("failed to initialize the tracing subscriber")?;

    tracing::debug!("Logging is configured with level: {}", settings.log.level);
    Ok(())
}

#[derive(Clone)]
struct CompactTimestamp;

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S"))
    }
}
