//! Initialisation du logging
//!
//! Console et/ou fichier journalier sous `<data_dir>/logs`, selon la section
//! `host.logger` de la configuration. `RUST_LOG` remplace le niveau configuré.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wfbconfig::Config;

const LOG_FILE_PREFIX: &str = "wfbmusic.log";
const CRATES: [&str; 5] = ["WFBMusic", "wfbsource", "wfbplatforms", "wfbcache", "wfbplayer"];

/// Installe le subscriber global
///
/// Le guard renvoyé doit vivre jusqu'à la fin du programme pour que le
/// fichier soit vidé.
pub fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "INFO".to_string())
        .to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
        directives.push("warn".to_string());
        EnvFilter::new(directives.join(","))
    });

    let console_layer = config
        .get_log_enable_console()
        .unwrap_or(true)
        .then(|| fmt::layer().with_target(false));

    let (file_layer, guard) = if config.get_log_to_file().unwrap_or(false) {
        let log_dir = config.get_data_dir()?.join("logs");
        std::fs::create_dir_all(&log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
