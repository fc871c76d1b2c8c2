pub mod run;
pub mod validate;

use pdk_engine::logging::{self, LogConfig, LogFormat};
use pdk_engine::PdkConfig;

/// Install the logging pipeline from configuration plus verbosity flags.
pub fn init_logging(config: &PdkConfig, verbose: bool, quiet: bool) {
    let mut log_config = LogConfig::default();
    if let Some(level) = config.logging.level.as_deref().and_then(logging::parse_level) {
        log_config.level = level;
    }
    if verbose {
        log_config.level = log::LevelFilter::Debug;
    }
    if quiet {
        log_config.level = log::LevelFilter::Warn;
    }
    log_config.file = config.logging.file.clone();
    if let Some(format) = config
        .logging
        .format
        .as_deref()
        .and_then(|f| f.parse::<LogFormat>().ok())
    {
        log_config.format = format;
    }
    logging::init(&log_config);
}

/// Parse repeated `NAME=VALUE` arguments.
pub fn parse_pairs(pairs: &[String], what: &str) -> color_eyre::Result<Vec<(String, String)>> {
    let mut parsed = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                parsed.push((name.to_string(), value.to_string()));
            }
            _ => color_eyre::eyre::bail!(
                "invalid {} '{}'. Expected NAME=VALUE",
                what,
                pair
            ),
        }
    }
    Ok(parsed)
}
