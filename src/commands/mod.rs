pub mod fields;
pub mod locate;
pub mod parse;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use thermalog::LogParsingConfig;
use tracing::info;

use crate::util::{print_json_pretty, write_json_pretty};

pub fn load_config(config_path: Option<&Path>) -> Result<LogParsingConfig> {
    match config_path {
        Some(path) => {
            let config = LogParsingConfig::from_json_path(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            info!(path = %path.display(), fields = config.fields().len(), "loaded parsing config");
            Ok(config)
        }
        None => LogParsingConfig::standard().context("failed to build built-in parsing config"),
    }
}

/// Writes `value` to `output_path`, or to stdout when no path is given.
pub fn emit<T: Serialize>(value: &T, output_path: Option<&Path>) -> Result<()> {
    match output_path {
        Some(path) => {
            write_json_pretty(path, value)?;
            info!(path = %path.display(), "wrote report");
            Ok(())
        }
        None => print_json_pretty(value),
    }
}
