//! Configuration lookup and the `config` command.
//!
//! Without `--config`, `./stackup.toml` is used when present, then
//! `<user config dir>/stackup/stackup.toml`.

use anyhow::{Context, Result};
use stackup_core::config::Config;
use stackup_core::report::exit;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

const FILE_NAME: &str = "stackup.toml";

/// Pick the configuration file to load.
pub fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if Path::new(FILE_NAME).exists() {
        return Some(PathBuf::from(FILE_NAME));
    }
    user_config_path().filter(|path| path.exists())
}

/// `~/.config/stackup/stackup.toml` on Linux, the platform equivalent elsewhere.
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stackup").join(FILE_NAME))
}

/// Load and validate the configuration.
pub fn load(path: Option<&Path>) -> Result<Config> {
    Config::load(path)
        .map_err(anyhow::Error::from)
        .with_context(|| match path {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration from the environment".to_string(),
        })
}

pub fn execute(path: Option<&Path>, format: OutputFormat) -> Result<i32> {
    let cfg = load(path)?.redacted();

    match format {
        OutputFormat::Table => {
            output::print_header("Configuration");
            output::print_detail(
                "Source",
                &path.map_or_else(|| "environment".to_string(), |p| p.display().to_string()),
            );
            output::print_detail(
                "Database",
                &format!(
                    "{}@{}:{}/{}",
                    cfg.database.user, cfg.database.host, cfg.database.port, cfg.database.name
                ),
            );
            output::print_detail("Cache", &format!("{}:{}", cfg.cache.host, cfg.cache.port));
            output::print_detail("Health URL", &cfg.app.health_url());
            output::print_detail("Verify URL", &cfg.app.verify_url());
            output::print_detail(
                "Migration",
                &match &cfg.migration.command {
                    Some(command) => format!("{} {}", command, cfg.migration.args.join(" ")),
                    None => "none".to_string(),
                },
            );
            output::print_detail(
                "Retry",
                &format!(
                    "{} attempts, {:?} apart, {:?} deadline, {:?} per attempt",
                    cfg.retry.max_attempts,
                    cfg.retry.delay,
                    cfg.retry.deadline,
                    cfg.retry.attempt_timeout
                ),
            );
            if let Some(deadline) = cfg.run.deadline {
                output::print_detail("Run deadline", &format!("{:?}", deadline));
            }
            output::print_detail("Extra services", &cfg.services.len().to_string());
            output::print_detail(
                "Metrics",
                if cfg.metrics.enabled { "enabled" } else { "disabled" },
            );
        }
        _ => output::print_item(&cfg, format)?,
    }

    Ok(exit::SUCCESS)
}
