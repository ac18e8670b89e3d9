//! Configuration loading (spec §6.2).
//!
//! Resolution order for the config file, mirroring the teacher's
//! `jobstore::resolve_root` XDG-style chain:
//!   1. `--config` CLI flag
//!   2. `RUNNER_CONFIG` environment variable
//!   3. `$XDG_CONFIG_HOME/script-runner/config.toml`
//!   4. `~/.config/script-runner/config.toml`
//!
//! Loading and validating this file is an external concern relative to the
//! runner itself — the runner only ever sees the parsed, immutable [`Config`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;

use crate::schema::ScriptEntry;

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    pub max_concurrent: usize,
    #[serde(default = "default_mode")]
    pub default_mode: String,
    pub max_log_bytes_per_stream: u64,
    pub preview_max_bytes: u64,
    pub job_store_file: PathBuf,
    pub logs_dir: PathBuf,
}

fn default_mode() -> String {
    "async".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub runner: RunnerSection,
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
}

/// Resolve the config file path following the priority chain.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    if let Some(p) = cli_path {
        return PathBuf::from(p);
    }

    if let Ok(p) = std::env::var("RUNNER_CONFIG")
        && !p.is_empty()
    {
        return PathBuf::from(p);
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("script-runner").join("config.toml");
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs
            .home_dir()
            .join(".config")
            .join("script-runner")
            .join("config.toml");
    }

    PathBuf::from("~/.config/script-runner/config.toml")
}

impl Config {
    pub fn load(cli_path: Option<&str>) -> Result<Self> {
        let path = resolve_config_path(cli_path);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.runner.max_concurrent > 0,
            "runner.max_concurrent must be > 0"
        );
        anyhow::ensure!(
            self.runner.default_mode == "sync" || self.runner.default_mode == "async",
            "runner.default_mode must be \"sync\" or \"async\""
        );
        let mut seen = std::collections::HashSet::new();
        for script in &self.scripts {
            anyhow::ensure!(
                seen.insert(script.id.clone()),
                "duplicate script id: {}",
                script.id
            );
            // Compile eagerly so a malformed pattern fails at load time, not
            // on the first submit.
            regex::Regex::new(&script.args.item_pattern)
                .with_context(|| format!("script {}: invalid itemPattern regex", script.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_config_path_cli_flag_wins() {
        let p = resolve_config_path(Some("/tmp/my-config.toml"));
        assert_eq!(p, PathBuf::from("/tmp/my-config.toml"));
    }

    #[test]
    fn resolve_config_path_env_var() {
        // SAFETY: test-only; not running in parallel with other env-mutating tests.
        unsafe {
            std::env::set_var("RUNNER_CONFIG", "/tmp/env-config.toml");
            std::env::remove_var("XDG_CONFIG_HOME");
        }
        let p = resolve_config_path(None);
        unsafe {
            std::env::remove_var("RUNNER_CONFIG");
        }
        assert_eq!(p, PathBuf::from("/tmp/env-config.toml"));
    }
}
