//! Office configuration loaded from `taskfloor.toml`.
//!
//! Values missing from the file fall back to defaults. The
//! `TASKFLOOR_MONITOR_INTERVAL_MS` environment variable takes precedence
//! over the file for the sweep interval.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

pub const CONFIG_FILE: &str = "taskfloor.toml";
pub const MONITOR_INTERVAL_ENV: &str = "TASKFLOOR_MONITOR_INTERVAL_MS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeConfig {
    /// Period of the asset sweep, in milliseconds.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Timeout handed to managed objects built through
    /// [`OfficeBuilder::managed_object`](crate::office::OfficeBuilder::managed_object).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub teams: HashMap<String, TeamConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    Passive,
    OnePerson,
    WorkerPool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub kind: TeamKind,

    /// Concurrency cap of a worker pool; ignored by other kinds.
    #[serde(default = "default_team_size")]
    pub size: usize,
}

fn default_monitor_interval_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_team_size() -> usize {
    4
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: default_monitor_interval_ms(),
            default_timeout_ms: default_timeout_ms(),
            teams: HashMap::new(),
        }
    }
}

impl OfficeConfig {
    /// Loads `taskfloor.toml` from the working directory, or defaults when
    /// there is none.
    pub fn load() -> Result<Self, RuntimeError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, RuntimeError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<OfficeConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(value) = std::env::var(MONITOR_INTERVAL_ENV) {
            config.monitor_interval_ms = value.trim().parse().map_err(|_| {
                RuntimeError::Config(format!("{MONITOR_INTERVAL_ENV} must be a number of milliseconds, got '{value}'"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.monitor_interval_ms == 0 {
            return Err(RuntimeError::Config("monitor_interval_ms must be positive".into()));
        }
        for (name, team) in &self.teams {
            if team.kind == TeamKind::WorkerPool && team.size == 0 {
                return Err(RuntimeError::Config(format!("worker pool team '{name}' needs a size of at least 1")));
            }
        }
        Ok(())
    }

    /// Adds (or replaces) a team definition.
    pub fn with_team(mut self, name: impl Into<String>, kind: TeamKind, size: usize) -> Self {
        self.teams.insert(name.into(), TeamConfig { kind, size });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = OfficeConfig::default();
        assert_eq!(config.monitor_interval_ms, 100);
        assert_eq!(config.default_timeout_ms, 10_000);
        assert!(config.teams.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            default_timeout_ms = 500

            [teams.io]
            kind = "worker_pool"
            size = 8

            [teams.inline]
            kind = "passive"
        "#;
        let config: OfficeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.monitor_interval_ms, 100);
        assert_eq!(config.default_timeout_ms, 500);
        assert_eq!(config.teams["io"].kind, TeamKind::WorkerPool);
        assert_eq!(config.teams["io"].size, 8);
        assert_eq!(config.teams["inline"].kind, TeamKind::Passive);
        assert_eq!(config.teams["inline"].size, 4);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[teams.solo]\nkind = \"one_person\"").unwrap();

        let config = OfficeConfig::load_from(file.path()).unwrap();
        assert_eq!(config.teams["solo"].kind, TeamKind::OnePerson);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OfficeConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.default_timeout_ms, 10_000);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "monitor_interval_ms = \"fast\"").unwrap();

        let err = OfficeConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Toml(_)));
    }

    #[test]
    fn empty_worker_pool_is_rejected() {
        let config = OfficeConfig::default().with_team("pool", TeamKind::WorkerPool, 0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool"));
    }
}
