use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::registry::DependentRegistry;

/// When scalar field choices reach the record store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Each scalar overwrite is written as soon as it is chosen.
    #[default]
    Immediate,
    /// Scalar overwrites are held and written as one update at finalization.
    /// Collection item actions are always immediate.
    Staged,
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Immediate => "immediate",
            Self::Staged => "staged",
        })
    }
}

/// Configuration for merge sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// How scalar choices are committed.
    pub commit_mode: CommitMode,
    /// Buffer size of the status channel. Slow subscribers lag past this.
    pub status_capacity: usize,
    /// Dependent tables consulted by finalization.
    pub registry: DependentRegistry,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            commit_mode: CommitMode::Immediate,
            status_capacity: 256,
            registry: DependentRegistry::standard(),
        }
    }
}

impl MergeConfig {
    /// Default configuration with scalar writes deferred to finalization.
    pub fn staged() -> Self {
        Self {
            commit_mode: CommitMode::Staged,
            ..Default::default()
        }
    }

    pub fn from_toml_str(input: &str) -> MergeResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| MergeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> MergeResult<Self> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| MergeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> MergeResult<String> {
        toml::to_string_pretty(self).map_err(|e| MergeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> MergeResult<()> {
        if self.status_capacity == 0 {
            return Err(MergeError::Config(
                "status_capacity must be at least 1".into(),
            ));
        }
        self.registry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DependentAction;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = MergeConfig::from_toml_str("").unwrap();
        assert_eq!(config, MergeConfig::default());
        assert_eq!(config.commit_mode, CommitMode::Immediate);
    }

    #[test]
    fn registry_override() {
        let config = MergeConfig::from_toml_str(
            r#"
            commit_mode = "staged"
            status_capacity = 8

            [[registry]]
            table = "interactions"
            column = "contact_id"

            [[registry]]
            table = "keep_in_touch"
            column = "contact_id"
            action = "purge"
            "#,
        )
        .unwrap();
        assert_eq!(config.commit_mode, CommitMode::Staged);
        assert_eq!(config.status_capacity, 8);
        assert_eq!(config.registry.len(), 2);
        assert_eq!(config.registry.entries()[1].action, DependentAction::Purge);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = MergeConfig::from_toml_str("status_capacity = 0").unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
    }

    #[test]
    fn unknown_commit_mode_is_rejected() {
        assert!(MergeConfig::from_toml_str(r#"commit_mode = "lazy""#).is_err());
    }

    #[test]
    fn load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge.toml");
        let config = MergeConfig::staged();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(MergeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = MergeConfig::load(Path::new("/nonexistent/merge.toml")).unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
    }
}
