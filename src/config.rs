use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::paths;

/// Application settings, passed explicitly to the store and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// What `rm` does with children when neither flag is given.
    pub cascade_delete: bool,
    /// Priority name given to new tasks that name none.
    pub default_priority: Option<String>,
    /// Status name given to new tasks that name none.
    pub default_status: Option<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            cascade_delete: true,
            default_priority: Some("Medium".into()),
            default_status: Some("Not Started".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub create_missing_attributes: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            create_missing_attributes: true,
        }
    }
}

impl Config {
    /// Load config from `$TASKTREE_HOME/config.toml`.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        for (key, value) in [
            ("default_priority", &self.tasks.default_priority),
            ("default_status", &self.tasks.default_status),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                bail!(
                    "failed to parse {}: tasks.{key} must not be empty",
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Database location: `cli_override`, then `database.path`, then the
    /// default under the tasktree home directory.
    pub fn db_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.database.path.clone())
            .unwrap_or_else(paths::default_db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_returns_default() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.tasks.cascade_delete);
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn parse_full_config() {
        let f = write_config(
            r#"
[database]
path = "/tmp/tasks.db"
busy_timeout_ms = 250

[tasks]
cascade_delete = false
default_priority = "Low"
default_status = "Backlog"

[import]
create_missing_attributes = false
"#,
        );
        let config = Config::load_from(f.path()).unwrap();
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/tasks.db")));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(!config.tasks.cascade_delete);
        assert_eq!(config.tasks.default_priority.as_deref(), Some("Low"));
        assert_eq!(config.tasks.default_status.as_deref(), Some("Backlog"));
        assert!(!config.import.create_missing_attributes);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let f = write_config("[tasks]\ncascade_delete = false\n");
        let config = Config::load_from(f.path()).unwrap();
        assert!(!config.tasks.cascade_delete);
        assert_eq!(config.tasks.default_priority.as_deref(), Some("Medium"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let f = write_config("[tasks]\ncascade = true\n");
        assert!(Config::load_from(f.path()).is_err());
    }

    #[test]
    fn empty_default_name_is_rejected() {
        let f = write_config("[tasks]\ndefault_status = \"  \"\n");
        let err = Config::load_from(f.path()).unwrap_err();
        assert!(err.to_string().contains("default_status"));
    }

    #[test]
    fn db_path_precedence() {
        let mut config = Config::default();
        assert_eq!(config.db_path(None), paths::default_db_path());
        config.database.path = Some(PathBuf::from("/data/a.db"));
        assert_eq!(config.db_path(None), PathBuf::from("/data/a.db"));
        assert_eq!(
            config.db_path(Some(Path::new("/cli/b.db"))),
            PathBuf::from("/cli/b.db")
        );
    }
}
