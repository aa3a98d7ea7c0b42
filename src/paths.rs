//! Centralized path resolution. `TASKTREE_HOME` overrides the base
//! directory, which otherwise is `$HOME/.tasktree`.

use std::path::PathBuf;

pub fn home_dir() -> PathBuf {
    match std::env::var_os("TASKTREE_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
            PathBuf::from(home).join(".tasktree")
        }
    }
}

pub fn config_path() -> PathBuf {
    home_dir().join("config.toml")
}

pub fn default_db_path() -> PathBuf {
    home_dir().join("tasks.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_home_dir() {
        let home = home_dir();
        assert_eq!(config_path(), home.join("config.toml"));
        assert_eq!(default_db_path(), home.join("tasks.db"));
    }
}
