//! Configuration loading from `~/.memsync/config.toml` with defaults.

use memsync_types::config::MemorySyncConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".memsync")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
///
/// A missing, unreadable or malformed file is logged and yields
/// `MemorySyncConfig::default()`.
pub fn load_config(path: Option<&Path>) -> MemorySyncConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return MemorySyncConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<MemorySyncConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                MemorySyncConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            MemorySyncConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path().join("absent.toml").as_path()));
        assert_eq!(config.sync.workers, 2);
        assert!(config.generator.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
data_dir = "/var/lib/memsync"

[sync]
workers = 4

[graph]
enabled = false

[generator]
model = "llama3"
base_url = "http://localhost:11434/v1"
"#
        )
        .unwrap();

        let config = load_config(Some(path.as_path()));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/memsync"));
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.sync.queue_capacity, 64);
        assert!(!config.graph.enabled);
        assert_eq!(config.graph_path(), PathBuf::from("/var/lib/memsync/graph.db"));
        let generator = config.generator.unwrap();
        assert_eq!(generator.model, "llama3");
        assert_eq!(generator.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.search.snippet_chars, 200);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\nworkers = ").unwrap();
        let config = load_config(Some(path.as_path()));
        assert_eq!(config.sync.workers, 2);
    }

    #[test]
    fn test_default_path() {
        assert!(default_config_path().ends_with(".memsync/config.toml"));
    }
}
