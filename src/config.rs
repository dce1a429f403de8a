use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// User overlay location, relative to `$HOME`.
const USER_CONFIG: &str = ".config/opsh/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// ── Final (merged) config types ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub settings: Settings,
    pub logging: Logging,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub prompt: String,
    pub continuation_prompt: String,
    pub queue_capacity: usize,
    pub default_formatter: String,
    pub default_sink: String,
    /// Empty disables history.
    pub history_file: String,
    pub completion_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: String,
    /// Empty logs to stderr only.
    pub file: String,
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    #[serde(default)]
    settings: SettingsOverlay,
    #[serde(default)]
    logging: LoggingOverlay,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsOverlay {
    prompt: Option<String>,
    continuation_prompt: Option<String>,
    queue_capacity: Option<usize>,
    default_formatter: Option<String>,
    default_sink: Option<String>,
    history_file: Option<String>,
    completion_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoggingOverlay {
    level: Option<String>,
    file: Option<String>,
}

/// Expand a leading `~`; empty means unset.
fn expand_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() {
        return None;
    }
    Some(PathBuf::from(shellexpand::tilde(raw).as_ref()))
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Embedded defaults merged with `~/.config/opsh/config.toml`, if it
    /// exists. Scalars set in the overlay replace the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(home) = std::env::var_os("HOME") else {
            return Ok(Self::default_config());
        };
        let path = Path::new(&home).join(USER_CONFIG);
        if !path.exists() {
            return Ok(Self::default_config());
        }
        Self::load_from(&path)
    }

    /// Embedded defaults merged with the overlay at `path`, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let overlay: ConfigOverlay =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::default_config();
        config.apply_overlay(overlay);
        Ok(config)
    }

    /// Apply an overlay on top of this config.
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        let s = overlay.settings;
        if let Some(v) = s.prompt {
            self.settings.prompt = v;
        }
        if let Some(v) = s.continuation_prompt {
            self.settings.continuation_prompt = v;
        }
        if let Some(v) = s.queue_capacity {
            self.settings.queue_capacity = v;
        }
        if let Some(v) = s.default_formatter {
            self.settings.default_formatter = v;
        }
        if let Some(v) = s.default_sink {
            self.settings.default_sink = v;
        }
        if let Some(v) = s.history_file {
            self.settings.history_file = v;
        }
        if let Some(v) = s.completion_timeout_ms {
            self.settings.completion_timeout_ms = v;
        }

        let l = overlay.logging;
        if let Some(v) = l.level {
            self.logging.level = v;
        }
        if let Some(v) = l.file {
            self.logging.file = v;
        }
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        expand_path(&self.settings.history_file)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        expand_path(&self.logging.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("opsh-config-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn default_config_parses() {
        let config = Config::default_config();
        assert_eq!(config.settings.prompt, "opsh> ");
        assert_eq!(config.settings.queue_capacity, 20);
        assert_eq!(config.settings.default_formatter, "text");
        assert_eq!(config.settings.default_sink, "stdout");
        assert_eq!(config.logging.level, "warn");
        assert!(config.log_path().is_none());
    }

    #[test]
    fn overlay_replaces_only_given_scalars() {
        let path = overlay_file(
            "scalars",
            "[settings]\nprompt = \"ops$ \"\nqueue_capacity = 4\n[logging]\nlevel = \"debug\"\n",
        );
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.settings.prompt, "ops$ ");
        assert_eq!(config.settings.queue_capacity, 4);
        assert_eq!(config.settings.continuation_prompt, "...> ");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn empty_overlay_is_defaults() {
        let path = overlay_file("empty", "");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.settings.default_sink, "stdout");
    }

    #[test]
    fn bad_overlay_reports_path() {
        let path = overlay_file("bad", "[settings]\nqueue_capacity = \"many\"\n");
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("opsh-config-"), "{err}");

        let path = overlay_file("unknown", "[settings]\nescalate = true\n");
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_overlay_is_io_error() {
        let err = Config::load_from(Path::new("/nonexistent/opsh.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn paths_expand_tilde() {
        let mut config = Config::default_config();
        config.settings.history_file = "~/h".into();
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(config.history_path(), Some(Path::new(&home).join("h")));
        }
        config.settings.history_file.clear();
        assert_eq!(config.history_path(), None);
    }
}
