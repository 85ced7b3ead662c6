//! RON configuration for the `squirrel` binary.
//!
//! Default location is `~/.config/squirrel/config.ron`. Every field is
//! optional:
//!
//! ```ron
//! (
//!     client_dir: "/home/me/.local/share/squirrel",
//!     client_key: "client.json",
//!     cloud_dir: Some("/mnt/dropbox/squirrel"),
//!     cloud_path: "cloud.json",
//!     autocreate: true,
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error in {path}: {source}")]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the client blob.
    pub client_dir: PathBuf,
    /// Name of the client blob inside `client_dir`.
    pub client_key: String,
    /// Directory standing in for the cloud. No cloud when unset.
    pub cloud_dir: Option<PathBuf>,
    /// Name of the cloud stream inside `cloud_dir`.
    pub cloud_path: String,
    /// Create missing parents when playing local edits.
    pub autocreate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_dir: dirs::data_dir()
                .map(|p| p.join("squirrel"))
                .unwrap_or_else(|| PathBuf::from(".squirrel")),
            client_key: "client.json".to_string(),
            cloud_dir: None,
            cloud_path: "cloud.json".to_string(),
            autocreate: false,
        }
    }
}

/// Get the config file path (~/.config/squirrel/config.ron).
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("squirrel").join("config.ron"))
}

impl Config {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        ron::from_str(text).map_err(|source| ConfigError::Ron {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `explicit`, or the default location. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match config_file_path() {
                Some(path) => (path, false),
                None => {
                    debug!("no config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                info!("loaded config from {}", path.display());
                Self::parse(&text, &path)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!("config file not found at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }
}
