use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".grader";

/// Where the grader socket lives.
///
/// ```toml
/// [endpoint]
/// workdir_env = "GRADER_WORKDIR"
/// socket_name = "sock"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EndpointConfig {
    #[serde(default = "default_workdir_env")]
    pub workdir_env: String,
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
}

/// Command run as the host's save-all before each review.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SaveConfig {
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_workdir_env() -> String {
    "GRADER_WORKDIR".to_string()
}

fn default_socket_name() -> String {
    "sock".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            workdir_env: default_workdir_env(),
            socket_name: default_socket_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub save: SaveConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ClientConfig {
    /// Search upward from `start` for a `.grader/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ClientConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ClientConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
