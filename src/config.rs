//! Configuration for elohim-remote-store
//!
//! The host node instantiates stores with no arguments, so configuration is
//! resolved from the process environment, optionally layered over a TOML file:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `REMOTE_STORE_API_KEY` | Remote network credential (required) |
//! | `REMOTE_STORE_RPC_URL` | Remote network endpoint |
//! | `REMOTE_STORE_DATA_DIR` | Local directory for index and piece mappings |
//! | `REMOTE_STORE_CONFIG` | Optional TOML file loaded before env overrides |
//! | `REMOTE_STORE_REQUEST_TIMEOUT_SECS` | Transport timeout |

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_KEY: &str = "REMOTE_STORE_API_KEY";
pub const ENV_RPC_URL: &str = "REMOTE_STORE_RPC_URL";
pub const ENV_DATA_DIR: &str = "REMOTE_STORE_DATA_DIR";
pub const ENV_CONFIG: &str = "REMOTE_STORE_CONFIG";
pub const ENV_REQUEST_TIMEOUT: &str = "REMOTE_STORE_REQUEST_TIMEOUT_SECS";

/// Public endpoint used when no RPC URL is configured
pub const DEFAULT_RPC_URL: &str = "https://rpc.elohim.host/storage/v1";

/// Subdirectory holding the query index
pub const INDEX_DIR: &str = "INDEX";

/// Subdirectory holding CID -> piece mappings
pub const PIECES_DIR: &str = "PIECES";

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elohim-remote-store")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Credential for the remote blob network
    #[serde(default)]
    pub api_key: Option<String>,

    /// Remote network RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Root directory for local state
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Timeout applied by the HTTP transport
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            rpc_url: default_rpc_url(),
            storage_dir: default_storage_dir(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve configuration from the process environment.
    ///
    /// A missing credential is not rejected here; it is reported when the
    /// remote client initializes.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = lookup(ENV_CONFIG).map(PathBuf::from);
        Self::layered(file.as_deref(), lookup)
    }

    /// Like [`Config::from_env`], but with the TOML file named explicitly
    pub fn from_env_with_file(file: Option<&Path>) -> Result<Self> {
        Self::layered(file, |key| std::env::var(key).ok())
    }

    /// Defaults, then `file` if given, then variable overrides
    fn layered<F>(file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(key) = lookup(ENV_API_KEY) {
            config.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_RPC_URL).filter(|u| !u.trim().is_empty()) {
            config.rpc_url = url;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout_secs = secs.parse().map_err(|_| {
                StorageError::Config(format!("{} must be an integer, got {:?}", ENV_REQUEST_TIMEOUT, secs))
            })?;
        }

        Ok(config)
    }

    /// The credential, or a configuration error if it is absent or blank
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(StorageError::Config(format!(
                "remote network credential missing: set {}",
                ENV_API_KEY
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get index database path
    pub fn index_db_path(&self) -> PathBuf {
        self.storage_dir.join(INDEX_DIR)
    }

    /// Get piece mapping database path
    pub fn mapping_db_path(&self) -> PathBuf {
        self.storage_dir.join(PIECES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert!(config.api_key.is_none());
        assert!(config.require_api_key().is_err());
        assert!(config.index_db_path().ends_with(INDEX_DIR));
        assert!(config.mapping_db_path().ends_with(PIECES_DIR));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_API_KEY, "secret"),
            (ENV_RPC_URL, "http://localhost:9000"),
            (ENV_DATA_DIR, "/tmp/remote-store"),
            (ENV_REQUEST_TIMEOUT, "5"),
        ]))
        .unwrap();

        assert_eq!(config.require_api_key().unwrap(), "secret");
        assert_eq!(config.rpc_url, "http://localhost:9000");
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/remote-store"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_blank_rpc_url_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[(ENV_RPC_URL, "  ")])).unwrap();
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let config = Config::from_lookup(lookup_from(&[(ENV_API_KEY, "   ")])).unwrap();
        assert!(matches!(config.require_api_key(), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        let result = Config::from_lookup(lookup_from(&[(ENV_REQUEST_TIMEOUT, "soon")]));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_file_then_env_layering() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let file_config = Config {
            api_key: Some("from-file".to_string()),
            rpc_url: "http://file-endpoint".to_string(),
            storage_dir: temp_dir.path().to_path_buf(),
            request_timeout_secs: 10,
        };
        file_config.save(&path).unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = Config::from_lookup(lookup_from(&[
            (ENV_CONFIG, path_str.as_str()),
            (ENV_API_KEY, "from-env"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.rpc_url, "http://file-endpoint");
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_explicit_file_still_takes_env_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node.toml");
        Config {
            request_timeout_secs: 10,
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let config = Config::layered(
            Some(&path),
            lookup_from(&[(ENV_REQUEST_TIMEOUT, "3"), (ENV_DATA_DIR, "/tmp/override")]),
        )
        .unwrap();

        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/override"));
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
    }
}
