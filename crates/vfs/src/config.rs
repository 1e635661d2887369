//! Configuration for the bridge
//!
//! Native hosts read `~/.config/fsbridge/config.toml`; the browser build
//! receives the same structure as JSON from the page.

#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

use crate::chunks::CHUNK_SIZE;

/// Remote repository endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base: String,
    pub raw_base: String,
    /// Used when a repository reports no default branch
    pub fallback_branch: String,
    pub user_agent: String,
    /// Sent as a bearer token; never logged
    pub token: Option<SecretString>,
    /// Request timeout (native hosts only)
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            fallback_branch: "main".to_string(),
            user_agent: concat!("fsbridge/", env!("CARGO_PKG_VERSION")).to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Native directory mount
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Write buffer chunk size in bytes
    pub chunk_size: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Routing prefixes
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MountConfig {
    pub native_prefix: String,
    pub local_prefix: String,
    pub remote_prefix: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            native_prefix: "/files".to_string(),
            local_prefix: "/local".to_string(),
            remote_prefix: "/github".to_string(),
        }
    }
}

/// Full bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub remote: RemoteConfig,
    pub native: NativeConfig,
    pub mounts: MountConfig,
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid bridge config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("invalid bridge config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.native.chunk_size == 0 {
            bail!("native.chunk_size must be positive");
        }
        let prefixes = [
            &self.mounts.native_prefix,
            &self.mounts.local_prefix,
            &self.mounts.remote_prefix,
        ];
        for prefix in prefixes {
            if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
                bail!("mount prefix {prefix:?} must be an absolute, non-root path");
            }
            if prefix.starts_with("/.") {
                bail!("mount prefix {prefix:?} would shadow the runtime's private storage");
            }
        }
        for (i, a) in prefixes.iter().enumerate() {
            if prefixes[i + 1..].iter().any(|b| a.trim_end_matches('/') == b.trim_end_matches('/')) {
                bail!("mount prefix {a:?} is used twice");
            }
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl BridgeConfig {
    /// Load configuration from default path, falling back to defaults
    pub fn load() -> Self {
        let config_path = Self::default_config_path();
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from_path(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %config_path.display(), error = %e, "ignoring config file");
                Self::default()
            }
        }
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fsbridge")
            .join("config.toml")
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.remote.api_base, "https://api.github.com");
        assert_eq!(config.remote.fallback_branch, "main");
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.native.chunk_size, 1024 * 1024);
        assert_eq!(config.mounts.native_prefix, "/files");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
[remote]
fallback_branch = "master"
token = "ghp_secret"

[mounts]
remote_prefix = "/gh"
"#,
        )
        .unwrap();
        assert_eq!(config.remote.fallback_branch, "master");
        assert_eq!(config.remote.raw_base, "https://raw.githubusercontent.com");
        assert_eq!(
            config.remote.token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("ghp_secret")
        );
        assert_eq!(config.mounts.remote_prefix, "/gh");
        assert_eq!(config.mounts.local_prefix, "/local");
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let config = BridgeConfig::from_json_str(r#"{"remote":{"token":"ghp_secret"}}"#).unwrap();
        assert!(!format!("{config:?}").contains("ghp_secret"));
    }

    #[test]
    fn rejects_bad_prefixes() {
        assert!(BridgeConfig::from_toml_str("[mounts]\nlocal_prefix = \"local\"").is_err());
        assert!(BridgeConfig::from_toml_str("[mounts]\nlocal_prefix = \"/files\"").is_err());
        assert!(BridgeConfig::from_toml_str("[mounts]\nnative_prefix = \"/.cache\"").is_err());
        assert!(BridgeConfig::from_toml_str("[native]\nchunk_size = 0").is_err());
    }

    #[test]
    fn load_from_path_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[native]\nchunk_size = 4096\n").unwrap();
        let config = BridgeConfig::load_from_path(&path).unwrap();
        assert_eq!(config.native.chunk_size, 4096);
    }
}
