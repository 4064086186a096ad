//! Server configuration.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use xdg::BaseDirectories;

use aptvault::archive::ArchiveConfig;
use aptvault::blob::{BlobStoreConfig, DEFAULT_PREFIX_DEPTH};

/// Application prefix in XDG base directories.
///
/// This will be concatenated into `$XDG_CONFIG_HOME/aptvault`.
const XDG_PREFIX: &str = "aptvault";

/// Environment variable holding the configuration itself.
const ENV_CONFIG: &str = "APTVAULT_CONFIG";

/// Configuration for the aptvault daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base directory of the blob store.
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,

    /// Directory to stage incoming blobs in.
    ///
    /// Must be on the same filesystem as `store-path`. Defaults to
    /// `{store-path}/tmp`.
    #[serde(rename = "temp-path")]
    #[serde(default)]
    pub temp_path: Option<PathBuf>,

    /// Directory distributions are published to.
    ///
    /// Must be on the same filesystem as `store-path`.
    #[serde(rename = "public-path")]
    #[serde(default)]
    pub public_path: Option<PathBuf>,

    /// Number of hex characters of blob IDs used for directory sharding.
    ///
    /// Changing this on an existing store makes its blobs invisible.
    #[serde(rename = "prefix-depth")]
    #[serde(default = "default_prefix_depth")]
    pub prefix_depth: usize,

    /// Archive behavior.
    #[serde(default = "Default::default")]
    pub archive: ArchiveConfig,

    /// Garbage collection.
    #[serde(rename = "garbage-collection")]
    #[serde(default = "Default::default")]
    pub garbage_collection: GarbageCollectionConfig,
}

/// Garbage collection config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GarbageCollectionConfig {
    /// The frequency to run garbage collection at.
    ///
    /// If zero, automatic garbage collection is disabled, but
    /// it can still be run manually with `aptvaultd --mode garbage-collector-once`.
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub interval: Duration,
}

impl Config {
    /// Returns the blob store configuration.
    pub fn blob_store(&self) -> BlobStoreConfig {
        BlobStoreConfig {
            path: self.store_path.clone(),
            temp_path: self.temp_path.clone(),
            prefix_depth: self.prefix_depth,
        }
    }
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            interval: default_gc_interval(),
        }
    }
}

fn default_prefix_depth() -> usize {
    DEFAULT_PREFIX_DEPTH
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(43200)
}

pub fn load_config_from_path(path: &Path) -> Result<Config> {
    tracing::info!("Using configurations: {:?}", path);

    let config = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {:?}", path))?;
    toml::from_str(&config).context("Invalid configuration file")
}

pub fn load_config_from_str(s: &str) -> Result<Config> {
    tracing::info!("Using configurations from environment variable");
    toml::from_str(s).context("Invalid configuration")
}

/// Loads the configuration.
///
/// The first of these is used:
///
/// 1. The file given on the command line
/// 2. The `APTVAULT_CONFIG` environment variable
/// 3. `server.toml` in the XDG configuration directory
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    if let Some(config_path) = config_path {
        return load_config_from_path(config_path);
    }

    if let Ok(config_env) = env::var(ENV_CONFIG) {
        return load_config_from_str(&config_env);
    }

    let config_path = get_xdg_config_path()?;
    if config_path.exists() {
        return load_config_from_path(&config_path);
    }

    Err(anyhow!(
        "No configuration found, pass --config, set {} or create {:?}",
        ENV_CONFIG,
        config_path
    ))
}

pub fn get_xdg_config_path() -> Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let config_path = xdg_dirs.place_config_file("server.toml")?;

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config = load_config_from_str(
            r#"
            store-path = "/var/lib/aptvault/store"
            temp-path = "/var/lib/aptvault/tmp"
            public-path = "/var/lib/aptvault/public"
            prefix-depth = 2

            [archive]
            prune-rules = "linux-.*_1-0, .*_*-2"
            auto-trim-length = 20
            pool-pattern = "[a-z]"
            suite = "unstable"

            [garbage-collection]
            interval = "6h"
            "#,
        )
        .unwrap();

        assert_eq!(PathBuf::from("/var/lib/aptvault/store"), config.store_path);
        assert_eq!(Some(PathBuf::from("/var/lib/aptvault/tmp")), config.temp_path);
        assert_eq!(2, config.blob_store().prefix_depth);
        assert_eq!(20, config.archive.auto_trim_length);
        assert_eq!("[a-z]", config.archive.pool_pattern);
        assert_eq!(
            Duration::from_secs(6 * 3600),
            config.garbage_collection.interval
        );
    }

    #[test]
    fn test_minimal_config() {
        let config = load_config_from_str(r#"store-path = "/srv/store""#).unwrap();

        assert_eq!(None, config.public_path);
        assert_eq!(DEFAULT_PREFIX_DEPTH, config.prefix_depth);
        assert!(config.archive.prune_rules.is_empty());
        assert_eq!("stable", config.archive.suite);
        assert_eq!(
            Duration::from_secs(43200),
            config.garbage_collection.interval
        );
    }

    #[test]
    fn test_invalid_config() {
        for config in [
            "",
            r#"store-path = "/srv/store"
               listen = "[::]:8080""#,
            r#"store-path = "/srv/store"
               [archive]
               prune-rules = "no limits""#,
            r#"store-path = "/srv/store"
               [garbage-collection]
               interval = "often""#,
        ] {
            assert!(load_config_from_str(config).is_err(), "{:?}", config);
        }
    }
}
