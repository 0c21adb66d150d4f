//! # Configuration
//!
//! Loads, parses, and validates the YAML configuration file describing which
//! `(storage, subtree, user)` mappings to back up. Searches multiple
//! standard locations with a well-defined priority order, then validates all
//! settings before returning.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Top-level configuration structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// strftime pattern for a snapshot's folder name.
    #[serde(default = "default_backup_date_format")]
    pub backup_date_format: String,

    /// Mimetype ids excluded from the metadata stream.
    #[serde(default)]
    pub excluded_mimetype_ids: Vec<i64>,

    /// Units of work: one entry per `(storage_id, subtree, user)` mapping.
    pub mapping: Vec<MappingConfig>,

    /// S3-compatible object store connection settings.
    #[serde(default)]
    pub s3: S3Config,

    /// PostgreSQL metadata store connection settings.
    pub postgres: PostgresConfig,
}

/// One mapping of a Nextcloud subtree to a local backup destination.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MappingConfig {
    /// Scope of the file within Nextcloud (`oc_filecache.storage`).
    pub storage_id: i64,

    /// Display root inside the snapshot tree.
    pub user_name: String,

    /// S3 bucket holding this storage's objects.
    pub bucket: String,

    /// Subtree prefix within the storage to back up, matched
    /// case-insensitively as a prefix. Empty matches everything.
    #[serde(default)]
    pub nextcloud_path: String,

    /// Local filesystem root for this mapping's repository and snapshots.
    pub backup_root_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct S3Config {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostgresConfig {
    /// Standard `postgresql://...` connection string.
    pub dsn: String,

    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_backup_date_format() -> String {
    "%y%m%d-%H%M".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

/// Standard configuration file search paths, in descending priority order.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/nc-s3-backup.yaml")];
    if let Ok(home) = env::var("HOME") {
        paths.push(PathBuf::from(format!("{home}/.config/nc-s3-backup.yaml")));
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(format!("{xdg}/nc-s3-backup.yaml")));
    }
    paths.push(PathBuf::from("nc-s3-backup.yaml"));
    paths
}

/// Loads configuration from the first found config file in the search path.
pub fn load_config() -> Result<Config> {
    let search = config_search_paths();

    for path in &search {
        if path.exists() {
            return load_config_from(path);
        }
    }

    Err(ConfigError::NotFound { searched: search }.into())
}

/// Loads and validates configuration from a specific file path.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;

    let config: Config =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse { source: e })?;

    validate_config(&config)?;
    Ok(config)
}

/// Validates configuration invariants after parsing.
fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.mapping.is_empty() {
        return Err(ConfigError::Validation {
            message: "at least one mapping must be defined".to_string(),
        });
    }

    for (i, mapping) in config.mapping.iter().enumerate() {
        if mapping.backup_root_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: format!(
                    "mapping #{i} ('{}') has empty backup_root_path",
                    mapping.user_name
                ),
            });
        }
        if mapping.bucket.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("mapping #{i} ('{}') has empty bucket", mapping.user_name),
            });
        }
    }

    // A plausible strftime-like pattern: scan the parsed items rather than
    // formatting with it, since an unrecognized specifier makes
    // `DelayedFormat`'s `Display` impl return an error, and `to_string()`
    // panics on that rather than giving us a `Result` to inspect.
    let has_bad_specifier = chrono::format::StrftimeItems::new(&config.backup_date_format)
        .any(|item| matches!(item, chrono::format::Item::Error));
    if has_bad_specifier {
        return Err(ConfigError::Validation {
            message: format!(
                "backup_date_format '{}' contains an unrecognized strftime specifier",
                config.backup_date_format
            ),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for id in &config.excluded_mimetype_ids {
        if !seen.insert(id) {
            return Err(ConfigError::Validation {
                message: format!("excluded_mimetype_ids contains duplicate id {id}"),
            });
        }
    }

    Ok(())
}

/// Generates a default configuration file at the given path.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow::anyhow!("config file already exists: {}", path.display()).into());
    }

    let config = Config {
        backup_date_format: default_backup_date_format(),
        excluded_mimetype_ids: vec![],
        mapping: vec![MappingConfig {
            storage_id: 2,
            user_name: "pverkest".to_string(),
            bucket: "nextcloud-bucket".to_string(),
            nextcloud_path: "files/".to_string(),
            backup_root_path: PathBuf::from("/var/lib/backups/nextcloud/pverkest"),
        }],
        s3: S3Config {
            endpoint_url: Some("https://s3.example.com".to_string()),
            region: Some("us-east-1".to_string()),
        },
        postgres: PostgresConfig {
            dsn: "postgresql:///nextcloud?application_name=nc-s3-backup".to_string(),
            schema: default_schema(),
        },
    };

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, yaml)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
mapping:
  - storage_id: 2
    user_name: pverkest
    bucket: test-bucket
    nextcloud_path: "files/"
    backup_root_path: /var/lib/backups/nextcloud/
postgres:
  dsn: "postgresql:///nc-backup"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backup_date_format, "%y%m%d-%H%M");
        assert_eq!(config.mapping.len(), 1);
        assert_eq!(config.mapping[0].storage_id, 2);
        assert_eq!(config.postgres.schema, "public");
    }

    #[test]
    fn rejects_empty_mapping_list() {
        let config = Config {
            backup_date_format: default_backup_date_format(),
            excluded_mimetype_ids: vec![],
            mapping: vec![],
            s3: S3Config::default(),
            postgres: PostgresConfig {
                dsn: "postgresql:///x".to_string(),
                schema: default_schema(),
            },
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        init_config(&path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.mapping.len(), 1);
    }

    fn minimal_config() -> Config {
        Config {
            backup_date_format: default_backup_date_format(),
            excluded_mimetype_ids: vec![],
            mapping: vec![MappingConfig {
                storage_id: 2,
                user_name: "alice".to_string(),
                bucket: "bucket".to_string(),
                nextcloud_path: String::new(),
                backup_root_path: PathBuf::from("/var/lib/backups"),
            }],
            s3: S3Config::default(),
            postgres: PostgresConfig {
                dsn: "postgresql:///x".to_string(),
                schema: default_schema(),
            },
        }
    }

    #[test]
    fn rejects_unrecognized_strftime_specifier() {
        let mut config = minimal_config();
        config.backup_date_format = "%y%m%d-%Q".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_excluded_mimetype_ids() {
        let mut config = minimal_config();
        config.excluded_mimetype_ids = vec![1, 2, 1];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn accepts_plausible_strftime_pattern() {
        let config = minimal_config();
        assert!(validate_config(&config).is_ok());
    }
}
