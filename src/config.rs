//! Configuration management for the Clean EPUB server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::html::{Leniency, SanitizeConfig};
use crate::pipeline::CleanConfig;

/// Upload size limit unless `MAX_UPLOAD_BYTES` says otherwise: 10MB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub clean: CleanConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where accepted uploads are written
    pub upload_dir: PathBuf,
    /// Where cleaned archives are written and served from
    pub cleaned_dir: PathBuf,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./cleanepub.db".to_string(),
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./uploads"),
                cleaned_dir: PathBuf::from("./cleaned"),
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            worker: WorkerConfig {
                poll_interval_ms: 1000,
            },
            clean: CleanConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source, defaulting what is unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let disallowed_tags = match lookup("CLEAN_TAGS") {
            Some(tags) => tags
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => defaults.clean.sanitize.disallowed_tags.clone(),
        };
        let leniency = if parse_flag(&lookup, "CLEAN_STRICT")? {
            Leniency::Strict
        } else {
            Leniency::Lenient
        };

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var(&lookup, "SERVER_PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            storage: StorageConfig {
                upload_dir: lookup("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
                cleaned_dir: lookup("CLEANED_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.cleaned_dir),
                max_upload_bytes: parse_var(
                    &lookup,
                    "MAX_UPLOAD_BYTES",
                    defaults.storage.max_upload_bytes,
                )?,
            },
            worker: WorkerConfig {
                poll_interval_ms: parse_var(
                    &lookup,
                    "WORKER_POLL_MS",
                    defaults.worker.poll_interval_ms,
                )?,
            },
            clean: CleanConfig {
                sanitize: SanitizeConfig {
                    disallowed_tags,
                    full_clean: parse_flag(&lookup, "CLEAN_FULL")?,
                    leniency,
                },
                overwrite: true,
                work_root: lookup("WORK_DIR").map(PathBuf::from),
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, var: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.clean.sanitize.disallowed_tags, vec!["span", "font"]);
        assert!(!config.clean.sanitize.full_clean);
        assert_eq!(config.clean.sanitize.leniency, Leniency::Lenient);
        assert!(config.clean.overwrite);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SERVER_PORT", "8000"),
            ("MAX_UPLOAD_BYTES", "2048"),
            ("CLEAN_TAGS", "span, font ,em"),
            ("CLEAN_FULL", "yes"),
            ("CLEAN_STRICT", "1"),
            ("UPLOAD_DIR", "/srv/uploads"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.max_upload_bytes, 2048);
        assert_eq!(config.storage.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(config.clean.sanitize.disallowed_tags, vec!["span", "font", "em"]);
        assert!(config.clean.sanitize.full_clean);
        assert_eq!(config.clean.sanitize.leniency, Leniency::Strict);
    }

    #[test]
    fn test_invalid_values() {
        let result = Config::from_lookup(lookup_from(&[("SERVER_PORT", "eighty")]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { var: "SERVER_PORT", .. })
        ));

        let result = Config::from_lookup(lookup_from(&[("CLEAN_FULL", "maybe")]));
        assert!(matches!(result, Err(ConfigError::Invalid { var: "CLEAN_FULL", .. })));
    }
}
