//! Layered configuration: compiled defaults, then an optional TOML file, then
//! environment overrides.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use satlog_normalize::ValidationPolicy;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::store::DuplicatePolicy;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SatlogConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub validation: ValidationPolicy,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Batches with more records than this are refused outright.
    pub max_batch: usize,
    pub timeout_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch: 5000,
            timeout_secs: 120,
            duplicate_policy: DuplicatePolicy::Skip,
        }
    }
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub import_key: Option<String>,
    pub admin_key: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("import_key", &self.import_key.as_ref().map(|_| "<redacted>"))
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SatlogConfig {
    /// Reads `path` (if any) and applies the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides fields from environment variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("DATABASE_URL").or_else(|| var("SATLOG_DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(bind) = var("SATLOG_BIND") {
            self.server.bind = bind;
        }
        if let Some(raw) = var("SATLOG_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("SATLOG_MAX_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = var("SATLOG_MAX_BATCH") {
            self.ingest.max_batch = parse_env("SATLOG_MAX_BATCH", &raw)?;
        }
        if let Some(raw) = var("SATLOG_INGEST_TIMEOUT_SECS") {
            self.ingest.timeout_secs = parse_env("SATLOG_INGEST_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = var("SATLOG_DUPLICATE_POLICY") {
            self.ingest.duplicate_policy = parse_env("SATLOG_DUPLICATE_POLICY", &raw)?;
        }
        if let Some(raw) = var("SATLOG_ENFORCE_ENUMS") {
            self.validation.enforce_enums = parse_env("SATLOG_ENFORCE_ENUMS", &raw)?;
        }
        if let Some(key) = var("SATLOG_IMPORT_KEY") {
            self.auth.import_key = Some(key);
        }
        if let Some(key) = var("SATLOG_ADMIN_KEY") {
            self.auth.admin_key = Some(key);
        }

        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn parse_env<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidEnv {
        key,
        reason: err.to_string(),
    })
}
