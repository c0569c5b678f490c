// crates/tenancy-config/src/config.rs
// ============================================================================
// Module: Tenancy Configuration
// Description: Configuration loading and validation for the tenancy engine.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, tenancy-core, tenancy-store-postgres, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section has defaults, so an empty file is valid apart from the
//! database connection string, which must be set explicitly. Missing or
//! invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tenancy_core::FileAuditSink;
use tenancy_core::NoopAuditSink;
use tenancy_core::PoolSettings;
use tenancy_core::SharedAuditSink;
use tenancy_core::StderrAuditSink;
use tenancy_store_postgres::PostgresTenancyConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "tenancy.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TENANCY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum connection string length.
pub(crate) const MAX_CONNECTION_LENGTH: usize = 4096;
/// Upper bound for any configured timeout (one hour).
pub(crate) const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Top-level tenancy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TenancyConfig {
    /// Database connection and schema names.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Connection pool sizing and timeouts.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Audit sink selection.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl TenancyConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// explicit path, then `TENANCY_CONFIG`, then `./tenancy.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.pool.validate()?;
        self.audit.validate()?;
        self.postgres()
            .template()
            .map_err(|err| ConfigError::Invalid(format!("database: {err}")))?;
        Ok(())
    }

    /// Returns the Postgres backend configuration.
    #[must_use]
    pub fn postgres(&self) -> PostgresTenancyConfig {
        PostgresTenancyConfig {
            connection: self.database.connection.clone(),
            registry_schema: self.database.registry_schema.clone(),
            template_namespace: self.database.template_namespace.clone(),
            max_connections: self.pool.max_connections,
            min_idle: self.pool.min_idle,
            connect_timeout_ms: self.pool.connect_timeout_ms,
            acquire_timeout_ms: self.pool.acquire_timeout_ms,
            statement_timeout_ms: self.pool.statement_timeout_ms,
        }
    }
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    #[serde(default)]
    pub connection: String,
    /// Schema holding the registry table and change ledger.
    #[serde(default = "default_registry_schema")]
    pub registry_schema: String,
    /// Template namespace cloned into every tenant namespace.
    #[serde(default = "default_template_namespace")]
    pub template_namespace: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            registry_schema: default_registry_schema(),
            template_namespace: default_template_namespace(),
        }
    }
}

impl DatabaseConfig {
    /// Validates the database section. Schema names are checked by
    /// [`TenancyConfig::validate`] through the backend config.
    fn validate(&self) -> Result<(), ConfigError> {
        let connection = self.connection.trim();
        if connection.is_empty() {
            return Err(ConfigError::Invalid("database.connection must be non-empty".to_string()));
        }
        if connection.len() > MAX_CONNECTION_LENGTH {
            return Err(ConfigError::Invalid("database.connection exceeds max length".to_string()));
        }
        Ok(())
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Idle connections kept open.
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Pool acquisition timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_idle: None,
            connect_timeout_ms: default_timeout_ms(),
            acquire_timeout_ms: default_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Validates pool sizing and timeouts.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.min_idle.is_some_and(|idle| idle > self.max_connections) {
            return Err(ConfigError::Invalid(
                "pool.min_idle must not exceed pool.max_connections".to_string(),
            ));
        }
        let timeouts = [
            ("pool.connect_timeout_ms", Some(self.connect_timeout_ms)),
            ("pool.acquire_timeout_ms", Some(self.acquire_timeout_ms)),
            ("pool.statement_timeout_ms", self.statement_timeout_ms),
        ];
        for (field, value) in timeouts {
            if let Some(value) = value
                && (value == 0 || value > MAX_TIMEOUT_MS)
            {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be between 1 and {MAX_TIMEOUT_MS}"
                )));
            }
        }
        Ok(())
    }

    /// Returns the coordinator pool settings.
    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        PostgresTenancyConfig {
            max_connections: self.max_connections,
            min_idle: self.min_idle,
            connect_timeout_ms: self.connect_timeout_ms,
            acquire_timeout_ms: self.acquire_timeout_ms,
            statement_timeout_ms: self.statement_timeout_ms,
            ..PostgresTenancyConfig::default()
        }
        .pool_settings()
    }
}

/// Audit sink kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Output path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates the audit section.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.sink=file requires audit.path".to_string()))
            }
            (AuditSinkKind::File, Some(path)) => validate_path(path),
            (_, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid with audit.sink=file".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }

    /// Builds the configured audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the audit file cannot be opened.
    pub fn build_sink(&self) -> Result<SharedAuditSink, ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, Some(path)) => {
                let sink = FileAuditSink::new(path)
                    .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
                Ok(Arc::new(sink))
            }
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.sink=file requires audit.path".to_string()))
            }
            (AuditSinkKind::Stderr, _) => Ok(Arc::new(StderrAuditSink)),
            (AuditSinkKind::None, _) => Ok(Arc::new(NoopAuditSink)),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn default_registry_schema() -> String {
    "public".to_string()
}

fn default_template_namespace() -> String {
    "tenant_template".to_string()
}

const fn default_max_connections() -> u32 {
    16
}

const fn default_timeout_ms() -> u64 {
    5_000
}

#[allow(
    clippy::unnecessary_wraps,
    reason = "serde default functions must match the field type."
)]
const fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
