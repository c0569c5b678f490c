// system-tests/src/config/env.rs
// ============================================================================
// Module: System Test Environment
// Description: Environment-backed configuration for system tests.
// Purpose: Centralize env parsing with strict UTF-8 validation.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values are parsed with strict UTF-8 enforcement to avoid silent
//! misconfiguration. Invalid UTF-8 fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// SECTION: Environment Constants
// ============================================================================

/// Default Postgres image tag for container fixtures.
pub const DEFAULT_POSTGRES_TAG: &str = "16-alpine";
/// Default wait for a fresh server to accept connections.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment keys for system test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTestEnv {
    /// Connection string of an existing Postgres server; skips containers.
    PostgresUrl,
    /// Postgres image tag for container fixtures.
    PostgresTag,
    /// Startup wait in seconds (positive integer).
    StartupTimeoutSeconds,
    /// Keep per-test schemas after a run (`true`/`false` or `1`/`0`).
    KeepSchemas,
}

impl SystemTestEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostgresUrl => "TENANCY_TEST_POSTGRES_URL",
            Self::PostgresTag => "TENANCY_TEST_POSTGRES_TAG",
            Self::StartupTimeoutSeconds => "TENANCY_TEST_STARTUP_TIMEOUT_SEC",
            Self::KeepSchemas => "TENANCY_TEST_KEEP_SCHEMAS",
        }
    }
}

// ============================================================================
// SECTION: Config Types
// ============================================================================

/// Typed system test configuration derived from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTestConfig {
    /// External server connection string.
    pub postgres_url: Option<String>,
    /// Image tag used when starting a container.
    pub postgres_tag: String,
    /// Wait for the server to accept connections.
    pub startup_timeout: Duration,
    /// Keep per-test schemas after a run.
    pub keep_schemas: bool,
}

impl Default for SystemTestConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            postgres_tag: DEFAULT_POSTGRES_TAG.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            keep_schemas: false,
        }
    }
}

impl SystemTestConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when an environment value is not valid UTF-8, is empty,
    /// or fails validation (for example, an invalid timeout or boolean value).
    pub fn load() -> Result<Self, String> {
        let postgres_url = read_env_nonempty(SystemTestEnv::PostgresUrl.as_str())?;
        let postgres_tag = read_env_nonempty(SystemTestEnv::PostgresTag.as_str())?
            .unwrap_or_else(|| DEFAULT_POSTGRES_TAG.to_string());
        let startup_timeout = read_env_nonempty(SystemTestEnv::StartupTimeoutSeconds.as_str())?
            .map(|value| {
                parse_timeout_seconds(SystemTestEnv::StartupTimeoutSeconds.as_str(), &value)
            })
            .transpose()?
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT);
        let keep_schemas = parse_bool_env(
            SystemTestEnv::KeepSchemas.as_str(),
            read_env_nonempty(SystemTestEnv::KeepSchemas.as_str())?,
        )?;
        Ok(Self {
            postgres_url,
            postgres_tag,
            startup_timeout,
            keep_schemas,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads an environment variable and enforces UTF-8 validity.
///
/// # Errors
///
/// Returns an error when the environment variable contains invalid UTF-8.
pub fn read_env_strict(name: &str) -> Result<Option<String>, String> {
    std::env::var_os(name).map_or(Ok(None), |raw| {
        raw.into_string().map(Some).map_err(|_| format!("{name} must be valid UTF-8"))
    })
}

/// Reads an environment variable and rejects empty values.
fn read_env_nonempty(name: &str) -> Result<Option<String>, String> {
    match read_env_strict(name)? {
        Some(value) if value.trim().is_empty() => Err(format!("{name} must not be empty")),
        Some(value) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Parses a positive number of seconds.
fn parse_timeout_seconds(name: &str, raw: &str) -> Result<Duration, String> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{name} must be a positive integer number of seconds"))?;
    if secs == 0 {
        return Err(format!("{name} must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parses a boolean flag; unset means false.
fn parse_bool_env(name: &str, raw: Option<String>) -> Result<bool, String> {
    let Some(value) = raw else {
        return Ok(false);
    };
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        return Ok(false);
    }
    Err(format!("{name} must be 1, 0, true, or false"))
}
