//! Section validation tests for tenancy-config.
// crates/tenancy-config/tests/config_validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Validate database, pool and audit section invariants.
// Purpose: Ensure unusable settings are rejected before anything connects.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;

use tenancy_config::AuditSinkKind;
use tenancy_config::ConfigError;
use tenancy_config::TenancyConfig;

type TestResult = Result<(), String>;

const BASE: &str = "[database]\nconnection = \"postgres://app@db/app\"\n";

fn parse(extra: &str) -> Result<TenancyConfig, ConfigError> {
    TenancyConfig::from_toml(&format!("{BASE}{extra}"))
}

fn assert_invalid(result: Result<TenancyConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn connection_is_required() -> TestResult {
    assert_invalid(TenancyConfig::from_toml(""), "database.connection must be non-empty")?;
    assert_invalid(
        TenancyConfig::from_toml("[database]\nconnection = \"   \"\n"),
        "database.connection must be non-empty",
    )
}

#[test]
fn template_cannot_take_tenant_namespace_shape() -> TestResult {
    let toml = "[database]\nconnection = \"postgres://app@db/app\"\ntemplate_namespace = \
                \"tenant_0192f5a0b1c27d3e8f4a5b6c7d8e9f00\"\n";
    assert_invalid(TenancyConfig::from_toml(toml), "database:")
}

#[test]
fn registry_and_template_schemas_must_differ() -> TestResult {
    let toml = "[database]\nconnection = \"postgres://app@db/app\"\nregistry_schema = \
                \"shared\"\ntemplate_namespace = \"shared\"\n";
    assert_invalid(TenancyConfig::from_toml(toml), "must differ")
}

#[test]
fn schema_names_must_be_plain_identifiers() -> TestResult {
    let toml = "[database]\nconnection = \"postgres://app@db/app\"\nregistry_schema = \
                \"Public; DROP\"\n";
    assert_invalid(TenancyConfig::from_toml(toml), "database:")
}

#[test]
fn pool_size_must_be_positive() -> TestResult {
    assert_invalid(parse("[pool]\nmax_connections = 0\n"), "pool.max_connections")
}

#[test]
fn min_idle_cannot_exceed_pool_size() -> TestResult {
    assert_invalid(parse("[pool]\nmax_connections = 2\nmin_idle = 3\n"), "pool.min_idle")
}

#[test]
fn timeouts_must_be_positive_and_bounded() -> TestResult {
    assert_invalid(parse("[pool]\nacquire_timeout_ms = 0\n"), "pool.acquire_timeout_ms")?;
    assert_invalid(parse("[pool]\nconnect_timeout_ms = 7200000\n"), "pool.connect_timeout_ms")?;
    assert_invalid(parse("[pool]\nstatement_timeout_ms = 0\n"), "pool.statement_timeout_ms")
}

#[test]
fn file_audit_sink_requires_path() -> TestResult {
    assert_invalid(parse("[audit]\nsink = \"file\"\n"), "audit.sink=file requires audit.path")?;
    assert_invalid(
        parse("[audit]\nsink = \"stderr\"\npath = \"audit.jsonl\"\n"),
        "audit.path is only valid",
    )
}

#[test]
fn unknown_audit_sink_is_a_parse_error() -> TestResult {
    assert_invalid(parse("[audit]\nsink = \"syslog\"\n"), "config parse error")
}

#[test]
fn postgres_settings_follow_sections() -> TestResult {
    let config = parse(
        "[pool]\nmax_connections = 4\nmin_idle = 1\nacquire_timeout_ms = 250\n[audit]\nsink = \
         \"none\"\n",
    )
    .map_err(|err| err.to_string())?;
    if config.audit.sink != AuditSinkKind::None {
        return Err("audit sink should be none".to_string());
    }
    let postgres = config.postgres();
    if postgres.connection != "postgres://app@db/app" || postgres.max_connections != 4 {
        return Err(format!("unexpected postgres config: {postgres:?}"));
    }
    let settings = postgres.pool_settings();
    if settings.acquire_timeout != Duration::from_millis(250) || settings.min_idle != Some(1) {
        return Err(format!("unexpected pool settings: {settings:?}"));
    }
    Ok(())
}

#[test]
fn file_audit_sink_opens_configured_path() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("audit.jsonl");
    let body = format!("[audit]\nsink = \"file\"\npath = {:?}\n", path.display().to_string());
    let config = parse(&body).map_err(|err| err.to_string())?;
    config.audit.build_sink().map_err(|err| err.to_string())?;
    if !path.exists() {
        return Err("audit file was not created".to_string());
    }
    Ok(())
}
