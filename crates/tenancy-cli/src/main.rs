// crates/tenancy-cli/src/main.rs
// ============================================================================
// Module: Tenancy CLI Entry Point
// Description: Command dispatcher for tenant lifecycle and schema operations.
// Purpose: Administer tenants, namespaces and template changes from a shell.
// Dependencies: clap, serde, serde_json, tenancy-config, tenancy-core,
//               tenancy-store-postgres, thiserror
// ============================================================================

//! ## Overview
//! The `tenancy` binary loads `tenancy.toml`, connects to Postgres and runs
//! one administrative command. Results are JSON on stdout; errors are JSON
//! on stderr with their taxonomy kind. Exit status is 0 on success, 1 on
//! failure and 2 when a propagation pass left failed namespaces.
//!
//! Identifiers and input files are validated before any connection opens.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;
use tenancy_config::ConfigError;
use tenancy_config::TenancyConfig;
use tenancy_core::ChangeId;
use tenancy_core::NamespaceState;
use tenancy_core::RequestScope;
use tenancy_core::SchemaChange;
use tenancy_core::Subdomain;
use tenancy_core::TenancyError;
use tenancy_core::TenancyErrorKind;
use tenancy_core::TenantId;
use tenancy_core::TenantName;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantStatus;
use tenancy_store_postgres::PgSession;
use tenancy_store_postgres::PostgresTenancy;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a change script.
const MAX_SCRIPT_BYTES: usize = 1024 * 1024;
/// Exit status for a propagation pass with failed namespaces.
const EXIT_PARTIAL_FAILURE: u8 = 2;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "tenancy", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to `TENANCY_CONFIG`, then ./tenancy.toml).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Overall deadline for the command in milliseconds.
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Tenant registry operations.
    Tenant {
        /// Selected tenant subcommand.
        #[command(subcommand)]
        command: TenantCommand,
    },
    /// Create or finish a tenant namespace from the template.
    Provision(TenantArg),
    /// Report whether a tenant namespace is complete.
    Verify(TenantArg),
    /// Drop the namespace of a suspended tenant.
    Teardown(TeardownCommand),
    /// Apply a template change to every tenant namespace.
    Propagate(PropagateCommand),
    /// Resolve an identifier to the namespace requests would use.
    Resolve(IdentifierArg),
    /// Check database connectivity without binding a namespace.
    Ping,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Tenant subcommands.
#[derive(Subcommand, Debug)]
enum TenantCommand {
    /// Register a new tenant in `pending` status.
    Create(TenantCreateCommand),
    /// Show one tenant by id or subdomain, whatever its status.
    Show(IdentifierArg),
    /// List every tenant ordered by id.
    List,
    /// Block a tenant from serving requests.
    Suspend(TenantArg),
    /// Allow a tenant with a complete namespace to serve requests.
    Activate(TenantArg),
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration file without connecting.
    Validate,
}

/// Arguments for `tenant create`.
#[derive(Args, Debug)]
struct TenantCreateCommand {
    /// Display name.
    #[arg(long)]
    name: String,
    /// Public subdomain label.
    #[arg(long)]
    subdomain: String,
}

/// A tenant id argument.
#[derive(Args, Debug)]
struct TenantArg {
    /// Tenant id.
    #[arg(value_name = "TENANT_ID")]
    tenant_id: String,
}

/// A tenant id or subdomain argument.
#[derive(Args, Debug)]
struct IdentifierArg {
    /// Tenant id or subdomain.
    #[arg(value_name = "IDENTIFIER")]
    identifier: String,
}

/// Arguments for `teardown`.
#[derive(Args, Debug)]
struct TeardownCommand {
    /// Tenant id.
    #[arg(value_name = "TENANT_ID")]
    tenant_id: String,
    /// Confirms the namespace and its data are to be dropped.
    #[arg(long)]
    confirm: bool,
}

/// Arguments for `propagate`.
#[derive(Args, Debug)]
struct PropagateCommand {
    /// Change identifier recorded in the ledger.
    #[arg(long, value_name = "ID")]
    change_id: String,
    /// SQL script with unqualified object names.
    #[arg(long, value_name = "FILE")]
    script: PathBuf,
    /// Run the script against the template namespace before propagating.
    #[arg(long)]
    apply_template: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error with an optional taxonomy kind.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
    /// Taxonomy kind when the error came from the engine.
    kind: Option<TenancyErrorKind>,
}

impl CliError {
    /// Constructs an error without a taxonomy kind.
    const fn new(message: String) -> Self {
        Self {
            message,
            kind: None,
        }
    }

    /// Renders the stderr payload.
    fn to_json(&self) -> serde_json::Value {
        match self.kind {
            Some(kind) => json!({
                "error": {
                    "kind": kind,
                    "message": self.message,
                    "retryable": kind.is_retryable(),
                }
            }),
            None => json!({ "error": { "message": self.message } }),
        }
    }
}

/// Wraps an engine error, keeping its taxonomy kind.
fn engine<E: Into<TenancyError>>(err: E) -> CliError {
    let err = err.into();
    CliError {
        message: err.to_string(),
        kind: Some(err.kind()),
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

fn config_error(err: &ConfigError) -> CliError {
    CliError::new(format!("failed to load config: {err}"))
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => emit_error(&err),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let scope = cli.timeout_ms.map_or_else(RequestScope::new, |millis| {
        RequestScope::with_timeout(Duration::from_millis(millis))
    });
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Tenant {
            command,
        } => command_tenant(config, &scope, command),
        Commands::Provision(arg) => {
            let tenant_id = parse_tenant_id(&arg.tenant_id)?;
            let tenancy = connect(config)?;
            let report = tenancy.provisioning().provision(&scope, &tenant_id).map_err(engine)?;
            write_json(&report)
        }
        Commands::Verify(arg) => {
            let tenant_id = parse_tenant_id(&arg.tenant_id)?;
            let tenancy = connect(config)?;
            let state = tenancy.provisioning().verify(&scope, &tenant_id).map_err(engine)?;
            write_json(&json!({ "tenant_id": tenant_id, "namespace": state }))
        }
        Commands::Teardown(command) => {
            let tenant_id = parse_tenant_id(&command.tenant_id)?;
            if !command.confirm {
                return Err(CliError::new(
                    "teardown drops the tenant namespace and its data; pass --confirm".to_string(),
                ));
            }
            let tenancy = connect(config)?;
            let dropped = tenancy.provisioning().teardown(&scope, &tenant_id).map_err(engine)?;
            write_json(&json!({ "tenant_id": tenant_id, "dropped": dropped }))
        }
        Commands::Propagate(command) => command_propagate(config, &scope, &command),
        Commands::Resolve(arg) => {
            let tenancy = connect(config)?;
            let context = tenancy.resolver().resolve(&arg.identifier).map_err(engine)?;
            write_json(&context)
        }
        Commands::Ping => {
            let tenancy = connect(config)?;
            tenancy.coordinator().ping(&scope).map_err(engine)?;
            write_json(&json!({ "ok": true, "pool": tenancy.coordinator().pool_status() }))
        }
        Commands::Config {
            command: ConfigCommand::Validate,
        } => {
            let loaded = TenancyConfig::load(config).map_err(|err| config_error(&err))?;
            write_json(&json!({
                "valid": true,
                "registry_schema": loaded.database.registry_schema,
                "template_namespace": loaded.database.template_namespace,
            }))
        }
    }
}

/// Loads configuration and connects to the database.
fn connect(path: Option<&Path>) -> CliResult<PostgresTenancy> {
    let config = TenancyConfig::load(path).map_err(|err| config_error(&err))?;
    let audit = config.audit.build_sink().map_err(|err| config_error(&err))?;
    PostgresTenancy::connect(&config.postgres(), audit)
        .map_err(|err| CliError::new(format!("failed to connect: {err}")))
}

fn parse_tenant_id(value: &str) -> CliResult<TenantId> {
    TenantId::parse(value).map_err(engine)
}

// ============================================================================
// SECTION: Tenant Commands
// ============================================================================

/// Dispatches tenant subcommands.
fn command_tenant(
    config: Option<&Path>,
    scope: &RequestScope,
    command: TenantCommand,
) -> CliResult<ExitCode> {
    match command {
        TenantCommand::Create(command) => {
            let name = TenantName::parse(&command.name).map_err(engine)?;
            let subdomain = Subdomain::parse(&command.subdomain).map_err(engine)?;
            let tenancy = connect(config)?;
            let record = tenancy.registry().create(&name, &subdomain).map_err(engine)?;
            write_json(&record)
        }
        TenantCommand::Show(arg) => {
            let tenancy = connect(config)?;
            let record = tenancy.resolver().find(&arg.identifier).map_err(engine)?;
            write_json(&record)
        }
        TenantCommand::List => {
            let tenancy = connect(config)?;
            write_json(&tenancy.registry().list().map_err(engine)?)
        }
        TenantCommand::Suspend(arg) => {
            let tenant_id = parse_tenant_id(&arg.tenant_id)?;
            let tenancy = connect(config)?;
            let record = tenancy
                .registry()
                .set_status(&tenant_id, TenantStatus::Suspended)
                .map_err(engine)?;
            write_json(&record)
        }
        TenantCommand::Activate(arg) => {
            let tenant_id = parse_tenant_id(&arg.tenant_id)?;
            let tenancy = connect(config)?;
            let state = tenancy.provisioning().verify(scope, &tenant_id).map_err(engine)?;
            if state != NamespaceState::Complete {
                return Err(CliError {
                    message: format!(
                        "tenant {tenant_id} cannot be activated: namespace is {state}"
                    ),
                    kind: Some(TenancyErrorKind::NamespaceIncomplete),
                });
            }
            let record = tenancy
                .registry()
                .set_status(&tenant_id, TenantStatus::Active)
                .map_err(engine)?;
            write_json(&record)
        }
    }
}

// ============================================================================
// SECTION: Propagation Command
// ============================================================================

/// Propagates one change script, optionally applying it to the template.
fn command_propagate(
    config: Option<&Path>,
    scope: &RequestScope,
    command: &PropagateCommand,
) -> CliResult<ExitCode> {
    let change_id = ChangeId::parse(&command.change_id).map_err(engine)?;
    let script = read_script(&command.script)?;
    let change = SchemaChange::new(change_id, script);
    let tenancy = connect(config)?;
    if command.apply_template {
        apply_to_template(&tenancy, scope, &change)?;
    }
    let report = tenancy.propagator().propagate(scope, &change).map_err(engine)?;
    let partial = !report.failed.is_empty();
    write_json(&report)?;
    if partial {
        return Ok(ExitCode::from(EXIT_PARTIAL_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs the change script inside the template namespace in one transaction.
fn apply_to_template(
    tenancy: &PostgresTenancy,
    scope: &RequestScope,
    change: &SchemaChange,
) -> CliResult<()> {
    let set_path = format!("SET LOCAL search_path TO {}", tenancy.template().quoted());
    tenancy
        .coordinator()
        .with_admin_session(scope, |session: &mut PgSession| {
            let mut tx = session.client().transaction()?;
            tx.batch_execute(&set_path)?;
            tx.batch_execute(&change.script)?;
            tx.commit()
        })
        .map_err(|err| {
            CliError::new(format!("failed to apply change {} to the template: {err}", change.id))
        })
}

/// Reads a change script as UTF-8 with a size limit.
fn read_script(path: &Path) -> CliResult<String> {
    let bytes = read_bytes_with_limit(path, MAX_SCRIPT_BYTES).map_err(|err| match err {
        ReadLimitError::Io(error) => {
            CliError::new(format!("failed to read {}: {error}", path.display()))
        }
        ReadLimitError::TooLarge {
            size,
            limit,
        } => CliError::new(format!(
            "script {} is {size} bytes; limit is {limit} bytes",
            path.display()
        )),
    })?;
    let script = String::from_utf8(bytes)
        .map_err(|_| CliError::new(format!("script {} must be utf-8", path.display())))?;
    if script.trim().is_empty() {
        return Err(CliError::new(format!("script {} is empty", path.display())));
    }
    Ok(script)
}

// ============================================================================
// SECTION: I/O Helpers
// ============================================================================

/// Errors from bounded file reads.
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Writes pretty JSON and a newline to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<ExitCode> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{rendered}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Emits an error payload to stderr and returns a failure exit code.
fn emit_error(err: &CliError) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{}", err.to_json());
    ExitCode::FAILURE
}
