// system-tests/tests/suites/postgres_isolation.rs
// ============================================================================
// Module: Postgres Isolation Tests
// Description: Bind and reset behavior of pooled Postgres connections.
// Purpose: Ensure no request observes another tenant's namespace or state.
// Dependencies: system-tests helpers
// ============================================================================

//! ## Overview
//! Every test runs with a small pool so consecutive units of work reuse the
//! same physical connection, which is where leaked session state would show.

use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use helpers::harness::PgHarness;
use tenancy_core::BindingFailure;
use tenancy_core::CoordinatorError;
use tenancy_core::RequestScope;
use tenancy_core::ResolveError;
use tenancy_core::TenantContext;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantStatus;
use tenancy_store_postgres::PgSession;

use crate::helpers;

fn single_connection() -> Result<PgHarness, String> {
    PgHarness::start_with(helpers::harness::TEMPLATE_SCRIPT, |config| {
        config.max_connections = 1;
        config.acquire_timeout_ms = 500;
    })
}

/// Reads `(search_path, statement_timeout, work_mem)` on a neutral session.
fn neutral_settings(harness: &PgHarness) -> Result<(String, String, String), Box<dyn Error>> {
    let settings = harness.tenancy.coordinator().with_admin_session(
        &RequestScope::new(),
        |session: &mut PgSession| {
            let row = session.client().query_one(
                "SELECT current_setting('search_path'), current_setting('statement_timeout'), \
                 current_setting('work_mem')",
                &[],
            )?;
            Ok::<_, postgres::Error>((row.get(0), row.get(1), row.get(2)))
        },
    )?;
    Ok(settings)
}

#[test]
fn tenant_rows_are_isolated() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.context(&harness.onboard("acme")?)?;
    let globex = harness.context(&harness.onboard("globex")?)?;

    harness.execute_as(&acme, "INSERT INTO companies (name) VALUES ('Acme Corp')")?;
    harness.execute_as(&acme, "INSERT INTO companies (name) VALUES ('Acme Labs')")?;
    harness.execute_as(&globex, "INSERT INTO companies (name) VALUES ('Globex')")?;

    assert_eq!(harness.count_as(&acme, "companies")?, 2);
    assert_eq!(harness.count_as(&globex, "companies")?, 1);

    let names: Vec<String> = harness.tenancy.coordinator().with_tenant(
        &RequestScope::new(),
        &globex,
        |session: &mut PgSession| {
            let rows = session.client().query("SELECT name FROM companies", &[])?;
            Ok::<Vec<String>, postgres::Error>(rows.into_iter().map(|row| row.get(0)).collect())
        },
    )?;
    assert_eq!(names, vec!["Globex".to_string()]);
    Ok(())
}

#[test]
fn reset_restores_neutral_session_state() -> Result<(), Box<dyn Error>> {
    let harness = single_connection()?;
    let acme = harness.context(&harness.onboard("acme")?)?;
    let before = neutral_settings(&harness)?;

    let bound_path = harness.tenancy.coordinator().with_tenant(
        &RequestScope::new(),
        &acme,
        |session: &mut PgSession| {
            session.client().batch_execute("SET work_mem = '1MB'; SET statement_timeout = 5000")?;
            let row = session.client().query_one("SELECT current_setting('search_path')", &[])?;
            Ok::<String, postgres::Error>(row.get(0))
        },
    )?;
    assert!(bound_path.contains(acme.namespace().as_str()));

    let after = neutral_settings(&harness)?;
    assert_eq!(after, before);
    assert!(!after.0.contains("tenant_"));
    assert_eq!(harness.tenancy.coordinator().pool_status().connections, 1);
    Ok(())
}

#[test]
fn aborted_transaction_is_rolled_back_before_reuse() -> Result<(), Box<dyn Error>> {
    let harness = single_connection()?;
    let acme = harness.context(&harness.onboard("acme")?)?;

    let failed = harness.tenancy.coordinator().with_tenant(
        &RequestScope::new(),
        &acme,
        |session: &mut PgSession| {
            session
                .client()
                .batch_execute("BEGIN; INSERT INTO companies (name) VALUES ('ghost')")?;
            session.client().batch_execute("SELECT 1 / 0")
        },
    );
    assert!(matches!(failed, Err(CoordinatorError::Work(_))));

    assert_eq!(harness.count_as(&acme, "companies")?, 0);
    harness.execute_as(&acme, "INSERT INTO companies (name) VALUES ('Acme')")?;
    assert_eq!(harness.count_as(&acme, "companies")?, 1);
    Ok(())
}

#[test]
fn panicking_work_does_not_leak_its_binding() -> Result<(), Box<dyn Error>> {
    let harness = single_connection()?;
    let acme = harness.context(&harness.onboard("acme")?)?;
    let globex = harness.context(&harness.onboard("globex")?)?;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        harness.tenancy.coordinator().with_tenant(
            &RequestScope::new(),
            &acme,
            |session: &mut PgSession| -> Result<(), postgres::Error> {
                session
                    .client()
                    .batch_execute("BEGIN; INSERT INTO companies (name) VALUES ('half')")?;
                panic!("work panicked mid-transaction");
            },
        )
    }));
    assert!(outcome.is_err());

    let (path, _, _) = neutral_settings(&harness)?;
    assert!(!path.contains(acme.namespace().as_str()));
    assert_eq!(harness.count_as(&globex, "companies")?, 0);
    assert_eq!(harness.count_as(&acme, "companies")?, 0);
    Ok(())
}

#[test]
fn serial_sequences_are_per_tenant() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.context(&harness.onboard("acme")?)?;
    let globex = harness.context(&harness.onboard("globex")?)?;

    let insert = |context: &TenantContext| {
        harness.tenancy.coordinator().with_tenant(
            &RequestScope::new(),
            context,
            |session: &mut PgSession| {
                let row = session
                    .client()
                    .query_one("INSERT INTO companies (name) VALUES ('x') RETURNING id", &[])?;
                Ok::<i64, postgres::Error>(row.get(0))
            },
        )
    };
    assert_eq!(insert(&acme)?, 1);
    assert_eq!(insert(&acme)?, 2);
    assert_eq!(insert(&globex)?, 1);
    Ok(())
}

#[test]
fn unqualified_ddl_stays_in_the_bound_namespace() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.onboard("acme")?;
    let globex = harness.onboard("globex")?;
    let context = harness.context(&acme)?;

    harness.execute_as(&context, "CREATE TABLE notes (id BIGSERIAL PRIMARY KEY, body TEXT)")?;

    assert!(harness.tables_in(acme.namespace.as_str())?.contains(&"notes".to_string()));
    assert!(!harness.tables_in(globex.namespace.as_str())?.contains(&"notes".to_string()));
    for schema in [&harness.config.template_namespace, &harness.config.registry_schema] {
        assert!(!harness.tables_in(schema)?.contains(&"notes".to_string()), "{schema}");
    }
    Ok(())
}

#[test]
fn missing_namespace_fails_binding_and_work_never_runs() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.register("acme")?;
    harness.tenancy.registry().set_status(&record.id, TenantStatus::Active)?;
    let context = harness.context(&record)?;

    let mut ran = false;
    let result = harness.tenancy.coordinator().with_tenant(
        &RequestScope::new(),
        &context,
        |_: &mut PgSession| {
            ran = true;
            Ok::<(), postgres::Error>(())
        },
    );
    assert!(matches!(
        result,
        Err(CoordinatorError::Binding(BindingFailure::Bind {
            ..
        }))
    ));
    assert!(!ran);
    assert!(harness.tenancy.coordinator().ping(&RequestScope::new()).is_ok());
    Ok(())
}

#[test]
fn exhausted_pool_reports_binding_failure() -> Result<(), Box<dyn Error>> {
    let harness = single_connection()?;
    let acme = harness.context(&harness.onboard("acme")?)?;
    let coordinator = harness.tenancy.coordinator();

    let nested = coordinator.with_tenant(&RequestScope::new(), &acme, |_: &mut PgSession| {
        let inner = coordinator.with_tenant(&RequestScope::new(), &acme, |_: &mut PgSession| {
            Ok::<(), postgres::Error>(())
        });
        Ok::<_, postgres::Error>(inner)
    })?;
    assert!(matches!(
        nested,
        Err(CoordinatorError::Binding(BindingFailure::PoolExhausted {
            ..
        }))
    ));
    assert!(
        harness.audit.events_named("namespace.acquire").iter().any(|event| {
            event.namespace.as_deref() == Some(acme.namespace().as_str())
        })
    );
    Ok(())
}

#[test]
fn suspended_tenant_is_not_resolved() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;
    harness.tenancy.registry().set_status(&record.id, TenantStatus::Suspended)?;

    let resolved = harness.tenancy.resolver().resolve("acme");
    assert!(matches!(
        resolved,
        Err(ResolveError::TenantSuspended {
            ..
        })
    ));
    assert!(matches!(
        harness.tenancy.resolver().resolve("initech"),
        Err(ResolveError::UnknownTenant(_))
    ));
    Ok(())
}
