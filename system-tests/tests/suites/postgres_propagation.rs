// system-tests/tests/suites/postgres_propagation.rs
// ============================================================================
// Module: Postgres Propagation Tests
// Description: Template change propagation over real tenant namespaces.
// Purpose: Ensure changes apply once per namespace and fail atomically.
// Dependencies: system-tests helpers
// ============================================================================

use std::error::Error;

use helpers::harness::PgHarness;
use tenancy_core::ChangeId;
use tenancy_core::DeferReason;
use tenancy_core::PropagationError;
use tenancy_core::RequestScope;
use tenancy_core::SchemaChange;
use tenancy_core::TenantRecord;
use tenancy_core::quote_ident;

use crate::helpers;

const ADD_PHONE: &str = "ALTER TABLE contacts ADD COLUMN phone TEXT; ALTER TABLE contacts ADD \
                         CONSTRAINT contacts_phone_present CHECK (phone IS NOT NULL)";

fn add_phone() -> Result<SchemaChange, Box<dyn Error>> {
    Ok(SchemaChange::new(ChangeId::parse("0002_add_phone")?, ADD_PHONE))
}

fn columns(harness: &PgHarness, record: &TenantRecord) -> Result<Vec<String>, Box<dyn Error>> {
    let rows = harness.client()?.query(
        "SELECT column_name::text FROM information_schema.columns WHERE table_schema = $1 AND \
         table_name = 'contacts' ORDER BY ordinal_position",
        &[&record.namespace.as_str()],
    )?;
    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

fn insert_contact(harness: &PgHarness, record: &TenantRecord) -> Result<(), Box<dyn Error>> {
    let context = harness.context(record)?;
    harness.execute_as(&context, "INSERT INTO companies (id, name) VALUES (1, 'Globex')")?;
    harness.execute_as(
        &context,
        "INSERT INTO contacts (company_id, email) VALUES (1, 'hank@globex.example')",
    )?;
    Ok(())
}

#[test]
fn change_applies_once_per_namespace() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.onboard("acme")?;
    let globex = harness.onboard("globex")?;
    let change = add_phone()?;
    let propagator = harness.tenancy.propagator();

    let first = propagator.propagate(&RequestScope::new(), &change)?;
    assert_eq!(first.applied.len(), 2);
    assert!(first.is_complete());
    assert!(columns(&harness, &acme)?.contains(&"phone".to_string()));
    assert!(columns(&harness, &globex)?.contains(&"phone".to_string()));
    assert_eq!(harness.ledger(acme.namespace.as_str())?, vec!["0002_add_phone".to_string()]);
    assert_eq!(
        harness.ledger(&harness.config.template_namespace)?,
        vec!["0002_add_phone".to_string()]
    );

    let second = propagator.propagate(&RequestScope::new(), &change)?;
    assert!(second.applied.is_empty());
    assert_eq!(second.already_applied.len(), 2);
    Ok(())
}

#[test]
fn failing_namespace_rolls_back_and_is_retried() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.onboard("acme")?;
    let globex = harness.onboard("globex")?;
    insert_contact(&harness, &globex)?;
    let change = add_phone()?;
    let propagator = harness.tenancy.propagator();

    let report = propagator.propagate(&RequestScope::new(), &change)?;
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].namespace, acme.namespace);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].namespace, globex.namespace);
    assert!(!columns(&harness, &globex)?.contains(&"phone".to_string()));
    assert!(harness.ledger(globex.namespace.as_str())?.is_empty());

    let partial = report.clone().into_result();
    assert!(matches!(
        partial,
        Err(PropagationError::PartialFailure {
            ..
        })
    ));

    let context = harness.context(&globex)?;
    harness.execute_as(&context, "DELETE FROM contacts")?;
    let retried = propagator.retry_failed(&RequestScope::new(), &change, &report)?;
    assert_eq!(retried.applied.len(), 1);
    assert_eq!(retried.applied[0].namespace, globex.namespace);
    assert!(retried.failed.is_empty());
    assert!(columns(&harness, &globex)?.contains(&"phone".to_string()));
    assert_eq!(
        harness.ledger(acme.namespace.as_str())?,
        harness.ledger(globex.namespace.as_str())?
    );
    Ok(())
}

#[test]
fn retry_rejects_a_report_for_another_change() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    harness.onboard("acme")?;
    let propagator = harness.tenancy.propagator();
    let report = propagator.propagate(&RequestScope::new(), &add_phone()?)?;

    let other = SchemaChange::new(ChangeId::parse("0003_add_title")?, "SELECT 1");
    let result = propagator.retry_failed(&RequestScope::new(), &other, &report);
    assert!(matches!(
        result,
        Err(PropagationError::ChangeMismatch {
            ..
        })
    ));
    Ok(())
}

#[test]
fn unprovisioned_tenants_are_deferred() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    harness.onboard("acme")?;
    let pending = harness.register("globex")?;

    let report = harness.tenancy.propagator().propagate(&RequestScope::new(), &add_phone()?)?;
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].namespace, pending.namespace);
    assert_eq!(report.deferred[0].reason, DeferReason::NotProvisioned);
    assert!(!report.is_complete());
    Ok(())
}

#[test]
fn change_deferred_for_a_partial_namespace_lands_after_provisioning() -> Result<(), Box<dyn Error>>
{
    let harness = PgHarness::start()?;
    let pending = harness.register("globex")?;
    let schema = quote_ident(pending.namespace.as_str());
    harness.client()?.batch_execute(&format!(
        "CREATE SCHEMA {schema}; CREATE TABLE {schema}.contacts (id BIGINT PRIMARY KEY, \
         company_id BIGINT NOT NULL, email TEXT NOT NULL)"
    ))?;
    let change = add_phone()?;
    harness.execute_in_template(&change.script)?;

    let report = harness.tenancy.propagator().propagate(&RequestScope::new(), &change)?;
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].reason, DeferReason::NotProvisioned);

    harness.tenancy.provisioning().provision(&RequestScope::new(), &pending.id)?;
    assert!(columns(&harness, &pending)?.contains(&"phone".to_string()));
    assert_eq!(harness.ledger(pending.namespace.as_str())?, vec!["0002_add_phone".to_string()]);

    let next = harness.tenancy.propagator().propagate(&RequestScope::new(), &change)?;
    assert!(next.is_complete());
    assert_eq!(next.already_applied.len(), 1);
    Ok(())
}

#[test]
fn later_tenants_inherit_recorded_changes() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    harness.onboard("acme")?;
    let change = add_phone()?;
    harness.tenancy.propagator().propagate(&RequestScope::new(), &change)?;
    harness.execute_in_template(&change.script)?;

    let globex = harness.onboard("globex")?;
    assert!(columns(&harness, &globex)?.contains(&"phone".to_string()));
    assert_eq!(harness.ledger(globex.namespace.as_str())?, vec!["0002_add_phone".to_string()]);

    let report = harness.tenancy.propagator().propagate(&RequestScope::new(), &change)?;
    assert!(report.applied.is_empty());
    assert_eq!(report.already_applied.len(), 2);
    Ok(())
}

#[test]
fn change_scripts_run_inside_the_bound_namespace() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let acme = harness.onboard("acme")?;
    let change = SchemaChange::new(
        ChangeId::parse("0004_audit_log")?,
        "CREATE TABLE audit_log (id BIGSERIAL PRIMARY KEY, entry TEXT NOT NULL)",
    );

    harness.tenancy.propagator().propagate(&RequestScope::new(), &change)?;
    assert!(harness.tables_in(acme.namespace.as_str())?.contains(&"audit_log".to_string()));
    for schema in [&harness.config.template_namespace, &harness.config.registry_schema] {
        assert!(!harness.tables_in(schema)?.contains(&"audit_log".to_string()), "{schema}");
    }
    Ok(())
}
