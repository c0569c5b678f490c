// system-tests/tests/suites/postgres_provisioning.rs
// ============================================================================
// Module: Postgres Provisioning Tests
// Description: Namespace cloning, resume, verification and teardown.
// Purpose: Ensure tenant namespaces mirror the template on a real catalog.
// Dependencies: system-tests helpers
// ============================================================================

use std::error::Error;

use helpers::harness::PgHarness;
use helpers::harness::TEMPLATE_TABLES;
use tenancy_core::NamespaceState;
use tenancy_core::ProvisionError;
use tenancy_core::ProvisionOutcome;
use tenancy_core::RegistryError;
use tenancy_core::RequestScope;
use tenancy_core::Subdomain;
use tenancy_core::TenantName;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantStatus;
use tenancy_core::quote_ident;
use tenancy_store_postgres::PgSession;

use crate::helpers;

#[test]
fn provision_clones_every_template_table() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.register("acme")?;
    assert_eq!(record.status, TenantStatus::Pending);

    let report = harness.tenancy.provisioning().provision(&RequestScope::new(), &record.id)?;
    assert_eq!(report.outcome, ProvisionOutcome::Created);
    assert_eq!(report.tables_created, TEMPLATE_TABLES.map(String::from).to_vec());
    assert_eq!(report.foreign_keys_added, 2);
    assert_eq!(report.status, TenantStatus::Active);
    assert_eq!(harness.tables_in(record.namespace.as_str())?, TEMPLATE_TABLES.to_vec());

    let state = harness.tenancy.provisioning().verify(&RequestScope::new(), &record.id)?;
    assert_eq!(state, NamespaceState::Complete);
    assert!(!harness.audit.events_named("namespace.provision").is_empty());
    Ok(())
}

#[test]
fn foreign_keys_and_sequences_point_into_the_tenant_namespace() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;
    let namespace = record.namespace.as_str();
    let mut client = harness.client()?;

    let referenced: Vec<String> = client
        .query(
            "SELECT rn.nspname::text FROM pg_constraint c JOIN pg_namespace n ON n.oid = \
             c.connamespace JOIN pg_class r ON r.oid = c.confrelid JOIN pg_namespace rn ON rn.oid \
             = r.relnamespace WHERE c.contype = 'f' AND n.nspname = $1",
            &[&namespace],
        )?
        .into_iter()
        .map(|row| row.get(0))
        .collect();
    assert_eq!(referenced.len(), 2);
    assert!(referenced.iter().all(|schema| schema == namespace));

    let default: String = client
        .query_one(
            "SELECT column_default::text FROM information_schema.columns WHERE table_schema = $1 \
             AND table_name = 'companies' AND column_name = 'id'",
            &[&namespace],
        )?
        .get(0);
    assert!(default.contains(namespace), "{default}");
    assert!(!default.contains(&harness.config.template_namespace), "{default}");

    let context = harness.context(&record)?;
    let orphan = harness.execute_as(
        &context,
        "INSERT INTO contacts (company_id, email) VALUES (999, 'nobody@example.com')",
    );
    assert!(orphan.is_err());
    Ok(())
}

#[test]
fn second_provision_is_a_noop() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;

    let report = harness.tenancy.provisioning().provision(&RequestScope::new(), &record.id)?;
    assert_eq!(report.outcome, ProvisionOutcome::AlreadyComplete);
    assert!(report.tables_created.is_empty());
    assert_eq!(report.foreign_keys_added, 0);
    assert_eq!(harness.tables_in(record.namespace.as_str())?, TEMPLATE_TABLES.to_vec());
    Ok(())
}

#[test]
fn interrupted_provisioning_is_resumed() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;
    let namespace = quote_ident(record.namespace.as_str());
    let damage = format!("DROP TABLE {namespace}.deals; COMMENT ON SCHEMA {namespace} IS NULL");
    harness.client()?.batch_execute(&damage)?;

    let state = harness.tenancy.provisioning().verify(&RequestScope::new(), &record.id)?;
    assert_eq!(
        state,
        NamespaceState::Incomplete {
            missing_tables: vec!["deals".to_string()],
            marked: false,
        }
    );

    let report = harness.tenancy.provisioning().provision(&RequestScope::new(), &record.id)?;
    assert_eq!(report.outcome, ProvisionOutcome::Resumed);
    assert_eq!(report.tables_created, vec!["deals".to_string()]);
    assert_eq!(report.foreign_keys_added, 1);
    assert_eq!(
        harness.tenancy.provisioning().verify(&RequestScope::new(), &record.id)?,
        NamespaceState::Complete
    );
    Ok(())
}

#[test]
fn unprovisioned_namespace_is_missing() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.register("acme")?;
    let state = harness.tenancy.provisioning().verify(&RequestScope::new(), &record.id)?;
    assert_eq!(state, NamespaceState::Missing);
    Ok(())
}

#[test]
fn empty_template_is_rejected() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start_with("", |_| {})?;
    let record = harness.register("acme")?;
    let result = harness.tenancy.provisioning().provision(&RequestScope::new(), &record.id);
    assert!(matches!(result, Err(ProvisionError::EmptyTemplate(_))));
    assert_eq!(
        harness.tenancy.registry().lookup_by_id(&record.id)?.map(|record| record.status),
        Some(TenantStatus::Pending)
    );
    Ok(())
}

#[test]
fn teardown_requires_suspension_and_keeps_the_record() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;
    let provisioning = harness.tenancy.provisioning();

    let active = provisioning.teardown(&RequestScope::new(), &record.id);
    assert!(matches!(
        active,
        Err(ProvisionError::NotSuspended {
            ..
        })
    ));

    harness.tenancy.registry().set_status(&record.id, TenantStatus::Suspended)?;
    assert!(provisioning.teardown(&RequestScope::new(), &record.id)?);
    assert_eq!(provisioning.verify(&RequestScope::new(), &record.id)?, NamespaceState::Missing);
    assert!(harness.ledger(record.namespace.as_str())?.is_empty());
    assert!(!provisioning.teardown(&RequestScope::new(), &record.id)?);

    let kept = harness.tenancy.registry().lookup_by_id(&record.id)?;
    assert_eq!(kept.map(|record| record.status), Some(TenantStatus::Suspended));
    Ok(())
}

#[test]
fn seed_runs_bound_to_a_complete_namespace() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let pending = harness.register("globex")?;
    let record = harness.onboard("acme")?;

    let refused = harness.tenancy.provisioning().seed_bootstrap(
        &RequestScope::new(),
        &pending.id,
        |_: &mut PgSession| Ok::<(), postgres::Error>(()),
    );
    assert!(matches!(
        refused,
        Err(ProvisionError::NotActive {
            status: TenantStatus::Pending,
            ..
        })
    ));

    let seeded = harness.tenancy.provisioning().seed_bootstrap(
        &RequestScope::new(),
        &record.id,
        |session: &mut PgSession| {
            session.client().execute("INSERT INTO companies (name) VALUES ('Acme HQ')", &[])
        },
    )?;
    assert_eq!(seeded, 1);
    assert_eq!(harness.count_as(&harness.context(&record)?, "companies")?, 1);
    Ok(())
}

#[test]
fn duplicate_subdomain_conflicts_without_side_effects() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    harness.register("acme")?;

    let duplicate = harness
        .tenancy
        .registry()
        .create(&TenantName::parse("Acme Again")?, &Subdomain::parse("acme")?);
    assert!(matches!(duplicate, Err(RegistryError::Conflict(_))));
    assert_eq!(harness.tenancy.registry().list()?.len(), 1);
    assert_eq!(harness.audit.events_named("tenant.create").len(), 2);
    Ok(())
}

#[test]
fn tampered_namespace_column_is_reported_corrupt() -> Result<(), Box<dyn Error>> {
    let harness = PgHarness::start()?;
    let record = harness.onboard("acme")?;
    let other = harness.register("globex")?;
    let table = format!("{}.tenants", quote_ident(&harness.config.registry_schema));
    let mut client = harness.client()?;
    let forged = format!("{}_forged", other.namespace);

    client.execute(
        format!("UPDATE {table} SET namespace_name = $1 WHERE tenant_id = $2").as_str(),
        &[&forged, &record.id.to_string()],
    )?;
    let lookup = harness.tenancy.registry().lookup_by_id(&record.id);
    assert!(matches!(lookup, Err(RegistryError::Corrupt(_))));
    assert!(harness.tenancy.resolver().resolve("acme").is_err());

    client.execute(
        format!("UPDATE {table} SET namespace_name = $1 WHERE tenant_id = $2").as_str(),
        &[&record.namespace.as_str(), &record.id.to_string()],
    )?;
    assert!(harness.tenancy.resolver().resolve("acme").is_ok());
    Ok(())
}
