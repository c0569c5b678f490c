// crates/tenancy-core/tests/registry.rs
// ============================================================================
// Module: Tenant Registry Tests
// Description: Registration, uniqueness and status transitions.
// ============================================================================

//! Registry integration tests over the in-memory registry.

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

use std::sync::Arc;
use std::thread;

use tenancy_core::InMemoryTenantRegistry;
use tenancy_core::NamespaceName;
use tenancy_core::RegistryError;
use tenancy_core::Subdomain;
use tenancy_core::TenantId;
use tenancy_core::TenantName;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantStatus;

fn name(value: &str) -> TenantName {
    TenantName::parse(value).unwrap()
}

fn subdomain(value: &str) -> Subdomain {
    Subdomain::parse(value).unwrap()
}

#[test]
fn created_tenant_is_pending_with_derived_namespace() {
    let registry = InMemoryTenantRegistry::new();
    let record = registry.create(&name("Acme Corp"), &subdomain("acme")).unwrap();

    assert_eq!(record.status, TenantStatus::Pending);
    assert_eq!(record.namespace, NamespaceName::for_tenant(&record.id));
    assert!(record.namespace_is_derived());
    assert_eq!(registry.lookup(&subdomain("acme")).unwrap(), Some(record.clone()));
    assert_eq!(registry.lookup_by_id(&record.id).unwrap(), Some(record));
}

#[test]
fn duplicate_subdomain_is_a_conflict_and_changes_nothing() {
    let registry = InMemoryTenantRegistry::new();
    let first = registry.create(&name("Acme"), &subdomain("acme")).unwrap();

    let err = registry.create(&name("Other Acme"), &subdomain("acme")).unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));
    let listed = registry.list().unwrap();
    assert_eq!(listed, vec![first.clone()]);
    assert_eq!(registry.lookup(&subdomain("acme")).unwrap().unwrap().name, first.name);
}

#[test]
fn unknown_lookups_return_none() {
    let registry = InMemoryTenantRegistry::new();
    assert_eq!(registry.lookup(&subdomain("acme")).unwrap(), None);
    assert_eq!(registry.lookup_by_id(&TenantId::generate()).unwrap(), None);
    assert!(!registry.exists(&subdomain("acme")).unwrap());
}

#[test]
fn status_transitions_update_the_record() {
    let registry = InMemoryTenantRegistry::new();
    let record = registry.create(&name("Acme"), &subdomain("acme")).unwrap();

    let active = registry.set_status(&record.id, TenantStatus::Active).unwrap();
    assert_eq!(active.status, TenantStatus::Active);
    assert!(active.updated_at >= record.updated_at);
    assert_eq!(active.namespace, record.namespace);

    let err = registry.set_status(&TenantId::generate(), TenantStatus::Suspended).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[test]
fn concurrent_registrations_of_one_subdomain_admit_exactly_one() {
    let registry = Arc::new(InMemoryTenantRegistry::new());
    let workers: Vec<_> = (0 .. 8)
        .map(|index| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.create(&name(&format!("Acme {index}")), &subdomain("acme")).is_ok()
            })
        })
        .collect();
    let created = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .filter(|created| *created)
        .count();
    assert_eq!(created, 1);
    assert_eq!(registry.list().unwrap().len(), 1);
}

#[test]
fn tenants_get_distinct_namespaces() {
    let registry = InMemoryTenantRegistry::new();
    let records: Vec<_> = ["acme", "globex", "initech"]
        .into_iter()
        .map(|value| registry.create(&name(value), &subdomain(value)).unwrap())
        .collect();
    for (index, record) in records.iter().enumerate() {
        for other in &records[index + 1 ..] {
            assert_ne!(record.namespace, other.namespace);
        }
    }
}
