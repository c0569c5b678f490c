// crates/tenancy-core/src/runtime/coordinator.rs
// ============================================================================
// Module: Namespace-Scoped Connection Coordinator
// Description: Binds pooled connections to one namespace per operation.
// Purpose: Guarantee reset-before-release on every exit path.
// Dependencies: r2d2, thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! The coordinator owns the shared [`r2d2::Pool`]. Each call checks out one
//! connection, binds it to exactly one namespace, runs the caller's unit of
//! work and resets the connection before it returns to the pool.
//!
//! Security posture: the reset runs from a drop guard, so it also runs when
//! the work panics. Pool connections are wrapped in [`ScopedConnection`];
//! a connection that is still bound or whose reset failed reports itself
//! broken and the pool discards it instead of handing it to another tenant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use r2d2::ManageConnection;
use r2d2::Pool;
use r2d2::PooledConnection;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditOutcome;
use crate::audit::SharedAuditSink;
use crate::audit::TenancyAuditEvent;
use crate::audit::TenancyAuditSink;
use crate::core::NamespaceName;
use crate::core::TenantContext;
use crate::core::TenantId;
use crate::interfaces::BindOptions;
use crate::interfaces::NamespaceSession;
use crate::interfaces::SessionError;
use crate::runtime::scope::RequestScope;
use crate::runtime::scope::ScopeInterrupt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit event emitted when pool acquisition fails.
pub const EVENT_ACQUIRE: &str = "namespace.acquire";
/// Audit event emitted when a bind fails.
pub const EVENT_BIND: &str = "namespace.bind";
/// Audit event emitted when a reset fails and the connection is discarded.
pub const EVENT_RESET: &str = "namespace.reset";

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Pool sizing and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Idle connections kept open; also established eagerly at startup.
    pub min_idle: Option<u32>,
    /// Timeout for establishing a new connection.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
    /// Server-side statement timeout applied on bind.
    pub statement_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 16,
            min_idle: Some(1),
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolSettings {
    /// Checks the settings the pool builder would otherwise panic on.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorBuildError::Invalid`] for unusable values.
    pub fn validate(&self) -> Result<(), CoordinatorBuildError> {
        if self.max_connections == 0 {
            return Err(CoordinatorBuildError::Invalid("max_connections must be > 0".to_string()));
        }
        if self.min_idle.is_some_and(|idle| idle > self.max_connections) {
            return Err(CoordinatorBuildError::Invalid(
                "min_idle must not exceed max_connections".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.acquire_timeout.is_zero() {
            return Err(CoordinatorBuildError::Invalid("timeouts must be > 0".to_string()));
        }
        if self.statement_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(CoordinatorBuildError::Invalid(
                "statement_timeout must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Coordinator construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorBuildError {
    /// Settings rejected.
    #[error("invalid pool settings: {0}")]
    Invalid(String),
    /// Pool could not be initialized.
    #[error("pool initialization failed: {0}")]
    Pool(String),
}

/// A connection could not be bound; business work never ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingFailure {
    /// No pooled connection became available in time.
    #[error("no connection available after {waited_ms} ms: {detail}")]
    PoolExhausted {
        /// Time spent waiting.
        waited_ms: u64,
        /// Pool error detail.
        detail: String,
    },
    /// Backend rejected the bind.
    #[error("failed to bind namespace {namespace}: {error}")]
    Bind {
        /// Namespace requested.
        namespace: String,
        /// Backend error.
        error: SessionError,
    },
    /// Session failed a work-independent operation.
    #[error("session error: {0}")]
    Session(SessionError),
    /// Scope cancelled before binding.
    #[error("request cancelled before binding")]
    Cancelled,
    /// Scope deadline passed before binding.
    #[error("request deadline exceeded before binding")]
    DeadlineExceeded,
}

impl From<ScopeInterrupt> for BindingFailure {
    fn from(interrupt: ScopeInterrupt) -> Self {
        match interrupt {
            ScopeInterrupt::Cancelled => Self::Cancelled,
            ScopeInterrupt::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Outcome of a coordinated unit of work.
#[derive(Debug, Error)]
pub enum CoordinatorError<E> {
    /// Binding failed; the work did not run.
    #[error(transparent)]
    Binding(#[from] BindingFailure),
    /// The work ran and returned an error.
    #[error("{0}")]
    Work(E),
}

impl<E> CoordinatorError<E> {
    /// Returns the binding failure, if binding failed.
    #[must_use]
    pub const fn binding(&self) -> Option<&BindingFailure> {
        match self {
            Self::Binding(failure) => Some(failure),
            Self::Work(_) => None,
        }
    }

    /// Maps the work error.
    pub fn map_work<F, O>(self, op: O) -> CoordinatorError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::Binding(failure) => CoordinatorError::Binding(failure),
            Self::Work(error) => CoordinatorError::Work(op(error)),
        }
    }
}

/// Pool manager errors surfaced to `r2d2`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceManagerError {
    /// Backend connection failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Liveness check failed.
    #[error("connection check failed: {0}")]
    Session(#[from] SessionError),
    /// Connection was checked out while still bound or unreset.
    #[error("connection still bound to a namespace")]
    StaleBinding,
}

// ============================================================================
// SECTION: Pool Wrapper
// ============================================================================

/// Pooled session plus its binding state.
pub struct ScopedConnection<C> {
    /// Backend session.
    session: C,
    /// Namespace currently bound, if any.
    bound: Option<NamespaceName>,
    /// Set when a bind or reset failed; the pool must discard the connection.
    tainted: bool,
}

impl<C> ScopedConnection<C> {
    /// Returns the namespace currently bound.
    #[must_use]
    pub const fn bound_namespace(&self) -> Option<&NamespaceName> {
        self.bound.as_ref()
    }

    /// Returns true when the connection must not be reused.
    #[must_use]
    pub const fn is_tainted(&self) -> bool {
        self.tainted
    }
}

/// `r2d2` manager that wraps sessions in [`ScopedConnection`].
#[derive(Debug)]
pub struct NamespaceManager<M> {
    /// Backend manager.
    inner: M,
}

impl<M> NamespaceManager<M> {
    /// Wraps a backend manager.
    #[must_use]
    pub const fn new(inner: M) -> Self {
        Self {
            inner,
        }
    }
}

impl<M> ManageConnection for NamespaceManager<M>
where
    M: ManageConnection,
    M::Connection: NamespaceSession,
{
    type Connection = ScopedConnection<M::Connection>;
    type Error = NamespaceManagerError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let session =
            self.inner.connect().map_err(|err| NamespaceManagerError::Connect(err.to_string()))?;
        Ok(ScopedConnection {
            session,
            bound: None,
            tainted: false,
        })
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if conn.tainted || conn.bound.is_some() {
            return Err(NamespaceManagerError::StaleBinding);
        }
        conn.session.ping()?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.tainted || conn.bound.is_some() || self.inner.has_broken(&mut conn.session)
    }
}

// ============================================================================
// SECTION: Binding Guard
// ============================================================================

/// Resets the wrapped connection when dropped, unless already released.
struct BindingGuard<'a, C: NamespaceSession> {
    /// Connection under guard.
    conn: &'a mut ScopedConnection<C>,
    /// Audit sink for failures.
    audit: &'a dyn TenancyAuditSink,
    /// Tenant, when the binding came from a tenant context.
    tenant_id: Option<TenantId>,
    /// Set once the reset ran.
    released: bool,
}

impl<'a, C: NamespaceSession> BindingGuard<'a, C> {
    fn new(
        conn: &'a mut ScopedConnection<C>,
        audit: &'a dyn TenancyAuditSink,
        tenant_id: Option<TenantId>,
    ) -> Self {
        Self {
            conn,
            audit,
            tenant_id,
            released: false,
        }
    }

    fn bind(
        &mut self,
        namespace: &NamespaceName,
        options: &BindOptions,
    ) -> Result<(), BindingFailure> {
        self.conn.bound = Some(namespace.clone());
        match self.conn.session.bind_namespace(namespace, options) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.conn.tainted = true;
                self.audit.record(&self.event(
                    EVENT_BIND,
                    AuditOutcome::Error,
                    Some(namespace),
                    &error,
                ));
                Err(BindingFailure::Bind {
                    namespace: namespace.to_string(),
                    error,
                })
            }
        }
    }

    fn session(&mut self) -> &mut C {
        &mut self.conn.session
    }

    fn release(&mut self) -> Result<(), SessionError> {
        self.released = true;
        let namespace = self.conn.bound.take();
        match self.conn.session.reset_namespace() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.conn.tainted = true;
                self.audit.record(
                    &self
                        .event(EVENT_RESET, AuditOutcome::Error, namespace.as_ref(), &error)
                        .with_detail(format!("connection discarded: {error}")),
                );
                Err(error)
            }
        }
    }

    fn event(
        &self,
        name: &'static str,
        outcome: AuditOutcome,
        namespace: Option<&NamespaceName>,
        error: &SessionError,
    ) -> TenancyAuditEvent {
        let mut event = TenancyAuditEvent::new(name, outcome).with_detail(error);
        if let Some(namespace) = namespace {
            event = event.with_namespace(namespace);
        }
        if let Some(tenant_id) = &self.tenant_id {
            event = event.with_tenant(tenant_id);
        }
        event
    }
}

impl<C: NamespaceSession> Drop for BindingGuard<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.release();
        }
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
    /// Configured maximum.
    pub max_connections: u32,
}

/// Shared-pool coordinator enforcing bind/reset discipline.
pub struct NamespaceCoordinator<M>
where
    M: ManageConnection,
    M::Connection: NamespaceSession,
{
    /// Shared connection pool.
    pool: Pool<NamespaceManager<M>>,
    /// Pool settings.
    settings: PoolSettings,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl<M> Clone for NamespaceCoordinator<M>
where
    M: ManageConnection,
    M::Connection: NamespaceSession,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            settings: self.settings.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<M> NamespaceCoordinator<M>
where
    M: ManageConnection,
    M::Connection: NamespaceSession,
{
    /// Builds the shared pool over `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorBuildError`] when settings are invalid or the
    /// initial `min_idle` connections cannot be opened.
    pub fn new(
        manager: M,
        settings: PoolSettings,
        audit: SharedAuditSink,
    ) -> Result<Self, CoordinatorBuildError> {
        settings.validate()?;
        let pool = Pool::builder()
            .max_size(settings.max_connections)
            .min_idle(settings.min_idle)
            .connection_timeout(settings.connect_timeout)
            .build(NamespaceManager::new(manager))
            .map_err(|err| CoordinatorBuildError::Pool(err.to_string()))?;
        Ok(Self {
            pool,
            settings,
            audit,
        })
    }

    /// Returns the pool settings.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Returns the audit sink.
    #[must_use]
    pub fn audit(&self) -> SharedAuditSink {
        self.audit.clone()
    }

    /// Runs `work` bound to the tenant's namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Binding`] when no bound connection could
    /// be obtained, or [`CoordinatorError::Work`] with the work's error.
    pub fn with_tenant<T, E, F>(
        &self,
        scope: &RequestScope,
        context: &TenantContext,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, E>,
    {
        self.run(scope, Some(context.namespace()), Some(*context.tenant_id()), work)
    }

    /// Runs `work` bound to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Binding`] when no bound connection could
    /// be obtained, or [`CoordinatorError::Work`] with the work's error.
    pub fn with_namespace<T, E, F>(
        &self,
        scope: &RequestScope,
        namespace: &NamespaceName,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, E>,
    {
        self.run(scope, Some(namespace), None, work)
    }

    /// Runs `work` on a namespace-neutral session. Used for catalog and
    /// registry statements, which qualify every object name.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] as for [`Self::with_namespace`].
    pub fn with_admin_session<T, E, F>(
        &self,
        scope: &RequestScope,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, E>,
    {
        self.run(scope, None, None, work)
    }

    /// Checks database liveness without binding any namespace.
    ///
    /// # Errors
    ///
    /// Returns [`BindingFailure`] when no connection is available or the
    /// ping fails.
    pub fn ping(&self, scope: &RequestScope) -> Result<(), BindingFailure> {
        self.with_admin_session(scope, |session: &mut M::Connection| session.ping()).map_err(
            |err| match err {
                CoordinatorError::Binding(failure) => failure,
                CoordinatorError::Work(error) => BindingFailure::Session(error),
            },
        )
    }

    /// Returns pool statistics.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_connections: self.pool.max_size(),
        }
    }

    fn run<T, E, F>(
        &self,
        scope: &RequestScope,
        namespace: Option<&NamespaceName>,
        tenant_id: Option<TenantId>,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, E>,
    {
        scope.check().map_err(BindingFailure::from)?;
        let mut conn = self.acquire(scope, namespace)?;
        // Cancellation may have fired while waiting on the pool.
        scope.check().map_err(BindingFailure::from)?;

        let options = BindOptions {
            statement_timeout: self.statement_timeout(scope),
        };
        let mut guard = BindingGuard::new(&mut *conn, self.audit.as_ref(), tenant_id);
        if let Some(namespace) = namespace {
            guard.bind(namespace, &options)?;
        }
        let result = work(guard.session());
        // Reset failures are audited and the connection is discarded; the
        // work already completed, so its result stands.
        let _ = guard.release();
        result.map_err(CoordinatorError::Work)
    }

    fn acquire(
        &self,
        scope: &RequestScope,
        namespace: Option<&NamespaceName>,
    ) -> Result<PooledConnection<NamespaceManager<M>>, BindingFailure> {
        let timeout = scope.clamp(self.settings.acquire_timeout);
        if timeout.is_zero() {
            return Err(BindingFailure::DeadlineExceeded);
        }
        self.pool.get_timeout(timeout).map_err(|err| {
            let mut event = TenancyAuditEvent::new(EVENT_ACQUIRE, AuditOutcome::Error)
                .with_detail(err.to_string());
            if let Some(namespace) = namespace {
                event = event.with_namespace(namespace);
            }
            self.audit.record(&event);
            BindingFailure::PoolExhausted {
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                detail: err.to_string(),
            }
        })
    }

    fn statement_timeout(&self, scope: &RequestScope) -> Option<Duration> {
        match (self.settings.statement_timeout, scope.remaining()) {
            (Some(limit), _) => Some(scope.clamp(limit)),
            (None, remaining) => remaining,
        }
    }
}
