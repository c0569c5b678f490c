// crates/tenancy-core/src/core/identifiers.rs
// ============================================================================
// Module: Tenancy Identifiers
// Description: Validated identifier types for tenants, subdomains and namespaces.
// Purpose: Keep every string that reaches a namespace statement derived or validated.
// Dependencies: serde, thiserror, uuid
// ============================================================================

//! ## Overview
//! Identifiers are validated at construction and carry their invariants in the
//! type. [`NamespaceName`] is the important one: it can only be produced from a
//! [`TenantId`] by [`NamespaceName::for_tenant`], so a namespace name supplied
//! by a caller can never reach a namespace-switching statement.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of every derived tenant namespace.
pub const TENANT_NAMESPACE_PREFIX: &str = "tenant_";
/// Length of the canonical hyphenated tenant id form.
pub const TENANT_ID_LEN: usize = 36;
/// Maximum subdomain length (one DNS label).
pub const MAX_SUBDOMAIN_LEN: usize = 63;
/// Maximum length of a Postgres identifier.
pub const MAX_SQL_IDENTIFIER_LEN: usize = 63;
/// Maximum tenant display name length in characters.
pub const MAX_TENANT_NAME_LEN: usize = 200;
/// Maximum change identifier length.
pub const MAX_CHANGE_ID_LEN: usize = 128;
/// Subdomain labels that can never be claimed by a tenant.
pub const RESERVED_SUBDOMAINS: &[&str] = &["www", "api", "admin", "app", "mail"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identifier validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifier was empty.
    #[error("{kind} must not be empty")]
    Empty {
        /// Identifier kind label.
        kind: &'static str,
    },
    /// Identifier exceeded its maximum length.
    #[error("{kind} exceeds {max} characters")]
    TooLong {
        /// Identifier kind label.
        kind: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
    /// Identifier contained a character outside its alphabet.
    #[error("{kind} contains invalid character '{found}'")]
    InvalidCharacter {
        /// Identifier kind label.
        kind: &'static str,
        /// Offending character.
        found: char,
    },
    /// Identifier did not match its structural pattern.
    #[error("{kind} is malformed: {reason}")]
    Malformed {
        /// Identifier kind label.
        kind: &'static str,
        /// Reason label.
        reason: &'static str,
    },
    /// Identifier is reserved.
    #[error("{kind} '{value}' is reserved")]
    Reserved {
        /// Identifier kind label.
        kind: &'static str,
        /// Reserved value.
        value: String,
    },
}

// ============================================================================
// SECTION: Tenant Id
// ============================================================================

/// Globally unique, time-ordered tenant identifier (UUID version 7).
///
/// # Invariants
/// - Always a version 7 UUID; ordering follows creation time.
/// - Text form is the canonical lowercase hyphenated representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(Uuid);

impl TenantId {
    /// Generates a fresh time-ordered tenant identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses the canonical text form.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is not a canonical version 7 UUID.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "tenant id";
        if value.is_empty() {
            return Err(IdentifierError::Empty {
                kind: KIND,
            });
        }
        if value.len() != TENANT_ID_LEN {
            return Err(IdentifierError::Malformed {
                kind: KIND,
                reason: "expected 36 characters",
            });
        }
        if let Some(found) =
            value.chars().find(|ch| !matches!(ch, '0'..='9' | 'a'..='f' | '-'))
        {
            return Err(IdentifierError::InvalidCharacter {
                kind: KIND,
                found,
            });
        }
        let uuid = Uuid::parse_str(value).map_err(|_| IdentifierError::Malformed {
            kind: KIND,
            reason: "not a uuid",
        })?;
        if uuid.hyphenated().to_string() != value {
            return Err(IdentifierError::Malformed {
                kind: KIND,
                reason: "not in canonical hyphenated form",
            });
        }
        if uuid.get_version_num() != 7 {
            return Err(IdentifierError::Malformed {
                kind: KIND,
                reason: "not a time-ordered (version 7) id",
            });
        }
        Ok(Self(uuid))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.to_string()
    }
}

// ============================================================================
// SECTION: Subdomain
// ============================================================================

/// DNS-safe public tenant handle.
///
/// # Invariants
/// - 1 to 63 characters of `[a-z0-9-]`, no leading or trailing hyphen.
/// - Never one of [`RESERVED_SUBDOMAINS`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subdomain(String);

impl Subdomain {
    /// Validates a subdomain label.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the label is not DNS-safe or is reserved.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "subdomain";
        if value.is_empty() {
            return Err(IdentifierError::Empty {
                kind: KIND,
            });
        }
        if value.len() > MAX_SUBDOMAIN_LEN {
            return Err(IdentifierError::TooLong {
                kind: KIND,
                max: MAX_SUBDOMAIN_LEN,
            });
        }
        if let Some(found) = value.chars().find(|ch| !matches!(ch, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(IdentifierError::InvalidCharacter {
                kind: KIND,
                found,
            });
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(IdentifierError::Malformed {
                kind: KIND,
                reason: "must not start or end with a hyphen",
            });
        }
        if is_tenant_id_shaped(value) {
            return Err(IdentifierError::Malformed {
                kind: KIND,
                reason: "must not have the shape of a tenant id",
            });
        }
        if RESERVED_SUBDOMAINS.contains(&value) {
            return Err(IdentifierError::Reserved {
                kind: KIND,
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subdomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for Subdomain {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Subdomain> for String {
    fn from(value: Subdomain) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Namespace Names
// ============================================================================

/// Database namespace owned by exactly one tenant.
///
/// # Invariants
/// - Only constructible through [`NamespaceName::for_tenant`].
/// - Always matches `^tenant_[0-9a-f]{32}$`, so it is safe to splice into
///   quoted identifiers.
/// - Serializes for display but deliberately has no `Deserialize` impl.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NamespaceName(String);

impl NamespaceName {
    /// Derives the namespace owned by `tenant_id`.
    ///
    /// The mapping is injective: distinct tenant ids never share a namespace.
    #[must_use]
    pub fn for_tenant(tenant_id: &TenantId) -> Self {
        Self(format!("{TENANT_NAMESPACE_PREFIX}{}", tenant_id.as_uuid().simple()))
    }

    /// Returns the namespace name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the double-quoted SQL identifier form.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }

    /// Returns true when `value` has the shape of a derived tenant namespace.
    #[must_use]
    pub fn is_tenant_shaped(value: &str) -> bool {
        value.strip_prefix(TENANT_NAMESPACE_PREFIX).is_some_and(|rest| {
            rest.len() == 32 && rest.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f'))
        })
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Canonical namespace whose structure every tenant namespace copies.
///
/// # Invariants
/// - Lowercase SQL identifier `[a-z_][a-z0-9_]*`, at most 63 characters.
/// - Never tenant-shaped, never a system schema (`pg_*`, `information_schema`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplateNamespace(String);

impl TemplateNamespace {
    /// Validates a template namespace name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the name is not a plain identifier or
    /// collides with the tenant namespace space.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "template namespace";
        validate_schema_identifier(KIND, value)?;
        if NamespaceName::is_tenant_shaped(value) {
            return Err(IdentifierError::Reserved {
                kind: KIND,
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the template namespace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the double-quoted SQL identifier form.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Display for TemplateNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for TemplateNamespace {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TemplateNamespace> for String {
    fn from(value: TemplateNamespace) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Resolver Input
// ============================================================================

/// Parsed form of the raw identifier handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantIdentifier {
    /// Canonical tenant id.
    Id(TenantId),
    /// Public subdomain handle.
    Subdomain(Subdomain),
}

impl TenantIdentifier {
    /// Parses a raw request identifier.
    ///
    /// Values with the fixed tenant id layout are parsed as ids; everything
    /// else must be a subdomain label. Subdomains can never take the id layout,
    /// so the two forms do not overlap.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is neither form.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if is_tenant_id_shaped(raw) {
            return TenantId::parse(raw).map(Self::Id);
        }
        Subdomain::parse(raw).map(Self::Subdomain)
    }
}

impl fmt::Display for TenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => fmt::Display::fmt(id, f),
            Self::Subdomain(subdomain) => fmt::Display::fmt(subdomain, f),
        }
    }
}

// ============================================================================
// SECTION: Other Identifiers
// ============================================================================

/// Validated tenant display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantName(String);

impl TenantName {
    /// Validates a display name; surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the name is empty, too long or contains
    /// control characters.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "tenant name";
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty {
                kind: KIND,
            });
        }
        if trimmed.chars().count() > MAX_TENANT_NAME_LEN {
            return Err(IdentifierError::TooLong {
                kind: KIND,
                max: MAX_TENANT_NAME_LEN,
            });
        }
        if let Some(found) = trimmed.chars().find(|ch| ch.is_control()) {
            return Err(IdentifierError::InvalidCharacter {
                kind: KIND,
                found,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for TenantName {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantName> for String {
    fn from(value: TenantName) -> Self {
        value.0
    }
}

/// Identifier of one structural change propagated from the template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeId(String);

impl ChangeId {
    /// Validates a change identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is empty, too long, or uses
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "change id";
        if value.is_empty() {
            return Err(IdentifierError::Empty {
                kind: KIND,
            });
        }
        if value.len() > MAX_CHANGE_ID_LEN {
            return Err(IdentifierError::TooLong {
                kind: KIND,
                max: MAX_CHANGE_ID_LEN,
            });
        }
        if let Some(found) =
            value.chars().find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')))
        {
            return Err(IdentifierError::InvalidCharacter {
                kind: KIND,
                found,
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for ChangeId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChangeId> for String {
    fn from(value: ChangeId) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates a lowercase schema identifier such as the registry schema.
///
/// # Errors
///
/// Returns [`IdentifierError`] when `value` is not `[a-z_][a-z0-9_]*`, is too
/// long, or names a system schema.
pub fn validate_schema_identifier(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::Empty {
            kind,
        });
    }
    if value.len() > MAX_SQL_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong {
            kind,
            max: MAX_SQL_IDENTIFIER_LEN,
        });
    }
    if let Some(found) = value.chars().find(|ch| !matches!(ch, 'a'..='z' | '0'..='9' | '_')) {
        return Err(IdentifierError::InvalidCharacter {
            kind,
            found,
        });
    }
    if value.starts_with(|ch: char| ch.is_ascii_digit()) {
        return Err(IdentifierError::Malformed {
            kind,
            reason: "must not start with a digit",
        });
    }
    if value.starts_with("pg_") || value == "information_schema" {
        return Err(IdentifierError::Reserved {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Returns true when `value` has the length and hyphen layout of a tenant id.
fn is_tenant_id_shaped(value: &str) -> bool {
    let bytes = value.as_bytes();
    value.len() == TENANT_ID_LEN && [8, 13, 18, 23].iter().all(|idx| bytes.get(*idx) == Some(&b'-'))
}

/// Quotes an SQL identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Quotes an SQL string literal, doubling embedded single quotes.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
