//! Persisted rental-contract records and their signature-status queries.
//!
//! The lease row is the only shared mutable state between the webhook
//! path and the scheduled poller. Every mutation here is a single keyed
//! `UPDATE` with a state condition, so concurrent reconciliations degrade
//! to one winner and no lost updates.

use sqlx::SqlitePool;

use crate::assinafy::{DocumentId, PackageId};

/// Canonical signature state of a lease contract.
///
/// Single source of truth: both the webhook and the polling path write
/// this one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum SignatureStatus {
    Pending,
    Signed,
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Signed => write!(f, "signed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LeaseAgreement {
    pub id: i64,
    pub tenant_name: String,
    pub tenant_email: String,
    /// Raw CPF/CNPJ as captured at signup.
    pub tenant_registration: String,
    pub tenant_phone_1: Option<String>,
    pub tenant_phone_2: Option<String>,
    pub signature_status: SignatureStatus,
    pub document_id: Option<DocumentId>,
    pub package_id: Option<PackageId>,
}

/// Fields for registering a new lease contract.
#[derive(Debug, Clone)]
pub struct NewLease {
    pub tenant_name: String,
    pub tenant_email: String,
    pub tenant_registration: String,
    pub tenant_phone_1: Option<String>,
    pub tenant_phone_2: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseUpdateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("lease {lease_id} is missing or already carries a provider document id")]
    DocumentIdAlreadySet { lease_id: i64 },
}

const LEASE_COLUMNS: &str = "id, tenant_name, tenant_email, tenant_registration, \
     tenant_phone_1, tenant_phone_2, signature_status, document_id, package_id";

pub async fn insert(pool: &SqlitePool, lease: &NewLease) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO leases (tenant_name, tenant_email, tenant_registration, \
         tenant_phone_1, tenant_phone_2) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&lease.tenant_name)
    .bind(&lease.tenant_email)
    .bind(&lease.tenant_registration)
    .bind(&lease.tenant_phone_1)
    .bind(&lease.tenant_phone_2)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_by_id(
    pool: &SqlitePool,
    lease_id: i64,
) -> Result<Option<LeaseAgreement>, sqlx::Error> {
    sqlx::query_as::<_, LeaseAgreement>(&format!(
        "SELECT {LEASE_COLUMNS} FROM leases WHERE id = ?1"
    ))
    .bind(lease_id)
    .fetch_optional(pool)
    .await
}

/// Leases still waiting on a signature that already have a provider
/// document to check against.
pub async fn find_pending_signatures(
    pool: &SqlitePool,
) -> Result<Vec<LeaseAgreement>, sqlx::Error> {
    sqlx::query_as::<_, LeaseAgreement>(&format!(
        "SELECT {LEASE_COLUMNS} FROM leases \
         WHERE signature_status != ?1 AND document_id IS NOT NULL ORDER BY id"
    ))
    .bind(SignatureStatus::Signed)
    .fetch_all(pool)
    .await
}

pub async fn find_by_package_id(
    pool: &SqlitePool,
    package_id: &PackageId,
) -> Result<Option<LeaseAgreement>, sqlx::Error> {
    sqlx::query_as::<_, LeaseAgreement>(&format!(
        "SELECT {LEASE_COLUMNS} FROM leases WHERE package_id = ?1"
    ))
    .bind(package_id)
    .fetch_optional(pool)
    .await
}

/// Records the provider document id for a lease.
///
/// The id is set exactly once; a second write is refused so an upload can
/// never be silently repointed at a different provider document.
pub async fn set_document_id(
    pool: &SqlitePool,
    lease_id: i64,
    document_id: &DocumentId,
) -> Result<(), LeaseUpdateError> {
    let result = sqlx::query(
        "UPDATE leases SET document_id = ?1, updated_at = datetime('now') \
         WHERE id = ?2 AND document_id IS NULL",
    )
    .bind(document_id)
    .bind(lease_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LeaseUpdateError::DocumentIdAlreadySet { lease_id });
    }

    Ok(())
}

pub async fn set_package_id(
    pool: &SqlitePool,
    lease_id: i64,
    package_id: &PackageId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE leases SET package_id = ?1, updated_at = datetime('now') WHERE id = ?2",
    )
    .bind(package_id)
    .bind(lease_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Transitions a lease to signed.
///
/// Conditional on the current status, so whichever of the webhook or the
/// poller gets here first wins; the loser observes `false` and must not
/// repeat the side effects of the transition.
pub async fn mark_signed(pool: &SqlitePool, lease_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE leases SET signature_status = ?1, updated_at = datetime('now') \
         WHERE id = ?2 AND signature_status != ?1",
    )
    .bind(SignatureStatus::Signed)
    .bind(lease_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
