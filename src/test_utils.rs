//! Shared test fixtures: database setup and lease builders.

use sqlx::SqlitePool;

use crate::lease::{self, LeaseAgreement, NewLease};

pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Inserts a lease with deterministic tenant data and returns the row.
pub(crate) async fn insert_test_lease(pool: &SqlitePool) -> LeaseAgreement {
    let new_lease = NewLease {
        tenant_name: "Joana Teste".to_owned(),
        tenant_email: "joana@example.com".to_owned(),
        tenant_registration: "52998224725".to_owned(),
        tenant_phone_1: Some("11987654321".to_owned()),
        tenant_phone_2: None,
    };

    let lease_id = lease::insert(pool, &new_lease).await.unwrap();
    lease::find_by_id(pool, lease_id).await.unwrap().unwrap()
}
