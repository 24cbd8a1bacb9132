//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `edugate_test`)
//!   `TEST_DB_PASSWORD` (default: `edugate_test`)
//!   `TEST_DB_NAME` (default: `edugate_test`)

#![allow(clippy::unwrap_used, clippy::expect_used)]

use edugate_common::{AppError, IdGenerator};
use edugate_db::db_error;
use edugate_db::entities::user_device;
use edugate_db::error::ACTIVE_FINGERPRINT_INDEX;
use edugate_db::test_utils::{TestDatabase, TestDbConfig};
use sea_orm::{ActiveModelTrait, DbErr, Set};

fn new_device(user_id: &str, fingerprint: &str, is_primary: bool) -> user_device::ActiveModel {
    let now = chrono::Utc::now();
    user_device::ActiveModel {
        id: Set(IdGenerator::new().generate()),
        user_id: Set(user_id.to_string()),
        fingerprint: Set(fingerprint.to_string()),
        browser_name: Set("unknown".to_string()),
        browser_version: Set("unknown".to_string()),
        os_name: Set("unknown".to_string()),
        os_version: Set("unknown".to_string()),
        hardware_info: Set(None),
        security_fingerprints: Set(None),
        is_primary: Set(is_primary),
        is_active: Set(true),
        last_used: Set(now.into()),
        created_at: Set(now.into()),
        updated_at: Set(None),
    }
}

async fn insert(db: &TestDatabase, model: user_device::ActiveModel) -> Result<user_device::Model, DbErr> {
    model.insert(db.conn.as_ref()).await
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_second_active_primary_is_rejected() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    let user = db.create_user("alice").await.unwrap();

    insert(&db, new_device(&user.id, "fp-a", true)).await.unwrap();
    let err = insert(&db, new_device(&user.id, "fp-b", true))
        .await
        .expect_err("second primary must be rejected");

    assert!(matches!(db_error(err), AppError::Conflict(_)));

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_inactive_primary_does_not_count() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    let user = db.create_user("bob").await.unwrap();

    let first = insert(&db, new_device(&user.id, "fp-a", true)).await.unwrap();
    let mut active: user_device::ActiveModel = first.into();
    active.is_active = Set(false);
    active.update(db.conn.as_ref()).await.unwrap();

    let second = insert(&db, new_device(&user.id, "fp-b", true)).await;
    assert!(second.is_ok(), "insert failed: {:?}", second.err());

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_primaries_of_different_users_coexist() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    let alice = db.create_user("alice").await.unwrap();
    let bob = db.create_user("bob").await.unwrap();

    insert(&db, new_device(&alice.id, "fp-shared", true)).await.unwrap();
    let result = insert(&db, new_device(&bob.id, "fp-shared", true)).await;
    assert!(result.is_ok(), "insert failed: {:?}", result.err());

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_duplicate_active_fingerprint_is_rejected() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    let user = db.create_user("carol").await.unwrap();

    insert(&db, new_device(&user.id, "fp-a", false)).await.unwrap();
    let err = insert(&db, new_device(&user.id, "fp-a", false))
        .await
        .expect_err("duplicate fingerprint must be rejected");

    assert!(matches!(
        db_error(err),
        AppError::Conflict(detail) if detail.contains(ACTIVE_FINGERPRINT_INDEX)
    ));

    db.drop_database().await.unwrap();
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(!config.username.is_empty());
    assert!(!config.database.is_empty());
}

#[test]
fn test_postgres_url_format() {
    let config = TestDbConfig::default();
    let url = config.postgres_url();
    assert!(url.starts_with("postgres://"));
    assert!(url.ends_with("/postgres"));
}
