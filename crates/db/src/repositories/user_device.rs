//! User device repository.
//!
//! Read helpers run on the shared connection. Everything that can change
//! `is_primary` takes a [`DatabaseTransaction`] opened by
//! [`UserDeviceRepository::begin_locked`], so callers hold the device-set
//! lock for the whole check-and-mutate sequence.

use std::sync::Arc;
use std::time::Duration;

use crate::db_error;
use crate::entities::{UserDevice, user_device};
use edugate_common::AppResult;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, Func},
};
use serde_json::Value;

/// Client-reported device details stored alongside the fingerprint.
///
/// None of these fields take part in device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub browser_name: String,
    pub browser_version: String,
    pub os_name: String,
    pub os_version: String,
    pub hardware_info: Option<Value>,
    pub security_fingerprints: Option<Value>,
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            browser_name: "unknown".to_string(),
            browser_version: "unknown".to_string(),
            os_name: "unknown".to_string(),
            os_version: "unknown".to_string(),
            hardware_info: None,
            security_fingerprints: None,
        }
    }
}

/// User device repository for database operations.
#[derive(Clone)]
pub struct UserDeviceRepository {
    db: Arc<DatabaseConnection>,
    lock_timeout: Duration,
}

impl UserDeviceRepository {
    /// Create a new user device repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>, lock_timeout: Duration) -> Self {
        Self { db, lock_timeout }
    }

    /// Begin a transaction with a bounded lock wait.
    ///
    /// Any `FOR UPDATE` inside the returned transaction fails with
    /// `LockTimeout` instead of blocking past the configured wait. Dropping
    /// the transaction without committing rolls it back.
    ///
    /// The wait is at least one millisecond: `PostgreSQL` reads `0` as
    /// "wait forever".
    pub async fn begin_locked(&self) -> AppResult<DatabaseTransaction> {
        let txn = self.db.begin().await.map_err(db_error)?;
        txn.execute_unprepared(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis().max(1)
        ))
        .await
        .map_err(db_error)?;
        Ok(txn)
    }

    /// Find the active device for `(user_id, fingerprint)`.
    pub async fn find_active_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> AppResult<Option<user_device::Model>> {
        Self::active_by_fingerprint(user_id, fingerprint)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Active devices of a user, most recently used first.
    pub async fn find_active_by_user(&self, user_id: &str) -> AppResult<Vec<user_device::Model>> {
        UserDevice::find()
            .filter(user_device::Column::UserId.eq(user_id))
            .filter(user_device::Column::IsActive.eq(true))
            .order_by_desc(user_device::Column::LastUsed)
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Lock and return every active device of a user, most recently used first.
    pub async fn lock_active_by_user(
        &self,
        txn: &DatabaseTransaction,
        user_id: &str,
    ) -> AppResult<Vec<user_device::Model>> {
        UserDevice::find()
            .filter(user_device::Column::UserId.eq(user_id))
            .filter(user_device::Column::IsActive.eq(true))
            .order_by_desc(user_device::Column::LastUsed)
            .order_by_desc(user_device::Column::CreatedAt)
            .order_by_desc(user_device::Column::Id)
            .lock_exclusive()
            .all(txn)
            .await
            .map_err(db_error)
    }

    /// Insert a new device inside `txn`.
    pub async fn insert(
        &self,
        txn: &DatabaseTransaction,
        model: user_device::ActiveModel,
    ) -> AppResult<user_device::Model> {
        model.insert(txn).await.map_err(db_error)
    }

    /// Bump `last_used` and refresh the client metadata of a known device.
    ///
    /// `is_primary` and `is_active` are left untouched.
    pub async fn touch<C: ConnectionTrait>(
        &self,
        conn: &C,
        device: user_device::Model,
        metadata: DeviceMetadata,
    ) -> AppResult<user_device::Model> {
        let now = chrono::Utc::now();
        let mut active: user_device::ActiveModel = device.into();
        active.last_used = Set(now.into());
        active.browser_version = Set(metadata.browser_version);
        active.hardware_info = Set(metadata.hardware_info);
        active.security_fingerprints = Set(metadata.security_fingerprints);
        active.updated_at = Set(Some(now.into()));
        active.update(conn).await.map_err(db_error)
    }

    /// Bump `last_used` on the shared connection.
    pub async fn touch_now(
        &self,
        device: user_device::Model,
        metadata: DeviceMetadata,
    ) -> AppResult<user_device::Model> {
        self.touch(self.db.as_ref(), device, metadata).await
    }

    /// Demote every active device of `user_id` except `keep_id`.
    ///
    /// Single `UPDATE`; returns the number of rows changed.
    pub async fn demote_others(
        &self,
        txn: &DatabaseTransaction,
        user_id: &str,
        keep_id: &str,
    ) -> AppResult<u64> {
        let result = UserDevice::update_many()
            .col_expr(user_device::Column::IsPrimary, Expr::value(false))
            .col_expr(
                user_device::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(user_device::Column::UserId.eq(user_id))
            .filter(user_device::Column::IsActive.eq(true))
            .filter(user_device::Column::IsPrimary.eq(true))
            .filter(user_device::Column::Id.ne(keep_id))
            .exec(txn)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected)
    }

    /// Demote the given devices. Used by reconciliation.
    pub async fn demote_ids(&self, txn: &DatabaseTransaction, ids: &[String]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = UserDevice::update_many()
            .col_expr(user_device::Column::IsPrimary, Expr::value(false))
            .col_expr(
                user_device::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(user_device::Column::Id.is_in(ids.to_vec()))
            .exec(txn)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected)
    }

    /// Active primaries of `user_id` other than `except_id`, locked.
    pub async fn lock_other_primaries(
        &self,
        txn: &DatabaseTransaction,
        user_id: &str,
        except_id: &str,
    ) -> AppResult<Vec<user_device::Model>> {
        UserDevice::find()
            .filter(user_device::Column::UserId.eq(user_id))
            .filter(user_device::Column::IsActive.eq(true))
            .filter(user_device::Column::IsPrimary.eq(true))
            .filter(user_device::Column::Id.ne(except_id))
            .lock_exclusive()
            .all(txn)
            .await
            .map_err(db_error)
    }

    /// Mark `device` primary inside `txn`.
    pub async fn set_primary(
        &self,
        txn: &DatabaseTransaction,
        device: user_device::Model,
    ) -> AppResult<user_device::Model> {
        let mut active: user_device::ActiveModel = device.into();
        active.is_primary = Set(true);
        active.updated_at = Set(Some(chrono::Utc::now().into()));
        active.update(txn).await.map_err(db_error)
    }

    /// Soft-disable `device` inside `txn`.
    pub async fn deactivate(
        &self,
        txn: &DatabaseTransaction,
        device: user_device::Model,
    ) -> AppResult<user_device::Model> {
        let mut active: user_device::ActiveModel = device.into();
        active.is_active = Set(false);
        active.updated_at = Set(Some(chrono::Utc::now().into()));
        active.update(txn).await.map_err(db_error)
    }

    /// IDs of users with more than one active primary device.
    pub async fn find_users_with_multiple_primaries(&self) -> AppResult<Vec<String>> {
        UserDevice::find()
            .select_only()
            .column(user_device::Column::UserId)
            .filter(user_device::Column::IsActive.eq(true))
            .filter(user_device::Column::IsPrimary.eq(true))
            .group_by(user_device::Column::UserId)
            .having(Expr::expr(Func::count(Expr::col(user_device::Column::Id))).gt(1))
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    fn active_by_fingerprint(user_id: &str, fingerprint: &str) -> sea_orm::Select<UserDevice> {
        UserDevice::find()
            .filter(user_device::Column::UserId.eq(user_id))
            .filter(user_device::Column::Fingerprint.eq(fingerprint))
            .filter(user_device::Column::IsActive.eq(true))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Transaction};

    fn device(id: &str, user_id: &str, fingerprint: &str, is_primary: bool) -> user_device::Model {
        let now = Utc::now();
        user_device::Model {
            id: id.to_string(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            browser_name: "firefox".to_string(),
            browser_version: "128".to_string(),
            os_name: "linux".to_string(),
            os_version: "6.8".to_string(),
            hardware_info: None,
            security_fingerprints: None,
            is_primary,
            is_active: true,
            last_used: now.into(),
            created_at: now.into(),
            updated_at: None,
        }
    }

    fn log_sql(log: &[Transaction]) -> String {
        format!("{log:?}")
    }

    #[tokio::test]
    async fn test_find_active_by_fingerprint() {
        let d = device("d1", "u1", "fp-a", true);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[d.clone()]])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(db, Duration::from_secs(5));
        let found = repo.find_active_by_fingerprint("u1", "fp-a").await.unwrap();

        assert_eq!(found, Some(d));
    }

    #[tokio::test]
    async fn test_begin_locked_sets_lock_timeout() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(Arc::clone(&db), Duration::from_millis(1500));
        let txn = repo.begin_locked().await.unwrap();
        txn.commit().await.unwrap();

        drop(repo);
        let db = Arc::try_unwrap(db).ok().unwrap();
        let sql = log_sql(&db.into_transaction_log());
        assert!(sql.contains("SET LOCAL lock_timeout = '1500ms'"));
    }

    #[tokio::test]
    async fn test_begin_locked_never_disables_lock_timeout() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(Arc::clone(&db), Duration::ZERO);
        let txn = repo.begin_locked().await.unwrap();
        txn.commit().await.unwrap();

        drop(repo);
        let db = Arc::try_unwrap(db).ok().unwrap();
        let sql = log_sql(&db.into_transaction_log());
        assert!(sql.contains("SET LOCAL lock_timeout = '1ms'"));
        assert!(!sql.contains("'0ms'"));
    }

    #[tokio::test]
    async fn test_lock_active_by_user_uses_for_update() {
        let d1 = device("d1", "u1", "fp-a", true);
        let d2 = device("d2", "u1", "fp-b", false);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([[d1, d2]])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(Arc::clone(&db), Duration::from_secs(5));
        let txn = repo.begin_locked().await.unwrap();
        let devices = repo.lock_active_by_user(&txn, "u1").await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(devices.len(), 2);

        drop(repo);
        let db = Arc::try_unwrap(db).ok().unwrap();
        let sql = log_sql(&db.into_transaction_log());
        assert!(sql.contains("FOR UPDATE"));
        assert!(sql.contains("is_active"));
    }

    #[tokio::test]
    async fn test_demote_others_reports_rows() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(Arc::clone(&db), Duration::from_secs(5));
        let txn = repo.begin_locked().await.unwrap();
        let demoted = repo.demote_others(&txn, "u1", "d2").await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(demoted, 1);
    }

    #[tokio::test]
    async fn test_demote_ids_empty_is_noop() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = UserDeviceRepository::new(Arc::clone(&db), Duration::from_secs(5));
        let txn = repo.begin_locked().await.unwrap();
        let demoted = repo.demote_ids(&txn, &[]).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(demoted, 0);
    }

    #[test]
    fn test_default_metadata_is_unknown() {
        let metadata = DeviceMetadata::default();
        assert_eq!(metadata.browser_name, "unknown");
        assert_eq!(metadata.os_version, "unknown");
        assert!(metadata.hardware_info.is_none());
    }
}
