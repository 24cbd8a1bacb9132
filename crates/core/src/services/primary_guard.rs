//! Primary-assignment guard.
//!
//! The only code allowed to change `user_device.is_primary`. Every entry point
//! follows the same discipline:
//!
//! 1. begin a transaction with a bounded lock wait,
//! 2. lock the owning user row and all of the user's active device rows,
//! 3. decide and write,
//! 4. commit, or drop the transaction (rollback) on any error.
//!
//! Locking the user row is what makes the empty set lockable: two requests
//! that both observe "no devices yet" queue on the same row instead of both
//! creating a primary.

use std::cmp::Ordering;

use edugate_common::{AppError, AppResult, IdGenerator};
use edugate_db::{
    db_error,
    entities::user_device,
    repositories::{DeviceMetadata, UserDeviceRepository, UserRepository},
};
use sea_orm::{DatabaseTransaction, Set};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Result of reconciling one user's device set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub user_id: String,
    /// Device left primary, if the user has any primary at all.
    pub kept: Option<String>,
    /// Devices that were demoted.
    pub demoted: Vec<String>,
}

/// Serializes every `is_primary` transition for a user.
#[derive(Clone)]
pub struct PrimaryAssignmentGuard {
    device_repo: UserDeviceRepository,
    user_repo: UserRepository,
    id_gen: IdGenerator,
}

impl PrimaryAssignmentGuard {
    /// Create a new guard.
    #[must_use]
    pub const fn new(device_repo: UserDeviceRepository, user_repo: UserRepository) -> Self {
        Self {
            device_repo,
            user_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Lock the user row, then every active device row of that user.
    async fn lock_device_set(
        &self,
        txn: &DatabaseTransaction,
        user_id: &str,
    ) -> AppResult<Vec<user_device::Model>> {
        self.user_repo.lock_for_update(txn, user_id).await?;
        self.device_repo.lock_active_by_user(txn, user_id).await
    }

    /// Create the device for a fingerprint not seen before.
    ///
    /// The first active device of a user becomes primary; any later one starts
    /// non-primary. If a concurrent request registered the same fingerprint
    /// while this one waited for the lock, that record is refreshed and
    /// returned instead.
    pub async fn create_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        metadata: DeviceMetadata,
    ) -> AppResult<user_device::Model> {
        let txn = self.device_repo.begin_locked().await?;
        let devices = self.lock_device_set(&txn, user_id).await?;

        if let Some(existing) = devices.iter().find(|d| d.fingerprint == fingerprint) {
            let device = self
                .device_repo
                .touch(&txn, existing.clone(), metadata)
                .await?;
            txn.commit().await.map_err(db_error)?;
            debug!(user_id, device_id = %device.id, "Device registered concurrently, reusing it");
            return Ok(device);
        }

        let is_primary = devices.is_empty();
        let now = chrono::Utc::now();
        let model = user_device::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(user_id.to_string()),
            fingerprint: Set(fingerprint.to_string()),
            browser_name: Set(metadata.browser_name),
            browser_version: Set(metadata.browser_version),
            os_name: Set(metadata.os_name),
            os_version: Set(metadata.os_version),
            hardware_info: Set(metadata.hardware_info),
            security_fingerprints: Set(metadata.security_fingerprints),
            is_primary: Set(is_primary),
            is_active: Set(true),
            last_used: Set(now.into()),
            created_at: Set(now.into()),
            updated_at: Set(None),
        };

        let device = self.device_repo.insert(&txn, model).await?;
        txn.commit().await.map_err(db_error)?;

        info!(
            user_id,
            device_id = %device.id,
            is_primary,
            "Registered new device"
        );
        Ok(device)
    }

    /// Make `device_id` the user's only primary device.
    ///
    /// Idempotent: promoting the current sole primary changes nothing.
    pub async fn promote_to_primary(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> AppResult<user_device::Model> {
        let txn = self.device_repo.begin_locked().await?;
        let devices = self.lock_device_set(&txn, user_id).await?;

        let target = devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))?;

        let has_other_primary = devices.iter().any(|d| d.is_primary && d.id != device_id);
        if target.is_primary && !has_other_primary {
            txn.commit().await.map_err(db_error)?;
            debug!(user_id, device_id, "Device is already primary");
            return Ok(target);
        }

        let demoted = self
            .device_repo
            .demote_others(&txn, user_id, device_id)
            .await?;

        let still_primary = self
            .device_repo
            .lock_other_primaries(&txn, user_id, device_id)
            .await?;
        if !still_primary.is_empty() {
            txn.rollback().await.map_err(db_error)?;
            error!(
                user_id,
                device_id,
                others = still_primary.len(),
                "Other devices still primary after demotion, aborting promotion"
            );
            return Err(AppError::Conflict(
                "another device is already primary, please retry".to_string(),
            ));
        }

        let device = if target.is_primary {
            target
        } else {
            self.device_repo.set_primary(&txn, target).await?
        };
        txn.commit().await.map_err(db_error)?;

        info!(user_id, device_id, demoted, "Promoted device to primary");
        Ok(device)
    }

    /// Repair a device set holding several active primaries.
    ///
    /// Keeps the most recently used one (newest `created_at`, then highest id
    /// on ties) and demotes the rest.
    pub async fn reconcile_user(&self, user_id: &str) -> AppResult<ReconcileOutcome> {
        let txn = self.device_repo.begin_locked().await?;
        let devices = self.lock_device_set(&txn, user_id).await?;

        let mut primaries: Vec<&user_device::Model> =
            devices.iter().filter(|d| d.is_primary).collect();
        primaries.sort_by(|a, b| most_recent_first(a, b));

        let kept = primaries.first().map(|d| d.id.clone());
        let demoted: Vec<String> = primaries.iter().skip(1).map(|d| d.id.clone()).collect();

        self.device_repo.demote_ids(&txn, &demoted).await?;
        txn.commit().await.map_err(db_error)?;

        if !demoted.is_empty() {
            warn!(
                user_id,
                kept = ?kept,
                demoted = ?demoted,
                "Repaired device set with multiple primaries"
            );
        }

        Ok(ReconcileOutcome {
            user_id: user_id.to_string(),
            kept,
            demoted,
        })
    }

    /// Reconcile every user currently holding more than one active primary.
    pub async fn reconcile_all(&self) -> AppResult<Vec<ReconcileOutcome>> {
        let user_ids = self.device_repo.find_users_with_multiple_primaries().await?;

        let mut outcomes = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            outcomes.push(self.reconcile_user(&user_id).await?);
        }

        info!(users = outcomes.len(), "Reconciled primary devices");
        Ok(outcomes)
    }

    /// Soft-disable a device.
    ///
    /// Deactivating the primary leaves the user without one; no sibling is
    /// promoted in its place.
    pub async fn deactivate_device(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> AppResult<user_device::Model> {
        let txn = self.device_repo.begin_locked().await?;
        let devices = self.lock_device_set(&txn, user_id).await?;

        let target = devices
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))?;
        let was_primary = target.is_primary;

        let device = self.device_repo.deactivate(&txn, target).await?;
        txn.commit().await.map_err(db_error)?;

        if was_primary {
            warn!(
                user_id,
                device_id,
                "Primary device deactivated, user has no primary until one is promoted"
            );
        } else {
            info!(user_id, device_id, "Device deactivated");
        }
        Ok(device)
    }
}

fn most_recent_first(a: &user_device::Model, b: &user_device::Model) -> Ordering {
    b.last_used
        .cmp(&a.last_used)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use edugate_db::entities::user;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn test_user(id: &str) -> user::Model {
        user::Model {
            id: id.to_string(),
            username: format!("{id}-name"),
            token: None,
            is_admin: false,
            created_at: Utc::now().into(),
        }
    }

    fn device(id: &str, fingerprint: &str, is_primary: bool, age_minutes: i64) -> user_device::Model {
        let at = Utc::now() - Duration::minutes(age_minutes);
        user_device::Model {
            id: id.to_string(),
            user_id: "u1".to_string(),
            fingerprint: fingerprint.to_string(),
            browser_name: "unknown".to_string(),
            browser_version: "unknown".to_string(),
            os_name: "unknown".to_string(),
            os_version: "unknown".to_string(),
            hardware_info: None,
            security_fingerprints: None,
            is_primary,
            is_active: true,
            last_used: at.into(),
            created_at: at.into(),
            updated_at: None,
        }
    }

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn guard(db: &Arc<DatabaseConnection>) -> PrimaryAssignmentGuard {
        PrimaryAssignmentGuard::new(
            UserDeviceRepository::new(Arc::clone(db), std::time::Duration::from_secs(5)),
            UserRepository::new(Arc::clone(db)),
        )
    }

    fn statements(db: Arc<DatabaseConnection>) -> String {
        let db = Arc::try_unwrap(db).ok().unwrap();
        format!("{:?}", db.into_transaction_log())
    }

    #[tokio::test]
    async fn test_first_device_is_primary() {
        let created = device("d1", "fp-a", true, 0);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([Vec::<user_device::Model>::new()])
                .append_query_results([[created.clone()]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard
            .create_device("u1", "fp-a", DeviceMetadata::default())
            .await
            .unwrap();
        drop(guard);

        assert!(result.is_primary);
        let sql = statements(db);
        assert!(sql.contains("FOR UPDATE"));
        assert!(sql.contains("INSERT INTO \\\"user_device\\\""));
        assert!(!sql.contains("Bool(Some(false))"));
    }

    #[tokio::test]
    async fn test_later_device_is_not_primary() {
        let existing = device("d1", "fp-a", true, 10);
        let created = device("d2", "fp-b", false, 0);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[existing]])
                .append_query_results([[created]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard
            .create_device("u1", "fp-b", DeviceMetadata::default())
            .await
            .unwrap();
        drop(guard);

        assert!(!result.is_primary);
        let sql = statements(db);
        assert!(sql.contains("Bool(Some(false))"));
    }

    #[tokio::test]
    async fn test_create_reuses_device_registered_while_waiting() {
        let existing = device("d1", "fp-a", true, 10);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[existing.clone()]])
                .append_query_results([[existing.clone()]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard
            .create_device("u1", "fp-a", DeviceMetadata::default())
            .await
            .unwrap();
        drop(guard);

        assert_eq!(result.id, "d1");
        let sql = statements(db);
        assert!(!sql.contains("INSERT"));
    }

    #[tokio::test]
    async fn test_create_for_unknown_user_fails() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([Vec::<user::Model>::new()])
                .into_connection(),
        );

        let result = guard(&db)
            .create_device("ghost", "fp-a", DeviceMetadata::default())
            .await;

        assert!(matches!(result, Err(AppError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_promote_demotes_previous_primary() {
        let a = device("d1", "fp-a", true, 10);
        let b = device("d2", "fp-b", false, 5);
        let mut promoted = b.clone();
        promoted.is_primary = true;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(1)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a, b]])
                .append_query_results([Vec::<user_device::Model>::new()])
                .append_query_results([[promoted]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard.promote_to_primary("u1", "d2").await.unwrap();
        drop(guard);

        assert_eq!(result.id, "d2");
        assert!(result.is_primary);

        let sql = statements(db);
        assert!(sql.contains("UPDATE \\\"user_device\\\" SET \\\"is_primary\\\""));
    }

    #[tokio::test]
    async fn test_promote_already_primary_is_noop() {
        let a = device("d1", "fp-a", true, 10);
        let b = device("d2", "fp-b", false, 5);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a.clone(), b.clone()]])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a, b]])
                .into_connection(),
        );

        let guard = guard(&db);
        let first = guard.promote_to_primary("u1", "d1").await.unwrap();
        let second = guard.promote_to_primary("u1", "d1").await.unwrap();
        drop(guard);

        assert_eq!(first, second);
        assert!(second.is_primary);

        let sql = statements(db);
        assert!(!sql.contains("UPDATE \\\"user_device\\\""));
    }

    #[tokio::test]
    async fn test_promote_unknown_device_is_not_found() {
        let a = device("d1", "fp-a", true, 10);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard.promote_to_primary("u1", "missing").await;
        drop(guard);

        match result {
            Err(AppError::DeviceNotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("Expected DeviceNotFound, got {other:?}"),
        }

        let sql = statements(db);
        assert!(!sql.contains("UPDATE \\\"user_device\\\""));
        assert!(!sql.contains("INSERT"));
    }

    #[tokio::test]
    async fn test_promote_foreign_device_is_not_found() {
        // The locked set only holds the caller's devices, so another user's
        // device id never matches.
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u2")]])
                .append_query_results([Vec::<user_device::Model>::new()])
                .into_connection(),
        );

        let result = guard(&db).promote_to_primary("u2", "d1").await;
        assert!(matches!(result, Err(AppError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_promote_aborts_when_recheck_finds_other_primary() {
        let a = device("d1", "fp-a", true, 10);
        let b = device("d2", "fp-b", false, 5);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a.clone(), b]])
                .append_query_results([[a]])
                .into_connection(),
        );

        let result = guard(&db).promote_to_primary("u1", "d2").await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_most_recently_used() {
        let stale = device("d1", "fp-a", true, 60);
        let recent = device("d2", "fp-b", true, 1);
        let other = device("d3", "fp-c", false, 0);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(1)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[stale, other, recent]])
                .into_connection(),
        );

        let outcome = guard(&db).reconcile_user("u1").await.unwrap();

        assert_eq!(outcome.kept.as_deref(), Some("d2"));
        assert_eq!(outcome.demoted, vec!["d1".to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_clean_set_changes_nothing() {
        let a = device("d1", "fp-a", true, 5);
        let b = device("d2", "fp-b", false, 1);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a, b]])
                .into_connection(),
        );

        let guard = guard(&db);
        let outcome = guard.reconcile_user("u1").await.unwrap();
        drop(guard);

        assert_eq!(outcome.kept.as_deref(), Some("d1"));
        assert!(outcome.demoted.is_empty());
        assert!(!statements(db).contains("UPDATE \\\"user_device\\\""));
    }

    #[tokio::test]
    async fn test_deactivate_primary_does_not_promote_sibling() {
        let a = device("d1", "fp-a", true, 10);
        let b = device("d2", "fp-b", false, 5);
        let mut deactivated = a.clone();
        deactivated.is_active = false;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[test_user("u1")]])
                .append_query_results([[a, b]])
                .append_query_results([[deactivated]])
                .into_connection(),
        );

        let guard = guard(&db);
        let result = guard.deactivate_device("u1", "d1").await.unwrap();
        drop(guard);

        assert!(!result.is_active);
        let sql = statements(db);
        assert!(sql.contains("\\\"is_active\\\""));
        assert!(!sql.contains("\\\"is_primary\\\" = $"));
    }

    #[test]
    fn test_most_recent_first_orders_by_last_used() {
        let old = device("d1", "fp-a", true, 30);
        let new = device("d2", "fp-b", true, 1);
        assert_eq!(most_recent_first(&new, &old), Ordering::Less);
        assert_eq!(most_recent_first(&old, &new), Ordering::Greater);
    }
}
