//! Classification of database errors into [`AppError`] kinds.

use std::borrow::Cow;

use edugate_common::AppError;
use sea_orm::{DbErr, RuntimeErr, SqlErr};

/// Name of the partial unique index that backs the single-primary invariant.
pub const SINGLE_PRIMARY_INDEX: &str = "uq_user_device_single_primary";

/// Name of the partial unique index on active `(user_id, fingerprint)` pairs.
pub const ACTIVE_FINGERPRINT_INDEX: &str = "uq_user_device_active_fingerprint";

/// `PostgreSQL` SQLSTATE for `lock_not_available`.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Map a [`DbErr`] to the application error taxonomy.
///
/// - lock wait exceeded: [`AppError::LockTimeout`]
/// - unique violations: [`AppError::Conflict`]
/// - everything else: [`AppError::Database`]
///
/// A violation of [`SINGLE_PRIMARY_INDEX`] means some code path changed
/// `is_primary` without holding the device-set lock, so it is logged as a bug.
#[must_use]
pub fn db_error(err: DbErr) -> AppError {
    let message = err.to_string();

    if is_lock_timeout(&err, &message) {
        tracing::warn!(error = %message, "Timed out waiting for device-set lock");
        return AppError::LockTimeout(message);
    }

    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            if detail.contains(SINGLE_PRIMARY_INDEX) {
                tracing::error!(
                    error = %detail,
                    "Single-primary constraint fired; a write bypassed the device-set lock"
                );
                AppError::Conflict("another device is already primary for this user".to_string())
            } else {
                AppError::Conflict(detail)
            }
        }
        _ => AppError::Database(message),
    }
}

fn is_lock_timeout(err: &DbErr, message: &str) -> bool {
    sqlstate(err).is_some_and(|code| code == LOCK_NOT_AVAILABLE) || message.contains("lock timeout")
}

/// SQLSTATE reported by the server, when the error came from one.
fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Query(RuntimeErr::SqlxError(e)) | DbErr::Exec(RuntimeErr::SqlxError(e)) => e
            .as_database_error()
            .and_then(|db| db.code())
            .map(Cow::into_owned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_message_maps_to_lock_timeout() {
        let err = DbErr::Custom("canceling statement due to lock timeout".to_string());
        assert!(matches!(db_error(err), AppError::LockTimeout(_)));
    }

    #[test]
    fn test_errors_without_server_code_have_no_sqlstate() {
        let err = DbErr::Query(RuntimeErr::Internal("55P03".to_string()));
        assert_eq!(sqlstate(&err), None);
        assert!(matches!(db_error(err), AppError::Database(_)));
    }

    #[test]
    fn test_other_errors_map_to_database() {
        let err = DbErr::Custom("connection reset by peer".to_string());
        assert!(matches!(db_error(err), AppError::Database(_)));
    }
}
