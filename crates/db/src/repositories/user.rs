//! User repository.

use std::sync::Arc;

use crate::db_error;
use crate::entities::{User, user};
use edugate_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
};

/// User repository for database operations.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a user by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<user::Model>> {
        User::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a user by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<user::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Find a user by token.
    pub async fn find_by_token(&self, token: &str) -> AppResult<Option<user::Model>> {
        User::find()
            .filter(user::Column::Token.eq(token))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Lock the user row (`SELECT ... FOR UPDATE`) inside `txn`.
    ///
    /// The user row is the lock anchor for that user's whole device set: it
    /// exists even when the user has no devices, so two transactions that
    /// both start from an empty set still serialize here.
    pub async fn lock_for_update(
        &self,
        txn: &DatabaseTransaction,
        id: &str,
    ) -> AppResult<user::Model> {
        User::find_by_id(id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }
}
