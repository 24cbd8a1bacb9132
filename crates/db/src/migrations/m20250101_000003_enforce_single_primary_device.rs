//! Enforce at most one active primary device per user.
//!
//! Rows written before the guard existed may carry several active primaries
//! for one user. Those are demoted first, keeping the most recently used
//! device, so that the unique index can be built.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r"
                UPDATE user_device AS d
                SET is_primary = false, updated_at = CURRENT_TIMESTAMP
                FROM (
                    SELECT id,
                           ROW_NUMBER() OVER (
                               PARTITION BY user_id
                               ORDER BY last_used DESC, created_at DESC, id DESC
                           ) AS rank
                    FROM user_device
                    WHERE is_active AND is_primary
                ) AS ranked
                WHERE d.id = ranked.id AND ranked.rank > 1;
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS uq_user_device_single_primary
                ON user_device (user_id)
                WHERE is_active AND is_primary;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_user_device_single_primary;")
            .await?;

        Ok(())
    }
}
