//! Create user device table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserDevice::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserDevice::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserDevice::UserId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserDevice::Fingerprint)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserDevice::BrowserName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(UserDevice::BrowserVersion)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserDevice::OsName).string_len(255).not_null())
                    .col(ColumnDef::new(UserDevice::OsVersion).string_len(255).not_null())
                    .col(ColumnDef::new(UserDevice::HardwareInfo).json_binary().null())
                    .col(
                        ColumnDef::new(UserDevice::SecurityFingerprints)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserDevice::IsPrimary)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UserDevice::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(UserDevice::LastUsed)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserDevice::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserDevice::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_device_user")
                            .from(UserDevice::Table, UserDevice::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_device_user_id")
                    .table(UserDevice::Table)
                    .col(UserDevice::UserId)
                    .to_owned(),
            )
            .await?;

        // One active record per (user, fingerprint); deactivated rows keep
        // their fingerprint without blocking re-registration.
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS uq_user_device_active_fingerprint
                ON user_device (user_id, fingerprint)
                WHERE is_active;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserDevice::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum UserDevice {
    Table,
    Id,
    UserId,
    Fingerprint,
    BrowserName,
    BrowserVersion,
    OsName,
    OsVersion,
    HardwareInfo,
    SecurityFingerprints,
    IsPrimary,
    IsActive,
    LastUsed,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum User {
    Table,
    Id,
}
