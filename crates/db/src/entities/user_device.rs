//! User device entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A client device recognized for a user.
///
/// For every user at most one row with `is_active AND is_primary` may exist.
/// The partial unique index `uq_user_device_single_primary` enforces this in
/// the database; application code changes `is_primary` only through the
/// primary-assignment guard.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_device")]
pub struct Model {
    /// Unique identifier.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// User who owns this device.
    pub user_id: String,

    /// Stable opaque identifier derived from client signals.
    pub fingerprint: String,

    pub browser_name: String,

    pub browser_version: String,

    pub os_name: String,

    pub os_version: String,

    /// Free-form hardware signals reported by the client.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub hardware_info: Option<Json>,

    /// Canvas and audio fingerprint signals.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub security_fingerprints: Option<Json>,

    /// Whether this device may open protected materials.
    #[sea_orm(default_value = false)]
    pub is_primary: bool,

    /// Soft-disable flag. Inactive devices are ignored everywhere.
    #[sea_orm(default_value = true)]
    pub is_active: bool,

    /// Last time this device was recognized.
    pub last_used: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
