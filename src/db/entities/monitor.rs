use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{MonitorStatus, MonitorType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub organization_id: i32,
    pub project_id: i32,
    /// Unique per organization.
    pub slug: String,
    pub name: String,
    pub status: MonitorStatus,
    pub monitor_type: MonitorType,
    /// The validated schedule configuration document.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub config: Option<Json>,
    /// Bumped by every applied config update so downstream caches can
    /// invalidate on version mismatch.
    pub config_version: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,

    #[sea_orm(has_many = "super::monitor_environment::Entity")]
    MonitorEnvironment,

    #[sea_orm(has_many = "super::monitor_check_in::Entity")]
    MonitorCheckIn,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::monitor_environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorEnvironment.def()
    }
}

impl Related<super::monitor_check_in::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorCheckIn.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
