use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::EnvironmentState;

/// A monitor's run-state projection scoped to one deployment environment.
/// Unique per (monitor_id, environment).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitor_environments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub monitor_id: i32,
    pub environment: String,
    pub status: Option<EnvironmentState>,
    pub last_checkin: Option<ChronoDateTimeUtc>,
    pub next_checkin: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade"
    )]
    Monitor,

    #[sea_orm(has_many = "super::monitor_check_in::Entity")]
    MonitorCheckIn,
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl Related<super::monitor_check_in::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorCheckIn.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
