//! Check-in rows: guarded lookups, the pure update decision, and the
//! "create, or recover the row a concurrent writer just made" upsert.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::db::entities::{
    monitor, monitor_check_in, monitor_environment, prelude::MonitorCheckIn,
};
use crate::db::enums::CheckInStatus;
use crate::monitors::utils::{next_scheduled_checkin, timeout_at, valid_duration};
use crate::monitors::validators::ValidatedMonitorConfig;
use crate::db::services::monitor_service::validated_config;

/// Why an update against an existing check-in was refused. Every variant
/// maps to a distinct processing outcome; none of them mutate the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejection {
    /// The row belongs to a different project/monitor/environment than the
    /// one the message resolved to.
    GuidMismatch,
    /// The row is already terminal.
    CheckInFinished,
    /// The explicit or inferred duration failed the sanity bounds.
    FailedDurationCheck,
}

/// The field set an accepted update will persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInUpdate {
    pub status: CheckInStatus,
    pub duration_ms: i32,
    pub date_updated: DateTime<Utc>,
    pub timeout_at: Option<DateTime<Utc>>,
}

/// Decides what an incoming event does to an existing check-in row.
///
/// Pure read-modify decision; the caller holds the check-in lock and the
/// surrounding transaction. A missing duration is inferred as the elapsed
/// time between the row's recorded start and the event.
pub fn resolve_update(
    existing: &monitor_check_in::Model,
    project_id: i32,
    monitor_id: i32,
    monitor_environment_id: i32,
    config: Option<&ValidatedMonitorConfig>,
    status: CheckInStatus,
    duration_ms: Option<i32>,
    event_time: DateTime<Utc>,
) -> Result<CheckInUpdate, UpdateRejection> {
    if existing.project_id != project_id
        || existing.monitor_id != monitor_id
        || existing.monitor_environment_id != monitor_environment_id
    {
        return Err(UpdateRejection::GuidMismatch);
    }

    if existing.status.is_terminal() {
        return Err(UpdateRejection::CheckInFinished);
    }

    let duration_ms = match duration_ms {
        Some(explicit) => i64::from(explicit),
        None => (event_time - existing.date_added).num_milliseconds(),
    };
    if !valid_duration(Some(duration_ms)) {
        return Err(UpdateRejection::FailedDurationCheck);
    }
    let duration_ms = i32::try_from(duration_ms).map_err(|_| UpdateRejection::FailedDurationCheck)?;

    // Heartbeats advance the row clock; terminal events do not.
    let date_updated = if status == CheckInStatus::InProgress {
        event_time
    } else {
        existing.date_updated
    };

    Ok(CheckInUpdate {
        status,
        duration_ms,
        date_updated,
        timeout_at: timeout_at(config, status, event_time),
    })
}

pub async fn apply_update<C: ConnectionTrait>(
    db: &C,
    existing: monitor_check_in::Model,
    update: CheckInUpdate,
) -> Result<monitor_check_in::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.status = Set(update.status);
    active.duration = Set(Some(update.duration_ms));
    active.date_updated = Set(update.date_updated);
    active.timeout_at = Set(update.timeout_at);
    active.update(db).await
}

/// Exact-GUID lookup, locked for the duration of the transaction.
pub async fn find_by_guid<C: ConnectionTrait>(
    db: &C,
    guid: Uuid,
) -> Result<Option<monitor_check_in::Model>, DbErr> {
    MonitorCheckIn::find()
        .filter(monitor_check_in::Column::Guid.eq(guid))
        .lock_exclusive()
        .one(db)
        .await
}

/// The most recent check-in of the environment that can still transition,
/// used to resolve the zero-GUID sentinel.
pub async fn latest_unfinished<C: ConnectionTrait>(
    db: &C,
    monitor_environment_id: i32,
) -> Result<Option<monitor_check_in::Model>, DbErr> {
    MonitorCheckIn::find()
        .filter(monitor_check_in::Column::MonitorEnvironmentId.eq(monitor_environment_id))
        .filter(monitor_check_in::Column::Status.is_not_in(CheckInStatus::terminal_values()))
        .order_by_desc(monitor_check_in::Column::DateAdded)
        .lock_exclusive()
        .one(db)
        .await
}

pub async fn monitor_has_check_ins<C: ConnectionTrait>(
    db: &C,
    monitor_id: i32,
) -> Result<bool, DbErr> {
    let count = MonitorCheckIn::find()
        .filter(monitor_check_in::Column::MonitorId.eq(monitor_id))
        .limit(1)
        .count(db)
        .await?;
    Ok(count > 0)
}

/// A fully computed row ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheckIn {
    pub guid: Uuid,
    pub project_id: i32,
    pub monitor_id: i32,
    pub monitor_environment_id: i32,
    pub status: CheckInStatus,
    pub duration_ms: Option<i32>,
    pub date_added: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub expected_time: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub monitor_config: Option<serde_json::Value>,
    pub trace_id: Option<String>,
}

/// Computes the creation-path row for an event that matched no existing
/// check-in.
///
/// When the event carries a duration, the logical start is back-computed as
/// `event_time - duration` so a single late "finished" report still anchors
/// to when the job began. This trusts the reporting clock to be close to
/// ours; large skew is a known, unhandled gap.
pub fn build_new_check_in(
    guid: Uuid,
    project_id: i32,
    monitor: &monitor::Model,
    environment: &monitor_environment::Model,
    status: CheckInStatus,
    duration_ms: Option<i32>,
    event_time: DateTime<Utc>,
    trace_id: Option<String>,
) -> NewCheckIn {
    let date_added = match duration_ms {
        Some(ms) => event_time - Duration::milliseconds(i64::from(ms)),
        None => event_time,
    };

    let config = validated_config(monitor);
    let expected_time = match (environment.last_checkin, config.as_ref()) {
        (Some(last), Some(config)) => next_scheduled_checkin(config, last),
        _ => None,
    };

    NewCheckIn {
        guid,
        project_id,
        monitor_id: monitor.id,
        monitor_environment_id: environment.id,
        status,
        duration_ms,
        date_added,
        date_updated: event_time,
        expected_time,
        timeout_at: timeout_at(config.as_ref(), status, date_added),
        monitor_config: monitor.config.clone(),
        trace_id,
    }
}

/// Three-way upsert outcome: the row was created, or a concurrent writer
/// beat this one to the GUID and their row was recovered instead.
#[derive(Debug)]
pub enum CheckInUpsert {
    Created(monitor_check_in::Model),
    Raced(monitor_check_in::Model),
}

pub async fn create_or_recover<C: ConnectionTrait>(
    db: &C,
    new: NewCheckIn,
) -> Result<CheckInUpsert, DbErr> {
    let guid = new.guid;
    let insert = MonitorCheckIn::insert(monitor_check_in::ActiveModel {
        guid: Set(new.guid),
        project_id: Set(new.project_id),
        monitor_id: Set(new.monitor_id),
        monitor_environment_id: Set(new.monitor_environment_id),
        status: Set(new.status),
        duration: Set(new.duration_ms),
        date_added: Set(new.date_added),
        date_updated: Set(new.date_updated),
        expected_time: Set(new.expected_time),
        timeout_at: Set(new.timeout_at),
        monitor_config: Set(new.monitor_config),
        trace_id: Set(new.trace_id),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(monitor_check_in::Column::Guid)
            .do_nothing()
            .to_owned(),
    )
    .exec_with_returning(db)
    .await;

    match insert {
        Ok(created) => Ok(CheckInUpsert::Created(created)),
        Err(DbErr::RecordNotInserted) => {
            let existing = find_by_guid(db, guid).await?.ok_or_else(|| {
                DbErr::RecordNotFound(format!("check-in {guid} lost after insert conflict"))
            })?;
            Ok(CheckInUpsert::Raced(existing))
        }
        Err(err) => Err(err),
    }
}
