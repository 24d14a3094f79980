//! Monitor environments: lazy find-or-create bounded by the per-monitor
//! ceiling, and the run-state propagation (`mark_ok` / `mark_failed`)
//! executed at the tail of every reconciliation.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use thiserror::Error;
use tracing::debug;

use crate::alerting::{AlertSink, MonitorFailureOccurrence};
use crate::config::MonitorLimits;
use crate::db::entities::{
    monitor, monitor_check_in, monitor_environment, prelude::MonitorEnvironment, project,
};
use crate::db::enums::{CheckInStatus, EnvironmentState, MonitorStatus};
use crate::monitors::utils::next_scheduled_checkin;
use crate::monitors::validators::{DEFAULT_ENVIRONMENT, FieldError, validate_environment_name};
use crate::db::services::monitor_service::validated_config;

#[derive(Debug, Error)]
pub enum EnvironmentServiceError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("monitor {0} exceeds its environment limit")]
    EnvironmentLimitsExceeded(i32),
    #[error("invalid environment name: {}", .0.message)]
    ValidationFailed(FieldError),
}

/// Find-or-create for `(monitor, environment)`. A missing name defaults to
/// `production`. Either failure aborts the check-in with no partial state.
pub async fn ensure_environment<C: ConnectionTrait>(
    db: &C,
    monitor: &monitor::Model,
    environment: Option<&str>,
    limits: &MonitorLimits,
) -> Result<monitor_environment::Model, EnvironmentServiceError> {
    let name = environment.unwrap_or(DEFAULT_ENVIRONMENT);
    validate_environment_name(name).map_err(EnvironmentServiceError::ValidationFailed)?;

    if let Some(found) = find_environment(db, monitor.id, name).await? {
        return Ok(found);
    }

    let existing = MonitorEnvironment::find()
        .filter(monitor_environment::Column::MonitorId.eq(monitor.id))
        .count(db)
        .await?;
    if existing >= limits.max_environments_per_monitor {
        return Err(EnvironmentServiceError::EnvironmentLimitsExceeded(monitor.id));
    }

    let now = Utc::now();
    let insert = MonitorEnvironment::insert(monitor_environment::ActiveModel {
        monitor_id: Set(monitor.id),
        environment: Set(name.to_string()),
        status: Set(None),
        last_checkin: Set(None),
        next_checkin: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([
            monitor_environment::Column::MonitorId,
            monitor_environment::Column::Environment,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_with_returning(db)
    .await;

    match insert {
        Ok(created) => Ok(created),
        // A concurrent writer on another check-in created the row between
        // the read and the insert; adopt theirs.
        Err(DbErr::RecordNotInserted) => find_environment(db, monitor.id, name)
            .await?
            .ok_or_else(|| {
                EnvironmentServiceError::Database(DbErr::RecordNotFound(format!(
                    "monitor environment {}/{name} lost after conflict",
                    monitor.id
                )))
            }),
        Err(err) => Err(err.into()),
    }
}

async fn find_environment<C: ConnectionTrait>(
    db: &C,
    monitor_id: i32,
    name: &str,
) -> Result<Option<monitor_environment::Model>, DbErr> {
    MonitorEnvironment::find()
        .filter(monitor_environment::Column::MonitorId.eq(monitor_id))
        .filter(monitor_environment::Column::Environment.eq(name))
        .one(db)
        .await
}

/// Records a successful (or at least non-error) resolution: advances
/// `last_checkin`, recomputes the expected next check-in, and flips the
/// run state to OK for genuinely OK check-ins on non-disabled monitors.
///
/// The update is guarded against out-of-order delivery: a row whose
/// `last_checkin` is already newer than `ts` is left untouched.
pub async fn mark_ok<C: ConnectionTrait>(
    db: &C,
    environment: &monitor_environment::Model,
    monitor: &monitor::Model,
    check_in: &monitor_check_in::Model,
    ts: DateTime<Utc>,
) -> Result<(), DbErr> {
    let next_checkin = validated_config(monitor).and_then(|c| next_scheduled_checkin(&c, ts));

    let mut update = MonitorEnvironment::update_many()
        .col_expr(monitor_environment::Column::LastCheckin, Expr::value(Some(ts)))
        .col_expr(monitor_environment::Column::NextCheckin, Expr::value(next_checkin))
        .col_expr(monitor_environment::Column::UpdatedAt, Expr::value(Utc::now()));

    if check_in.status == CheckInStatus::Ok && monitor.status != MonitorStatus::Disabled {
        update = update.col_expr(
            monitor_environment::Column::Status,
            Expr::value(Some(EnvironmentState::Ok)),
        );
    }

    let result = update
        .filter(monitor_environment::Column::Id.eq(environment.id))
        .filter(newer_checkin_guard(ts))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        debug!(
            monitor_environment_id = environment.id,
            "mark_ok skipped: a newer check-in already resolved"
        );
    }
    Ok(())
}

/// Records a failed resolution and hands the occurrence to the alerting
/// collaborator. Same monotonic guard as [`mark_ok`]; a stale failure
/// neither mutates the row nor dispatches an occurrence.
pub async fn mark_failed<C: ConnectionTrait>(
    db: &C,
    environment: &monitor_environment::Model,
    monitor: &monitor::Model,
    project: &project::Model,
    ts: DateTime<Utc>,
    trace_id: Option<&str>,
    alerts: &dyn AlertSink,
) -> Result<(), DbErr> {
    let next_checkin = validated_config(monitor).and_then(|c| next_scheduled_checkin(&c, ts));

    let result = MonitorEnvironment::update_many()
        .col_expr(monitor_environment::Column::LastCheckin, Expr::value(Some(ts)))
        .col_expr(monitor_environment::Column::NextCheckin, Expr::value(next_checkin))
        .col_expr(
            monitor_environment::Column::Status,
            Expr::value(Some(EnvironmentState::Error)),
        )
        .col_expr(monitor_environment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(monitor_environment::Column::Id.eq(environment.id))
        .filter(newer_checkin_guard(ts))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        debug!(
            monitor_environment_id = environment.id,
            "mark_failed skipped: a newer check-in already resolved"
        );
        return Ok(());
    }

    alerts
        .dispatch_failure(MonitorFailureOccurrence {
            organization_id: project.organization_id,
            project_id: project.id,
            monitor_id: monitor.id,
            monitor_environment_id: environment.id,
            monitor_slug: monitor.slug.clone(),
            environment: environment.environment.clone(),
            failed_at: ts,
            trace_id: trace_id.map(str::to_string),
        })
        .await;

    Ok(())
}

fn newer_checkin_guard(ts: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(monitor_environment::Column::LastCheckin.is_null())
        .add(monitor_environment::Column::LastCheckin.lte(ts))
}
