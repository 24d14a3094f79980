//! The per-message driver: classification, protective gates, and the
//! locked, transactional check-in reconciliation.
//!
//! Every terminal outcome, including every rejection branch, is a tagged
//! counter increment, and any unexpected failure is contained to its
//! message so the stream position always advances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alerting::AlertSink;
use crate::config::{ConsumerConfig, MonitorLimits};
use crate::consumer::clock::{TickDispatcher, TickRegister, try_tick_trigger};
use crate::consumer::envelope::{self, CheckInMessage, CheckInPayload, Envelope};
use crate::consumer::source::CheckInSource;
use crate::db::entities::{monitor, monitor_check_in, monitor_environment, project};
use crate::db::enums::CheckInStatus;
use crate::db::services::check_in_service::{
    CheckInUpsert, UpdateRejection, apply_update, build_new_check_in, create_or_recover,
    find_by_guid, latest_unfinished, monitor_has_check_ins, resolve_update,
};
use crate::db::services::environment_service::{
    EnvironmentServiceError, ensure_environment, mark_failed, mark_ok,
};
use crate::db::services::monitor_service::{
    MonitorServiceError, ensure_monitor_with_config, validated_config,
};
use crate::db::services::project_service::ProjectLookup;
use crate::killswitch::{DISABLE_CHECK_IN, KillSwitches};
use crate::locking::{LockError, LockManager};
use crate::monitors::utils::{duration_secs_to_ms, slugify, valid_duration};
use crate::monitors::validators::DEFAULT_ENVIRONMENT;
use crate::ratelimit::RateLimiter;
use crate::signals::SignalEmitter;

/// Terminal disposition of one check-in message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Complete,
    DroppedBlocked,
    DroppedRateLimited,
    FailedPayloadDecode,
    FailedProjectLookup,
    FailedCheckInValidation,
    FailedGuidValidation,
    /// No monitor could be resolved or created for the slug.
    FailedValidation,
    FailedMonitorLimits,
    FailedMonitorEnvironmentLimits,
    FailedMonitorEnvironmentNameLength,
    FailedMonitorEnvironmentGuidMatch,
    GuidMismatch,
    CheckInFinished,
    FailedDurationCheck,
    FailedCheckInCreationLock,
    Error,
}

impl ProcessingOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingOutcome::Complete => "complete",
            ProcessingOutcome::DroppedBlocked => "dropped_blocked",
            ProcessingOutcome::DroppedRateLimited => "dropped_ratelimited",
            ProcessingOutcome::FailedPayloadDecode => "failed_payload_decode",
            ProcessingOutcome::FailedProjectLookup => "failed_project_lookup",
            ProcessingOutcome::FailedCheckInValidation => "failed_checkin_validation",
            ProcessingOutcome::FailedGuidValidation => "failed_guid_validation",
            ProcessingOutcome::FailedValidation => "failed_validation",
            ProcessingOutcome::FailedMonitorLimits => "failed_monitor_limits",
            ProcessingOutcome::FailedMonitorEnvironmentLimits => {
                "failed_monitor_environment_limits"
            }
            ProcessingOutcome::FailedMonitorEnvironmentNameLength => {
                "failed_monitor_environment_name_length"
            }
            ProcessingOutcome::FailedMonitorEnvironmentGuidMatch => {
                "failed_monitor_environment_guid_match"
            }
            ProcessingOutcome::GuidMismatch => "guid_mismatch",
            ProcessingOutcome::CheckInFinished => "checkin_finished",
            ProcessingOutcome::FailedDurationCheck => "failed_duration_check",
            ProcessingOutcome::FailedCheckInCreationLock => "failed_checkin_creation_lock",
            ProcessingOutcome::Error => "error",
        }
    }

    fn record(self, sdk_platform: &str) {
        match self {
            ProcessingOutcome::DroppedBlocked => {
                counter!(
                    "monitors_checkin_dropped_blocked",
                    "source" => "consumer",
                    "sdk_platform" => sdk_platform.to_string()
                )
                .increment(1);
            }
            ProcessingOutcome::DroppedRateLimited => {
                counter!(
                    "monitors_checkin_dropped_ratelimited",
                    "source" => "consumer",
                    "sdk_platform" => sdk_platform.to_string()
                )
                .increment(1);
            }
            outcome => {
                counter!(
                    "monitors_checkin_result",
                    "source" => "consumer",
                    "status" => outcome.as_str(),
                    "sdk_platform" => sdk_platform.to_string()
                )
                .increment(1);
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

/// Explicit handles to every external collaborator, so tests substitute
/// in-memory fakes.
pub struct ConsumerHandles {
    pub projects: Arc<dyn ProjectLookup>,
    pub locks: LockManager,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub tick_register: Arc<dyn TickRegister>,
    pub tick_dispatcher: Arc<dyn TickDispatcher>,
    pub kill_switches: Arc<dyn KillSwitches>,
    pub signals: Arc<dyn SignalEmitter>,
    pub alerts: Arc<dyn AlertSink>,
}

pub struct CheckInConsumer {
    db: DatabaseConnection,
    projects: Arc<dyn ProjectLookup>,
    locks: LockManager,
    rate_limiter: Arc<dyn RateLimiter>,
    tick_register: Arc<dyn TickRegister>,
    tick_dispatcher: Arc<dyn TickDispatcher>,
    kill_switches: Arc<dyn KillSwitches>,
    signals: Arc<dyn SignalEmitter>,
    alerts: Arc<dyn AlertSink>,
    quota_limit: u32,
    quota_window: Duration,
    lock_duration: Duration,
    limits: MonitorLimits,
}

/// Validated per-message fields carried through reconciliation.
struct CheckInAttributes {
    monitor_slug: String,
    status: CheckInStatus,
    duration_ms: Option<i32>,
    start_time: DateTime<Utc>,
    check_in_id: Uuid,
    use_latest_checkin: bool,
    guid: Uuid,
    trace_id: Option<String>,
}

impl CheckInConsumer {
    pub fn new(db: DatabaseConnection, handles: ConsumerHandles, config: &ConsumerConfig) -> Self {
        Self {
            db,
            projects: handles.projects,
            locks: handles.locks,
            rate_limiter: handles.rate_limiter,
            tick_register: handles.tick_register,
            tick_dispatcher: handles.tick_dispatcher,
            kill_switches: handles.kill_switches,
            signals: handles.signals,
            alerts: handles.alerts,
            quota_limit: config.checkin_quota_limit,
            quota_window: Duration::from_secs(config.checkin_quota_window_secs),
            lock_duration: Duration::from_secs(config.checkin_lock_duration_secs),
            limits: config.limits,
        }
    }

    /// Consumes the source until it ends. Offsets advance after every
    /// message regardless of its outcome: a poison message is dropped,
    /// never retried forever.
    pub async fn run<S: CheckInSource>(&self, source: &mut S) {
        while let Some(message) = source.next().await {
            self.process_envelope(message.received_at, &message.payload).await;
            if let Err(err) = source.commit(message.partition, message.offset).await {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "failed to commit offset"
                );
            }
        }
    }

    /// Handles one transport message of either flavor.
    pub async fn process_envelope(&self, received_at: DateTime<Utc>, payload: &[u8]) {
        // The tick side channel runs for every message; its failures are
        // logged and never abort the message itself.
        if let Err(err) = try_tick_trigger(
            self.tick_register.as_ref(),
            self.tick_dispatcher.as_ref(),
            received_at,
        )
        .await
        {
            error!(error = %err, "failed to trigger monitor tasks");
        }

        match envelope::decode(payload) {
            Ok(Envelope::ClockPulse) => {}
            Ok(Envelope::CheckIn(message)) => {
                let outcome = self.process_check_in(&message).await;
                outcome.record(message.sdk_platform());
            }
            Err(err) => {
                warn!(error = %err, "failed to decode message envelope");
                ProcessingOutcome::FailedPayloadDecode.record("none");
            }
        }
    }

    pub async fn process_check_in(&self, message: &CheckInMessage) -> ProcessingOutcome {
        match self.try_process_check_in(message).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "failed to process check-in");
                ProcessingOutcome::Error
            }
        }
    }

    async fn try_process_check_in(
        &self,
        message: &CheckInMessage,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let params: CheckInPayload = match serde_json::from_str(&message.payload) {
            Ok(params) => params,
            Err(err) => {
                info!(error = %err, "check-in payload failed to decode");
                return Ok(ProcessingOutcome::FailedPayloadDecode);
            }
        };

        let start_time_ms = (message.start_time * 1000.0).round() as i64;
        let Some(start_time) = DateTime::from_timestamp_millis(start_time_ms) else {
            info!(start_time = message.start_time, "check-in start_time out of range");
            return Ok(ProcessingOutcome::FailedPayloadDecode);
        };

        let Ok(project_id) = message.project_id.parse::<i32>() else {
            info!(project_id = %message.project_id, "check-in project_id is not numeric");
            return Ok(ProcessingOutcome::FailedPayloadDecode);
        };

        // The payload slug is not pre-normalized by the transport.
        let monitor_slug = slugify(&params.monitor_slug);
        if monitor_slug.is_empty() {
            info!(raw_slug = %params.monitor_slug, "check-in slug failed validation");
            return Ok(ProcessingOutcome::FailedCheckInValidation);
        }

        let Some(project) = self.projects.get_by_id(project_id).await? else {
            info!(project_id, "check-in for unknown project");
            return Ok(ProcessingOutcome::FailedProjectLookup);
        };

        if self
            .kill_switches
            .is_blocked(DISABLE_CHECK_IN, project.organization_id)
        {
            info!(
                organization_id = project.organization_id,
                monitor_slug = %monitor_slug,
                "check-in blocked via kill switch"
            );
            return Ok(ProcessingOutcome::DroppedBlocked);
        }

        let environment_key = params.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT);
        let ratelimit_key = format!(
            "monitor-checkins:{}:{monitor_slug}:{environment_key}",
            project.organization_id
        );
        if self
            .rate_limiter
            .is_limited(&ratelimit_key, self.quota_limit, self.quota_window)
            .await
        {
            info!(monitor_slug = %monitor_slug, "check-in rate limited");
            return Ok(ProcessingOutcome::DroppedRateLimited);
        }

        let Some(status) = CheckInStatus::from_wire(&params.status) else {
            info!(status = %params.status, "check-in status failed validation");
            return Ok(ProcessingOutcome::FailedCheckInValidation);
        };

        let duration_ms = match params.duration {
            Some(seconds) => {
                let ms = duration_secs_to_ms(seconds);
                if !valid_duration(Some(ms)) {
                    info!(duration_ms = ms, "check-in duration failed validation");
                    return Ok(ProcessingOutcome::FailedCheckInValidation);
                }
                // Bounded by the validity check just above.
                i32::try_from(ms).ok()
            }
            None => None,
        };

        let Ok(check_in_id) = Uuid::parse_str(params.check_in_id.trim()) else {
            info!(check_in_id = %params.check_in_id, "check-in guid failed validation");
            return Ok(ProcessingOutcome::FailedGuidValidation);
        };

        // The zero GUID means "update the most recent unfinished check-in";
        // a fresh GUID stands by in case that falls through to creation.
        let use_latest_checkin = check_in_id.is_nil();
        let guid = if use_latest_checkin { Uuid::new_v4() } else { check_in_id };

        let attrs = CheckInAttributes {
            monitor_slug,
            status,
            duration_ms,
            start_time,
            check_in_id,
            use_latest_checkin,
            guid,
            trace_id: params.trace_id().map(str::to_string),
        };

        let lock_name = format!("checkin-creation:{guid}");
        let lease = match self
            .locks
            .acquire(&lock_name, self.lock_duration, "checkin_creation")
            .await
        {
            Ok(lease) => lease,
            Err(LockError::Unavailable(_)) => {
                info!(%guid, "failed to acquire lock to create check-in");
                return Ok(ProcessingOutcome::FailedCheckInCreationLock);
            }
            Err(err) => return Err(err.into()),
        };

        let result = self.reconcile(&project, &params, &attrs).await;
        lease.release().await;
        result.map_err(Into::into)
    }

    /// The critical section: everything from monitor resolution to the
    /// environment propagation commits or rolls back as one unit.
    async fn reconcile(
        &self,
        project: &project::Model,
        params: &CheckInPayload,
        attrs: &CheckInAttributes,
    ) -> Result<ProcessingOutcome, DbErr> {
        let txn = self.db.begin().await?;
        match self.reconcile_in_txn(&txn, project, params, attrs).await {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn reconcile_in_txn(
        &self,
        txn: &DatabaseTransaction,
        project: &project::Model,
        params: &CheckInPayload,
        attrs: &CheckInAttributes,
    ) -> Result<ProcessingOutcome, DbErr> {
        let monitor = match ensure_monitor_with_config(
            txn,
            project,
            &attrs.monitor_slug,
            &params.monitor_slug,
            params.monitor_config.as_ref(),
            &self.limits,
            self.signals.as_ref(),
        )
        .await
        {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                info!(monitor_slug = %attrs.monitor_slug, "check-in could not resolve a monitor");
                return Ok(ProcessingOutcome::FailedValidation);
            }
            Err(MonitorServiceError::MonitorLimitsExceeded(organization_id)) => {
                info!(organization_id, "monitor exceeds limits for organization");
                return Ok(ProcessingOutcome::FailedMonitorLimits);
            }
            Err(MonitorServiceError::Database(err)) => return Err(err),
        };

        let environment = match ensure_environment(
            txn,
            &monitor,
            params.environment.as_deref(),
            &self.limits,
        )
        .await
        {
            Ok(environment) => environment,
            Err(EnvironmentServiceError::EnvironmentLimitsExceeded(monitor_id)) => {
                info!(monitor_id, "monitor environment exceeds limits for monitor");
                return Ok(ProcessingOutcome::FailedMonitorEnvironmentLimits);
            }
            Err(EnvironmentServiceError::ValidationFailed(field_error)) => {
                info!(message = %field_error.message, "monitor environment name failed validation");
                return Ok(ProcessingOutcome::FailedMonitorEnvironmentNameLength);
            }
            Err(EnvironmentServiceError::Database(err)) => return Err(err),
        };

        let existing = if attrs.use_latest_checkin {
            latest_unfinished(txn, environment.id).await?
        } else {
            let found = find_by_guid(txn, attrs.check_in_id).await?;
            if let Some(ref row) = found {
                if row.monitor_environment_id != environment.id {
                    info!(
                        environment = %environment.environment,
                        check_in_id = %attrs.check_in_id,
                        "monitor environment does not match on existing guid"
                    );
                    return Ok(ProcessingOutcome::FailedMonitorEnvironmentGuidMatch);
                }
            }
            found
        };

        match existing {
            Some(row) => {
                self.update_existing(txn, project, &monitor, &environment, row, attrs)
                    .await
            }
            None => {
                let had_check_ins = monitor_has_check_ins(txn, monitor.id).await?;
                let new = build_new_check_in(
                    attrs.guid,
                    project.id,
                    &monitor,
                    &environment,
                    attrs.status,
                    attrs.duration_ms,
                    attrs.start_time,
                    attrs.trace_id.clone(),
                );
                match create_or_recover(txn, new).await? {
                    CheckInUpsert::Created(row) => {
                        if !had_check_ins {
                            self.signals.first_check_in(project, &monitor).await;
                        }
                        self.finalize(txn, project, &monitor, &environment, &row, attrs)
                            .await
                    }
                    // Lost the insert race; the discovered row takes the
                    // normal update path instead.
                    CheckInUpsert::Raced(row) => {
                        self.update_existing(txn, project, &monitor, &environment, row, attrs)
                            .await
                    }
                }
            }
        }
    }

    async fn update_existing(
        &self,
        txn: &DatabaseTransaction,
        project: &project::Model,
        monitor: &monitor::Model,
        environment: &monitor_environment::Model,
        existing: monitor_check_in::Model,
        attrs: &CheckInAttributes,
    ) -> Result<ProcessingOutcome, DbErr> {
        let config = validated_config(monitor);
        let decision = resolve_update(
            &existing,
            project.id,
            monitor.id,
            environment.id,
            config.as_ref(),
            attrs.status,
            attrs.duration_ms,
            attrs.start_time,
        );

        match decision {
            Err(UpdateRejection::GuidMismatch) => {
                info!(
                    guid = %existing.guid,
                    row_monitor_id = existing.monitor_id,
                    monitor_id = monitor.id,
                    "check-in guid already associated with another monitor"
                );
                Ok(ProcessingOutcome::GuidMismatch)
            }
            Err(UpdateRejection::CheckInFinished) => {
                info!(
                    guid = %existing.guid,
                    from = %existing.status,
                    to = %attrs.status,
                    "check-in was finished; update dropped"
                );
                Ok(ProcessingOutcome::CheckInFinished)
            }
            Err(UpdateRejection::FailedDurationCheck) => {
                info!(guid = %existing.guid, "check-in implicit duration is invalid");
                Ok(ProcessingOutcome::FailedDurationCheck)
            }
            Ok(update) => {
                let row = apply_update(txn, existing, update).await?;
                self.finalize(txn, project, monitor, environment, &row, attrs).await
            }
        }
    }

    /// Propagates the persisted check-in status to the owning environment.
    async fn finalize(
        &self,
        txn: &DatabaseTransaction,
        project: &project::Model,
        monitor: &monitor::Model,
        environment: &monitor_environment::Model,
        check_in: &monitor_check_in::Model,
        attrs: &CheckInAttributes,
    ) -> Result<ProcessingOutcome, DbErr> {
        if check_in.status == CheckInStatus::Error {
            mark_failed(
                txn,
                environment,
                monitor,
                project,
                attrs.start_time,
                attrs.trace_id.as_deref(),
                self.alerts.as_ref(),
            )
            .await?;
        } else {
            mark_ok(txn, environment, monitor, check_in, attrs.start_time).await?;
        }
        Ok(ProcessingOutcome::Complete)
    }
}
