//! Monitor registry: find-or-create by slug with the transitional raw-slug
//! fallback, config validation, and the explicit config-update mutation.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MonitorLimits;
use crate::db::entities::{monitor, prelude::Monitor, project};
use crate::db::enums::{MonitorStatus, MonitorType};
use crate::monitors::validators::{ValidatedMonitorConfig, validate_config};
use crate::signals::SignalEmitter;

#[derive(Debug, Error)]
pub enum MonitorServiceError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("organization {0} exceeds its monitor limit")]
    MonitorLimitsExceeded(i32),
}

/// The monitor's stored config, parsed. `None` when the monitor has no
/// config or the stored document no longer matches the schema.
pub fn validated_config(monitor: &monitor::Model) -> Option<ValidatedMonitorConfig> {
    monitor
        .config
        .as_ref()
        .and_then(ValidatedMonitorConfig::from_json)
}

pub async fn find_by_slug<C: ConnectionTrait>(
    db: &C,
    organization_id: i32,
    project_id: i32,
    slug: &str,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::OrganizationId.eq(organization_id))
        .filter(monitor::Column::ProjectId.eq(project_id))
        .filter(monitor::Column::Slug.eq(slug))
        .one(db)
        .await
}

/// Resolves (and possibly creates or reconfigures) the monitor for an
/// incoming check-in.
///
/// Lookup tries the slugified slug first, then the raw payload slug: a
/// transitional dual-read for monitors registered before slugs were
/// normalized on upsert. An absent config returns whatever was found; an
/// invalid config is logged and otherwise ignored so it never blocks the
/// check-in itself.
pub async fn ensure_monitor_with_config<C: ConnectionTrait>(
    db: &C,
    project: &project::Model,
    slug: &str,
    raw_slug: &str,
    config_payload: Option<&serde_json::Value>,
    limits: &MonitorLimits,
    signals: &dyn SignalEmitter,
) -> Result<Option<monitor::Model>, MonitorServiceError> {
    let mut monitor = find_by_slug(db, project.organization_id, project.id, slug).await?;

    // TODO(slug-migration): drop the raw-slug fallback once all stored
    // slugs are normalized.
    if monitor.is_none() && raw_slug != slug {
        monitor = find_by_slug(db, project.organization_id, project.id, raw_slug).await?;
    }

    let Some(config_payload) = config_payload else {
        return Ok(monitor);
    };

    let validated = match validate_config(config_payload) {
        Ok(validated) => validated,
        Err(errors) => {
            info!(monitor_slug = slug, ?errors, "invalid monitor_config");
            return Ok(monitor);
        }
    };

    match monitor {
        None => {
            let created = create_monitor(db, project, slug, &validated, limits, signals).await?;
            Ok(Some(created))
        }
        Some(monitor) => {
            let new_config = validated.to_json();
            if monitor.config.as_ref() == Some(&new_config) {
                // Identical config: idempotent no-op.
                return Ok(Some(monitor));
            }
            let updated = update_config(db, monitor, &validated).await?;
            Ok(Some(updated))
        }
    }
}

async fn create_monitor<C: ConnectionTrait>(
    db: &C,
    project: &project::Model,
    slug: &str,
    config: &ValidatedMonitorConfig,
    limits: &MonitorLimits,
    signals: &dyn SignalEmitter,
) -> Result<monitor::Model, MonitorServiceError> {
    let existing = Monitor::find()
        .filter(monitor::Column::OrganizationId.eq(project.organization_id))
        .count(db)
        .await?;

    if existing >= limits.max_monitors_per_org {
        return Err(MonitorServiceError::MonitorLimitsExceeded(
            project.organization_id,
        ));
    }

    let now = Utc::now();
    let created = monitor::ActiveModel {
        organization_id: Set(project.organization_id),
        project_id: Set(project.id),
        slug: Set(slug.to_string()),
        name: Set(slug.to_string()),
        status: Set(MonitorStatus::Active),
        monitor_type: Set(MonitorType::CronJob),
        config: Set(Some(config.to_json())),
        config_version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    if existing == 0 {
        signals.first_monitor_created(project, &created).await;
    }

    Ok(created)
}

/// The only write path for monitor configs. Bumps `config_version` so
/// downstream caches and schedule projections notice the change.
pub async fn update_config<C: ConnectionTrait>(
    db: &C,
    monitor: monitor::Model,
    validated: &ValidatedMonitorConfig,
) -> Result<monitor::Model, DbErr> {
    let next_version = monitor.config_version + 1;
    warn!(
        monitor_slug = %monitor.slug,
        config_version = next_version,
        "applying monitor config update"
    );

    let mut active: monitor::ActiveModel = monitor.into();
    active.config = Set(Some(validated.to_json()));
    active.config_version = Set(next_version);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    use crate::signals::testing::RecordingSignalEmitter;

    fn project_model() -> project::Model {
        project::Model {
            id: 7,
            organization_id: 42,
            slug: "backend".to_string(),
            name: "Backend".to_string(),
        }
    }

    fn monitor_model(config: Option<serde_json::Value>) -> monitor::Model {
        monitor::Model {
            id: 3,
            organization_id: 42,
            project_id: 7,
            slug: "nightly-backup".to_string(),
            name: "nightly-backup".to_string(),
            status: MonitorStatus::Active,
            monitor_type: MonitorType::CronJob,
            config,
            config_version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ensure_monitor_without_config_returns_lookup_result() {
        let found = monitor_model(None);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found.clone()]])
            .into_connection();

        let signals = RecordingSignalEmitter::default();
        let resolved = ensure_monitor_with_config(
            &db,
            &project_model(),
            "nightly-backup",
            "Nightly Backup",
            None,
            &MonitorLimits::default(),
            &signals,
        )
        .await
        .unwrap();

        assert_eq!(resolved, Some(found));
        assert!(signals.monitor_created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_monitor_falls_back_to_raw_slug() {
        let found = monitor_model(None);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // Slugified lookup misses; raw-slug lookup hits.
            .append_query_results([Vec::<monitor::Model>::new(), vec![found.clone()]])
            .into_connection();

        let resolved = ensure_monitor_with_config(
            &db,
            &project_model(),
            "nightly-backup",
            "Nightly Backup",
            None,
            &MonitorLimits::default(),
            &RecordingSignalEmitter::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolved, Some(found));
    }

    #[tokio::test]
    async fn test_identical_config_is_a_no_op() {
        let payload = json!({ "schedule_type": "crontab", "schedule": "0 * * * *" });
        let stored = validate_config(&payload).unwrap().to_json();
        let found = monitor_model(Some(stored));

        // Only the slug lookup is scripted: an update would fail the mock.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found.clone()]])
            .into_connection();

        let resolved = ensure_monitor_with_config(
            &db,
            &project_model(),
            "nightly-backup",
            "nightly-backup",
            Some(&payload),
            &MonitorLimits::default(),
            &RecordingSignalEmitter::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolved, Some(found));
    }

    #[tokio::test]
    async fn test_invalid_config_returns_monitor_unchanged() {
        let found = monitor_model(None);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found.clone()]])
            .into_connection();

        let resolved = ensure_monitor_with_config(
            &db,
            &project_model(),
            "nightly-backup",
            "nightly-backup",
            Some(&json!({ "schedule": "bogus" })),
            &MonitorLimits::default(),
            &RecordingSignalEmitter::default(),
        )
        .await
        .unwrap();

        // Invalid config neither blocks nor mutates.
        assert_eq!(resolved, Some(found));
    }

    #[test]
    fn test_validated_config_tolerates_corrupt_documents() {
        let monitor = monitor_model(Some(json!({ "schedule": 42 })));
        assert!(validated_config(&monitor).is_none());
    }
}
