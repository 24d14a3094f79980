//! Boundary to the alerting pipeline. The ingestion path only produces
//! failure occurrences; issue thresholds, grouping, and delivery live in
//! the downstream collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Everything the alerting collaborator needs to open or extend an issue
/// for a failed monitor environment.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorFailureOccurrence {
    pub organization_id: i32,
    pub project_id: i32,
    pub monitor_id: i32,
    pub monitor_environment_id: i32,
    pub monitor_slug: String,
    pub environment: String,
    pub failed_at: DateTime<Utc>,
    pub trace_id: Option<String>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn dispatch_failure(&self, occurrence: MonitorFailureOccurrence);
}

/// Default sink: surfaces the failure in the log stream.
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn dispatch_failure(&self, occurrence: MonitorFailureOccurrence) {
        warn!(
            monitor_slug = %occurrence.monitor_slug,
            environment = %occurrence.environment,
            trace_id = occurrence.trace_id.as_deref().unwrap_or("none"),
            "monitor environment marked failed"
        );
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingAlertSink {
        pub occurrences: Mutex<Vec<MonitorFailureOccurrence>>,
    }

    #[async_trait]
    impl AlertSink for RecordingAlertSink {
        async fn dispatch_failure(&self, occurrence: MonitorFailureOccurrence) {
            self.occurrences.lock().unwrap().push(occurrence);
        }
    }
}
