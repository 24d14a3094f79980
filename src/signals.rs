//! One-time activation signals consumed by out-of-process collaborators
//! (onboarding, quota bookkeeping). Emission is fire-and-forget; receivers
//! own the "only once" bookkeeping beyond what the ingestion path detects.

use async_trait::async_trait;
use tracing::info;

use crate::db::entities::{monitor, project};

#[async_trait]
pub trait SignalEmitter: Send + Sync {
    /// The organization's first monitor was just created from a check-in.
    async fn first_monitor_created(&self, project: &project::Model, monitor: &monitor::Model);

    /// The monitor received its first check-in ever.
    async fn first_check_in(&self, project: &project::Model, monitor: &monitor::Model);
}

/// Default emitter: records the signal in the log stream.
pub struct LoggingSignalEmitter;

#[async_trait]
impl SignalEmitter for LoggingSignalEmitter {
    async fn first_monitor_created(&self, project: &project::Model, monitor: &monitor::Model) {
        info!(
            organization_id = project.organization_id,
            project_id = project.id,
            monitor_slug = %monitor.slug,
            "first monitor created"
        );
    }

    async fn first_check_in(&self, project: &project::Model, monitor: &monitor::Model) {
        info!(
            organization_id = project.organization_id,
            project_id = project.id,
            monitor_slug = %monitor.slug,
            "first check-in received"
        );
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records emitted signals for assertions.
    #[derive(Default)]
    pub struct RecordingSignalEmitter {
        pub monitor_created: Mutex<Vec<String>>,
        pub check_ins: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SignalEmitter for RecordingSignalEmitter {
        async fn first_monitor_created(&self, _project: &project::Model, monitor: &monitor::Model) {
            self.monitor_created.lock().unwrap().push(monitor.slug.clone());
        }

        async fn first_check_in(&self, _project: &project::Model, monitor: &monitor::Model) {
            self.check_ins.lock().unwrap().push(monitor.slug.clone());
        }
    }
}
