use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "check_in_status_enum")]
pub enum CheckInStatus {
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "OK")]
    Ok,
    #[sea_orm(string_value = "ERROR")]
    Error,
    /// Reachable only via the periodic sweep, never via ingestion.
    #[sea_orm(string_value = "MISSED")]
    Missed,
    /// Reachable only via the periodic sweep, never via ingestion.
    #[sea_orm(string_value = "TIMEOUT")]
    Timeout,
}

impl CheckInStatus {
    /// Statuses past which the ingestion path accepts no further updates.
    pub fn terminal_values() -> [CheckInStatus; 4] {
        [
            CheckInStatus::Ok,
            CheckInStatus::Error,
            CheckInStatus::Missed,
            CheckInStatus::Timeout,
        ]
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckInStatus::InProgress)
    }

    /// Parses the wire representation. Only the client-reportable subset is
    /// accepted here; `missed`/`timeout` are sweep-owned.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(CheckInStatus::InProgress),
            "ok" => Some(CheckInStatus::Ok),
            "error" => Some(CheckInStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_status_enum")]
pub enum MonitorStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "DISABLED")]
    Disabled,
    #[sea_orm(string_value = "PENDING_DELETION")]
    PendingDeletion,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_type_enum")]
pub enum MonitorType {
    #[sea_orm(string_value = "UNKNOWN")]
    Unknown,
    #[sea_orm(string_value = "CRON_JOB")]
    CronJob,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Run-state projection of a monitor within one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "environment_state_enum")]
pub enum EnvironmentState {
    #[sea_orm(string_value = "OK")]
    Ok,
    #[sea_orm(string_value = "ERROR")]
    Error,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!CheckInStatus::InProgress.is_terminal());
        for status in CheckInStatus::terminal_values() {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_from_wire_rejects_sweep_owned_statuses() {
        assert_eq!(CheckInStatus::from_wire("ok"), Some(CheckInStatus::Ok));
        assert_eq!(
            CheckInStatus::from_wire("in_progress"),
            Some(CheckInStatus::InProgress)
        );
        assert_eq!(CheckInStatus::from_wire("error"), Some(CheckInStatus::Error));
        assert_eq!(CheckInStatus::from_wire("missed"), None);
        assert_eq!(CheckInStatus::from_wire("timeout"), None);
        assert_eq!(CheckInStatus::from_wire("OK"), None);
    }
}
