//! Schema validation for monitor configuration payloads.
//!
//! Raw JSON never crosses this boundary: callers get either a
//! [`ValidatedMonitorConfig`] or a structured list of [`FieldError`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::monitors::schedule::{CronSchedule, IntervalUnit, Schedule, ScheduleParseError};

pub const MAX_ENVIRONMENT_NAME_LENGTH: usize = 64;
pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Crontab,
    Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleValue {
    Crontab(String),
    Interval(u32, IntervalUnit),
}

/// A monitor config that passed schema validation. Serialized as-is into
/// the monitor row and into check-in config snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedMonitorConfig {
    pub schedule_type: ScheduleType,
    pub schedule: ScheduleValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Minutes of grace past the scheduled time before a check-in counts
    /// as late.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkin_margin: Option<u32>,
    /// Minutes an in-progress check-in may run before it times out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_issue_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_threshold: Option<u32>,
}

impl ValidatedMonitorConfig {
    /// Rebuilds the runtime schedule. Validation guarantees this parses for
    /// configs produced by [`validate_config`]; stored documents from other
    /// writers may still fail.
    pub fn schedule(&self) -> Result<Schedule, ScheduleParseError> {
        match (&self.schedule_type, &self.schedule) {
            (ScheduleType::Crontab, ScheduleValue::Crontab(expr)) => {
                Ok(Schedule::Crontab(expr.parse::<CronSchedule>()?))
            }
            (ScheduleType::Interval, ScheduleValue::Interval(value, unit)) => {
                Schedule::interval(*value, *unit)
            }
            // Mismatched tag and value in a stored document.
            (_, ScheduleValue::Crontab(expr)) => Ok(Schedule::Crontab(expr.parse()?)),
            (_, ScheduleValue::Interval(value, unit)) => Schedule::interval(*value, *unit),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Validates a raw `monitor_config` payload against the schema.
pub fn validate_config(raw: &Value) -> Result<ValidatedMonitorConfig, Vec<FieldError>> {
    let Some(obj) = raw.as_object() else {
        return Err(vec![FieldError::new("monitor_config", "expected an object")]);
    };

    let mut errors = Vec::new();

    let schedule_type = match obj.get("schedule_type") {
        None => Some(ScheduleType::Crontab),
        Some(Value::String(s)) => match s.as_str() {
            "crontab" => Some(ScheduleType::Crontab),
            "interval" => Some(ScheduleType::Interval),
            other => {
                errors.push(FieldError::new(
                    "schedule_type",
                    format!("unknown schedule type: {other}"),
                ));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("schedule_type", "expected a string"));
            None
        }
    };

    let schedule = match (schedule_type, obj.get("schedule")) {
        (_, None) => {
            errors.push(FieldError::new("schedule", "this field is required"));
            None
        }
        (Some(ScheduleType::Crontab), Some(Value::String(expr))) => {
            match expr.parse::<CronSchedule>() {
                Ok(cron) => Some(ScheduleValue::Crontab(cron.to_string())),
                Err(err) => {
                    errors.push(FieldError::new("schedule", err.to_string()));
                    None
                }
            }
        }
        (Some(ScheduleType::Interval), Some(value)) => match parse_interval(value) {
            Ok((interval, unit)) => Some(ScheduleValue::Interval(interval, unit)),
            Err(message) => {
                errors.push(FieldError::new("schedule", message));
                None
            }
        },
        (Some(_), Some(_)) => {
            errors.push(FieldError::new("schedule", "schedule does not match schedule_type"));
            None
        }
        // schedule_type itself failed; the schedule value cannot be judged.
        (None, Some(_)) => None,
    };

    let timezone = match obj.get("timezone") {
        None | Some(Value::Null) => None,
        Some(Value::String(tz)) if is_valid_timezone_name(tz) => Some(tz.clone()),
        Some(_) => {
            errors.push(FieldError::new("timezone", "not a valid timezone name"));
            None
        }
    };

    let checkin_margin = read_u32(obj, "checkin_margin", 0, &mut errors);
    let max_runtime = read_u32(obj, "max_runtime", 1, &mut errors);
    let failure_issue_threshold = read_u32(obj, "failure_issue_threshold", 1, &mut errors);
    let recovery_threshold = read_u32(obj, "recovery_threshold", 1, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let (Some(schedule_type), Some(schedule)) = (schedule_type, schedule) else {
        return Err(vec![FieldError::new("schedule", "this field is required")]);
    };

    Ok(ValidatedMonitorConfig {
        schedule_type,
        schedule,
        timezone,
        checkin_margin,
        max_runtime,
        failure_issue_threshold,
        recovery_threshold,
    })
}

/// Over-length or empty environment names abort the whole check-in.
pub fn validate_environment_name(name: &str) -> Result<(), FieldError> {
    if name.is_empty() {
        return Err(FieldError::new("environment", "environment name must not be empty"));
    }
    if name.len() > MAX_ENVIRONMENT_NAME_LENGTH {
        return Err(FieldError::new(
            "environment",
            format!("environment name longer than {MAX_ENVIRONMENT_NAME_LENGTH} characters"),
        ));
    }
    Ok(())
}

fn parse_interval(value: &Value) -> Result<(u32, IntervalUnit), String> {
    let Some(parts) = value.as_array() else {
        return Err("interval schedule must be a [value, unit] pair".to_string());
    };
    if parts.len() != 2 {
        return Err("interval schedule must be a [value, unit] pair".to_string());
    }
    let interval = parts[0]
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v >= 1)
        .ok_or_else(|| "interval value must be a positive integer".to_string())?;
    let unit: IntervalUnit = serde_json::from_value(parts[1].clone())
        .map_err(|_| format!("unknown interval unit: {}", parts[1]))?;
    Ok((interval, unit))
}

fn read_u32(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
    min: u32,
    errors: &mut Vec<FieldError>,
) -> Option<u32> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) if v >= min => Some(v),
            _ => {
                errors.push(FieldError::new(field, format!("must be an integer >= {min}")));
                None
            }
        },
    }
}

fn is_valid_timezone_name(tz: &str) -> bool {
    !tz.is_empty()
        && tz.len() <= 64
        && tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '+' | '-'))
}
