use std::env;

/// Cardinality ceilings enforced when check-ins materialize new rows.
#[derive(Debug, Clone, Copy)]
pub struct MonitorLimits {
    pub max_monitors_per_org: u64,
    pub max_environments_per_monitor: u64,
}

impl Default for MonitorLimits {
    fn default() -> Self {
        Self {
            max_monitors_per_org: 10_000,
            max_environments_per_monitor: 1_000,
        }
    }
}

#[derive(Clone)]
pub struct ConsumerConfig {
    pub database_url: String,
    pub redis_url: String,
    pub checkin_quota_limit: u32,
    pub checkin_quota_window_secs: u64,
    pub checkin_lock_duration_secs: u64,
    pub limits: MonitorLimits,
    /// Organization ids for which check-in processing is switched off.
    pub blocked_organizations: Vec<i32>,
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url = env::var("REDIS_URL")
            .map_err(|_| "REDIS_URL must be set".to_string())?;

        let checkin_quota_limit = parse_or("CHECKIN_QUOTA_LIMIT", 5)?;
        let checkin_quota_window_secs = parse_or("CHECKIN_QUOTA_WINDOW_SECS", 60)?;
        let checkin_lock_duration_secs = parse_or("CHECKIN_LOCK_DURATION_SECS", 2)?;

        let limits = MonitorLimits {
            max_monitors_per_org: parse_or("MAX_MONITORS_PER_ORG", 10_000)?,
            max_environments_per_monitor: parse_or("MAX_ENVIRONMENTS_PER_MONITOR", 1_000)?,
        };

        let blocked_organizations = match env::var("BLOCKED_ORGANIZATIONS") {
            Ok(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim()
                        .parse::<i32>()
                        .map_err(|_| format!("BLOCKED_ORGANIZATIONS contains a non-integer id: {s}"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => Vec::new(),
        };

        Ok(ConsumerConfig {
            database_url,
            redis_url,
            checkin_quota_limit,
            checkin_quota_window_secs,
            checkin_lock_duration_secs,
            limits,
            blocked_organizations,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}
