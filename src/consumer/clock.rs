//! Leader-less clock-tick deduplication.
//!
//! Every consumer instance, on every message, offers to claim the current
//! minute. The register's atomic GETSET guarantees at most one winner per
//! minute across all instances; the winner dispatches the periodic monitor
//! sweep. No lock wraps this path; it runs on every message and leans
//! entirely on the register's own atomicity.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::gauge;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{info, warn};

/// Shared register key holding the last claimed minute as epoch seconds.
pub const LAST_TICK_KEY: &str = "monitors:last-tick-ts";

#[derive(Debug, Error)]
pub enum TickRegisterError {
    #[error("tick register backend error: {0}")]
    Backend(String),
}

/// The shared compare-and-swap register. `getset` must atomically store the
/// new value and return the previous one.
#[async_trait]
pub trait TickRegister: Send + Sync {
    async fn get(&self) -> Result<Option<i64>, TickRegisterError>;
    async fn getset(&self, value: i64) -> Result<Option<i64>, TickRegisterError>;
}

/// Receives the minute a winning claim fires for.
#[async_trait]
pub trait TickDispatcher: Send + Sync {
    async fn dispatch(&self, tick: DateTime<Utc>);
}

/// Production dispatcher. The sweep tasks themselves run elsewhere; the
/// winning tick is recorded here for them to pick up.
pub struct LoggingTickDispatcher;

#[async_trait]
impl TickDispatcher for LoggingTickDispatcher {
    async fn dispatch(&self, tick: DateTime<Utc>) {
        info!(tick = %tick, "monitor sweep tick dispatched");
    }
}

/// Claims the minute of `ts` if nobody has yet.
///
/// Exactly one caller per minute observes a GETSET previous value equal to
/// its pre-check read and wins. A reference minute at or below the stored
/// value is already handled, possibly by a partition running slightly
/// ahead, and is not an error.
pub async fn try_tick_trigger(
    register: &dyn TickRegister,
    dispatcher: &dyn TickDispatcher,
    ts: DateTime<Utc>,
) -> Result<bool, TickRegisterError> {
    let reference_ts = ts.timestamp() - ts.timestamp().rem_euclid(60);

    let precheck = register.get().await?;
    if let Some(last) = precheck {
        if last >= reference_ts {
            return Ok(false);
        }
    }

    let previous = register.getset(reference_ts).await?;
    if previous != precheck {
        // Another instance won the swap between our read and write.
        return Ok(false);
    }

    gauge!("monitors_clock_tick_delay_seconds")
        .set((Utc::now().timestamp() - reference_ts) as f64);

    if let Some(last) = previous {
        if reference_ts > last + 60 {
            warn!(last_ts = last, reference_ts, "monitor clock skipped a tick");
        }
    }

    info!(reference_ts, "monitors clock tick");

    let tick = DateTime::from_timestamp(reference_ts, 0).unwrap_or(ts);
    dispatcher.dispatch(tick).await;
    Ok(true)
}

pub struct RedisTickRegister {
    redis: ConnectionManager,
    key: String,
}

impl RedisTickRegister {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            key: LAST_TICK_KEY.to_string(),
        }
    }
}

#[async_trait]
impl TickRegister for RedisTickRegister {
    async fn get(&self) -> Result<Option<i64>, TickRegisterError> {
        let mut conn = self.redis.clone();
        conn.get(&self.key)
            .await
            .map_err(|e| TickRegisterError::Backend(e.to_string()))
    }

    async fn getset(&self, value: i64) -> Result<Option<i64>, TickRegisterError> {
        let mut conn = self.redis.clone();
        conn.getset(&self.key, value)
            .await
            .map_err(|e| TickRegisterError::Backend(e.to_string()))
    }
}

/// Process-local register for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryTickRegister {
    value: Mutex<Option<i64>>,
}

#[async_trait]
impl TickRegister for InMemoryTickRegister {
    async fn get(&self) -> Result<Option<i64>, TickRegisterError> {
        Ok(*self
            .value
            .lock()
            .map_err(|_| TickRegisterError::Backend("register poisoned".to_string()))?)
    }

    async fn getset(&self, value: i64) -> Result<Option<i64>, TickRegisterError> {
        let mut stored = self
            .value
            .lock()
            .map_err(|_| TickRegisterError::Backend("register poisoned".to_string()))?;
        Ok(stored.replace(value))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    #[derive(Default)]
    pub struct RecordingTickDispatcher {
        pub ticks: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl TickDispatcher for RecordingTickDispatcher {
        async fn dispatch(&self, tick: DateTime<Utc>) {
            self.ticks.lock().unwrap().push(tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTickDispatcher;
    use super::*;
    use std::sync::Arc;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_first_claim_wins_and_dispatches_minute_boundary() {
        let register = InMemoryTickRegister::default();
        let dispatcher = RecordingTickDispatcher::default();

        let claimed = try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:00:42Z"))
            .await
            .unwrap();

        assert!(claimed);
        assert_eq!(
            *dispatcher.ticks.lock().unwrap(),
            vec![dt("2024-03-01T10:00:00Z")]
        );
    }

    #[tokio::test]
    async fn test_same_minute_claims_once() {
        let register = InMemoryTickRegister::default();
        let dispatcher = RecordingTickDispatcher::default();

        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:00:05Z"))
                .await
                .unwrap()
        );
        assert!(
            !try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:00:59Z"))
                .await
                .unwrap()
        );
        assert_eq!(dispatcher.ticks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_older_reference_minute_is_rejected() {
        let register = InMemoryTickRegister::default();
        let dispatcher = RecordingTickDispatcher::default();

        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:05:00Z"))
                .await
                .unwrap()
        );
        // A partition lagging behind another offers an older minute.
        assert!(
            !try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:03:00Z"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_next_minute_claims_again() {
        let register = InMemoryTickRegister::default();
        let dispatcher = RecordingTickDispatcher::default();

        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:00:30Z"))
                .await
                .unwrap()
        );
        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:01:02Z"))
                .await
                .unwrap()
        );
        assert_eq!(dispatcher.ticks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_minute_still_claims() {
        let register = InMemoryTickRegister::default();
        let dispatcher = RecordingTickDispatcher::default();

        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:00:00Z"))
                .await
                .unwrap()
        );
        // Two minutes of silence; the gap is telemetry, not an error.
        assert!(
            try_tick_trigger(&register, &dispatcher, dt("2024-03-01T10:03:00Z"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let register = Arc::new(InMemoryTickRegister::default());
        let dispatcher = Arc::new(RecordingTickDispatcher::default());
        let ts = dt("2024-03-01T10:00:10Z");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let register = Arc::clone(&register);
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                try_tick_trigger(register.as_ref(), dispatcher.as_ref(), ts)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(dispatcher.ticks.lock().unwrap().len(), 1);
    }
}
