use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use sea_orm::Database;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cronwatch::alerting::LoggingAlertSink;
use cronwatch::config::ConsumerConfig;
use cronwatch::consumer::clock::{LoggingTickDispatcher, RedisTickRegister};
use cronwatch::consumer::processor::{CheckInConsumer, ConsumerHandles};
use cronwatch::consumer::source::{CheckInSource, SourceError, SourceMessage};
use cronwatch::db::services::project_service::CachedProjectLookup;
use cronwatch::killswitch::StaticKillSwitches;
use cronwatch::locking::{LockManager, RedisLeaseBackend};
use cronwatch::ratelimit::RedisRateLimiter;
use cronwatch::signals::LoggingSignalEmitter;

fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();
}

/// Development source: one JSON envelope per stdin line. The production
/// broker client implements [`CheckInSource`] out of process.
struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
    offset: i64,
}

impl StdinSource {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            offset: 0,
        }
    }
}

#[async_trait]
impl CheckInSource for StdinSource {
    async fn next(&mut self) -> Option<SourceMessage> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            if line.trim().is_empty() {
                continue;
            }
            self.offset += 1;
            return Some(SourceMessage {
                partition: 0,
                offset: self.offset,
                received_at: Utc::now(),
                payload: line.into_bytes(),
            });
        }
    }

    async fn commit(&mut self, _partition: i32, _offset: i64) -> Result<(), SourceError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_logging();

    let config = ConsumerConfig::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    let projects_db = Database::connect(&config.database_url).await?;
    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis = ConnectionManager::new(redis_client).await?;

    let handles = ConsumerHandles {
        projects: Arc::new(CachedProjectLookup::new(projects_db)),
        locks: LockManager::new(Arc::new(RedisLeaseBackend::new(redis.clone()))),
        rate_limiter: Arc::new(RedisRateLimiter::new(redis.clone())),
        tick_register: Arc::new(RedisTickRegister::new(redis)),
        tick_dispatcher: Arc::new(LoggingTickDispatcher),
        kill_switches: Arc::new(StaticKillSwitches::new(
            config.blocked_organizations.iter().copied(),
        )),
        signals: Arc::new(LoggingSignalEmitter),
        alerts: Arc::new(LoggingAlertSink),
    };

    let consumer = CheckInConsumer::new(db, handles, &config);

    info!("check-in consumer started");
    let mut source = StdinSource::new();
    consumer.run(&mut source).await;
    info!("check-in source ended; shutting down");

    Ok(())
}
