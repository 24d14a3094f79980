//! Transport boundary. The broker client lives out of process; the driver
//! sees an ordered stream of opaque payloads per partition and commits
//! offsets once a message is fully handled (or permanently dropped).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub partition: i32,
    pub offset: i64,
    /// Broker-assigned timestamp; drives the clock tick.
    pub received_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait CheckInSource: Send {
    /// The next message in partition order, or `None` when the stream ends.
    async fn next(&mut self) -> Option<SourceMessage>;

    /// Marks everything up to and including `offset` as handled.
    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), SourceError>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed message list and records commits.
    pub struct VecSource {
        pending: VecDeque<SourceMessage>,
        pub committed: Vec<(i32, i64)>,
    }

    impl VecSource {
        pub fn new(messages: impl IntoIterator<Item = SourceMessage>) -> Self {
            Self {
                pending: messages.into_iter().collect(),
                committed: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CheckInSource for VecSource {
        async fn next(&mut self) -> Option<SourceMessage> {
            self.pending.pop_front()
        }

        async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), SourceError> {
            self.committed.push((partition, offset));
            Ok(())
        }
    }
}
