//! The check-in ingestion driver: envelope decoding, the once-per-minute
//! clock-tick trigger, and the per-message reconciliation pipeline.

pub mod clock;
pub mod envelope;
pub mod processor;
pub mod source;
