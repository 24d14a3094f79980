//! The `services` module is the data-access API for the monitor tables.
//! It encapsulates all query logic so the consumer and any other callers
//! work with domain models without knowing the underlying schema.
//!
//! Reconciliation-critical functions take `&impl ConnectionTrait` so they
//! compose into the caller's transaction.

pub mod check_in_service;
pub mod environment_service;
pub mod monitor_service;
pub mod project_service;
