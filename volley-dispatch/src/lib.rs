//! Bulk message dispatch over pooled, periodically refreshed SMTP sessions.
//!
//! Messages are split into batches. Each batch is worked through by one
//! [`BatchWorker`] over one [`Session`] at a time, and at most
//! `max_connections` workers run concurrently. Every input message ends up
//! in the [`DispatchReport`] as either sent or failed.

mod batch;
mod config;
mod dispatcher;
mod error;
mod report;
mod session;
pub mod timing;
mod worker;

pub use batch::{Batch, WireMessage};
pub use config::DispatchConfig;
pub use dispatcher::Dispatcher;
pub use error::{FailureReason, SendError, SessionError};
pub use report::{BatchReport, DispatchReport, FailedMessage, LatencyStats, SendOutcome};
pub use session::{Session, SessionOptions, SessionState};
pub use timing::{Phase, TimingAggregator, TimingSummary};
pub use worker::BatchWorker;
