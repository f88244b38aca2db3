//! Email delivery dispatch.
//!
//! One `run_batch` call is one bounded unit of work: compute the send budget
//! from the rate limiter, claim that many due tasks, fan them out across
//! bounded parallelism (render, send, record), then reconcile any campaigns
//! the batch touched. No state is carried between invocations; task status
//! and rate counters live in shared external stores, so multiple dispatcher
//! instances can run the same loop concurrently.

mod dispatcher;
mod error;
mod reconciler;

pub use dispatcher::{BatchSummary, Dispatcher, DispatcherConfig, DispatcherPorts, TaskOutcome};
pub use error::{DispatchError, DispatchResult};
pub use reconciler::CampaignReconciler;
