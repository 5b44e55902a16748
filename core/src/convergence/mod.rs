//! Convergence: bring remote resources to the desired state.
//!
//! The `engine` walks the resource graph in dependency order and upserts each
//! node. The `retry` module provides retry policies with backoff for
//! transient failures, `state` the record carried between runs, and `cancel`
//! cooperative interruption between nodes.

pub mod cancel;
pub mod engine;
pub mod retry;
pub mod state;

pub use cancel::CancelFlag;
pub use engine::{ApplyReport, Engine, NodeOutcome, NodeReport};
pub use retry::RetryPolicy;
pub use state::ConvergedState;
