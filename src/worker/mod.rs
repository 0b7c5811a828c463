//! Worker engine: poll loop, claim-and-dispatch, bounded concurrency,
//! per-job timeouts, and graceful shutdown drain.

mod engine;

pub use engine::{Worker, WorkerConfig};
