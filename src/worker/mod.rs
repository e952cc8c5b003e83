//! Job execution.
//!
//! - **JobRegistry**: name → body table built at process start
//! - **JobContext**: per-attempt handle with cancellation, tracing span, and progress
//! - **WorkerPool**: semaphore-bounded slots that run bodies and report outcomes

mod context;
mod pool;
mod registry;

pub use context::JobContext;
pub use pool::{WorkerConfig, WorkerEvent, WorkerPool};
pub use registry::{JobHandler, JobRegistry};
