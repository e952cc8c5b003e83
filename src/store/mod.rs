//! Job storage.
//!
//! The store is the single registry of job records. It validates the dependency
//! graph on registration and enforces the status lifecycle on every update.

mod job_store;

pub use job_store::{JobStore, StoreSnapshot};
