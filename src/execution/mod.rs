//! Job execution off the dispatch path.

pub mod worker_pool;

pub use worker_pool::{PoolSnapshot, WorkerPool, WorkerPoolError};
