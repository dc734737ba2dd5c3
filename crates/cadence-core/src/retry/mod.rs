//! Retry: bounded retry with fixed or exponential backoff.
//!
//! A separate layer from the scheduler. The scheduler runs each task exactly
//! once; a task body that wants retries wraps its own work here.

mod executor;
mod policy;

pub use executor::{RetryExecutor, with_retry};
pub use policy::RetryPolicy;
