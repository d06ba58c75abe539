//! Resilience around provider calls: per-attempt timeouts and retry with
//! exponential backoff.

mod retry;

pub use retry::{CallOutcome, CallProgress, ProviderClient};
