//! Token-bucket rate limiter and the keyed pool that shares limiter
//! instances across the orchestrator (spec §4.2, component C2).

mod bucket;
mod pool;

pub use bucket::RateLimiter;
pub use pool::RateLimiterPool;
