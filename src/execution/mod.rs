//! Query Execution Support
//!
//! - Result caching keyed by query signature
//! - Bounded waits with cooperative cancellation

pub mod cache;
mod cancel;

pub use cache::{signature, CacheStats, CacheStore, MemoryCacheStore, ResultCache};
pub use cancel::{CancelHandle, Interrupted, WaitGuard};
