//! Result caches for inference.
//!
//! [`ResultCacheManager`] keeps memoized results and the cross-thread cells
//! that workers wait on while a result is being computed.

pub mod local;
pub mod manager;
pub mod thread_safe;

pub use local::LocalCache;
pub use manager::{Claim, ResultCacheManager};
pub use thread_safe::ThreadSafeCache;
