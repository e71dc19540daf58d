//! Read-through cache keyed by resource and scope.
//!
//! Entries expire lazily: a read past the TTL is a miss and drops the entry.
//! Fetches for the same key are single-flight, so a burst of readers against
//! a cold key issues one request.

mod cache;
mod key;

pub use cache::{CacheStats, ReadThroughCache};
pub use key::CacheKey;
