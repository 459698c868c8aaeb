//! On-disk caching layer shared by `mail-pop` and `mail-imap`: the
//! content-addressed body cache (§4.C) and the serialized header
//! cache (§4.D).

pub mod body_cache;
pub mod header_cache;

pub use body_cache::{BodyCache, BodyCacheVisitor};
pub use header_cache::{CachedHeader, HeaderCache};
