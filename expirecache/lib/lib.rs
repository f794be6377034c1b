//! `expirecache` is an expiring keyed cache with single-flight construction.
//!
//! Values are built lazily by an async constructor, live for a fixed TTL, and
//! are handed out through handles that pin them for the duration of a use.
//! Dropping a handle releases the value; [`CacheHandle::invalidate`] releases
//! it and forces the next acquire to rebuild it.

#![warn(missing_docs)]

mod cache;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
