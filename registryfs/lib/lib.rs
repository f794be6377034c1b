//! `registryfs` exposes an OCI / Docker Registry v2 blob store as a read-only,
//! random-access file abstraction.
//!
//! # Overview
//!
//! Each "file" is a blob addressed by a registry URL; reads translate to
//! authenticated, possibly redirected, ranged HTTP `GET` requests against the
//! remote registry, optionally routed through a peer-to-peer accelerator.
//! Three expiring caches keep the hot path off the network:
//!
//! - a blob-size cache, so `metadata` does not probe the registry per call,
//! - a bearer-token cache keyed by challenge scope, so range reads do not
//!   re-authenticate, and
//! - a resolved-URL cache recording, per blob URL, whether the registry
//!   serves blobs itself (attach a `Bearer` header) or redirects to a
//!   pre-signed object-store URL (no auth header).
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use registryfs::RegistryFileSystem;
//!
//! # async fn example() -> registryfs::RegistryFsResult<()> {
//! let fs = RegistryFileSystem::new(Arc::new(|_url: &str| {
//!     ("user".to_string(), "secret".to_string())
//! }))?;
//!
//! let file = fs.open("https://registry.example/v2/library/app/blobs/sha256:aa").await?;
//! let mut buf = vec![0u8; 4096];
//! let n = file.read_at(&mut buf, 0).await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```
//!
//! The filesystem is read-only: every mutating operation reports
//! [`RegistryFsError::NotImplemented`].

#![warn(missing_docs)]

mod auth;
mod deadline;
mod defaults;
mod error;
mod file;
mod filesystem;
mod metadata;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use auth::*;
pub use deadline::*;
pub use defaults::*;
pub use error::*;
pub use file::*;
pub use filesystem::*;
pub use metadata::*;
