//! Cairn Core - Content-addressed storage primitives for cairn repositories
//!
//! This crate provides the foundational storage layer:
//! - BLAKE3 content digests
//! - Blob storage with compression and deduplication
//! - Tree snapshots (path -> blob mapping) and offset handling
//! - On-disk object store layout and atomic writes
//! - The error taxonomy shared by every cairn crate

pub mod error;
pub mod hash;
pub mod blob;
pub mod tree;
pub mod store;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use hash::{Digest, IncrementalHasher};
pub use blob::BlobStore;
pub use tree::{Entry, Tree, TreeDiff};
pub use store::{ObjectStore, StoreConfig};

/// Session-local revision number. Revision ids start at 1; 0 means "no revision".
pub type RevisionId = u64;

/// Repository-wide session number, allocated at session creation.
pub type SessionId = u64;
