//! Sessions, revisions and the repository that owns them
//!
//! This crate provides:
//! - Revision records (session-local numeric ids)
//! - Per-session append-only revision logs with a HEAD pointer
//! - Session locks (in-process mutex + advisory file lock)
//! - The `Repository` facade and its integrity scan

pub mod lock;
pub mod repository;
pub mod revision;
pub mod session;

pub use lock::{FileLock, LockTable};
pub use repository::{IntegrityReport, Repository};
pub use revision::{Revision, RevisionStats};
pub use session::{SessionInfo, SessionLog};
