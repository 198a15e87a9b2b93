//! Repository: sessions, revisions and the object store behind them

use crate::lock::{FileLock, LockTable};
use crate::revision::{current_timestamp_ms, Revision, RevisionStats};
use crate::session::{SessionInfo, SessionLog};
use cairn_core::hash::decode_hex;
use cairn_core::store::normalize_path;
use cairn_core::{Digest, Error, ObjectStore, Result, RevisionId, SessionId, Tree, TreeDiff};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A content-addressed repository on the local filesystem
pub struct Repository {
    store: ObjectStore,
    locks: &'static LockTable,
}

impl Repository {
    /// Create an empty repository at `root`
    pub fn create(root: &Path) -> Result<Self> {
        let store = ObjectStore::init(root)?;
        Ok(Self {
            store,
            locks: LockTable::global(),
        })
    }

    /// Open an existing repository (`NotFound` if `root` is not one)
    pub fn open(root: &Path) -> Result<Self> {
        let store = ObjectStore::open(root)?;
        Ok(Self {
            store,
            locks: LockTable::global(),
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Create a session; its revision 1 holds the empty tree
    pub fn create_session(&self, name: &str) -> Result<SessionId> {
        if name.is_empty() {
            return Err(Error::user("session name must not be empty"));
        }

        let _guard = FileLock::acquire(&self.store.locks_dir().join("repository.lock"))?;

        let sessions_dir = self.store.sessions_dir();
        if SessionLog::open(&sessions_dir, name)?.is_some() {
            return Err(Error::DuplicateSession(name.to_string()));
        }

        let id = SessionLog::count(&sessions_dir)? as SessionId + 1;
        let empty_root = self.store.write_tree(&Tree::new())?;
        let first = Revision::new(1, name, None, empty_root, RevisionStats::default());
        let info = SessionInfo {
            id,
            name: name.to_string(),
            created_unix_ms: current_timestamp_ms(),
        };

        SessionLog::create(&sessions_dir, &self.store.root().join("tmp"), info, &first)?;
        tracing::info!(session = name, id, "created session");
        Ok(id)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        SessionLog::list(&self.store.sessions_dir())
    }

    /// Head revision of `session`, or `None` if the session does not exist
    pub fn find_last_revision(&self, session: &str) -> Result<Option<RevisionId>> {
        match SessionLog::open(&self.store.sessions_dir(), session)? {
            Some(log) => Ok(Some(log.head()?)),
            None => Ok(None),
        }
    }

    /// Revision metadata without its tree
    pub fn get_revision(&self, session: &str, id: RevisionId) -> Result<Revision> {
        self.session(session)?.get(id)
    }

    /// All revisions of `session`, oldest first
    pub fn revisions(&self, session: &str) -> Result<Vec<Revision>> {
        self.session(session)?.revisions()
    }

    /// Full path mapping of a revision
    pub fn get_revision_tree(&self, session: &str, id: RevisionId) -> Result<Arc<Tree>> {
        let revision = self.get_revision(session, id)?;
        self.store.read_tree(&revision.root_tree)
    }

    /// Append a revision holding `tree` on top of `parent`
    ///
    /// Fails with `StaleParent` if `parent` is no longer the session head and
    /// with `NotFound` if the tree references a blob that was never stored.
    /// Either the revision is fully recorded and HEAD advanced, or nothing
    /// visible changes.
    pub fn commit_revision(&self, session: &str, parent: RevisionId, tree: &Tree) -> Result<RevisionId> {
        let log = self.session(session)?;

        let _guard = self.locks.lock(
            &format!("{}:{}", self.store.root().display(), session),
            &self.session_lock_path(session),
        )?;

        let head = log.head()?;
        if parent != head {
            return Err(Error::StaleParent {
                session: session.to_string(),
                parent,
                head,
            });
        }

        for (path, entry) in tree.iter() {
            if path.is_empty() || normalize_path(path)? != path {
                return Err(Error::user(format!("path is not normalized: {:?}", path)));
            }
            if !self.store.blob_store().exists(&entry.digest) {
                return Err(Error::not_found(format!("blob {} for {}", entry.digest, path)));
            }
        }

        let parent_tree = self.store.read_tree(&log.get(head)?.root_tree)?;
        let diff = TreeDiff::diff(&parent_tree, tree);
        let stats = RevisionStats::from_diff(&diff, tree.len(), tree.total_size());

        let root_tree = self.store.write_tree(tree)?;
        let revision = Revision::new(head + 1, session, Some(head), root_tree, stats);
        log.append(&self.store.tmp_dir(), &revision)?;

        tracing::info!(
            session,
            revision = revision.id,
            files_changed = revision.stats.files_changed,
            "committed revision"
        );
        Ok(revision.id)
    }

    pub fn put_blob(&self, data: &[u8]) -> Result<Digest> {
        self.store.blob_store().put(data)
    }

    pub fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.store.blob_store().get(digest)
    }

    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.store.blob_store().exists(digest)
    }

    /// Scan every session, revision, tree and referenced blob
    ///
    /// Problems are collected into the report; nothing is repaired.
    pub fn verify(&self) -> Result<IntegrityReport> {
        let start = Instant::now();
        let mut report = IntegrityReport::default();
        let mut trees_seen: HashSet<Digest> = HashSet::new();
        let mut blobs_seen: HashSet<Digest> = HashSet::new();

        tracing::info!(repo = %self.root().display(), "starting integrity check");

        for entry in std::fs::read_dir(self.store.sessions_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let name = match decode_hex(&dir_name).ok().and_then(|b| String::from_utf8(b).ok()) {
                Some(name) => name,
                None => {
                    report.problem(format!("unrecognized session directory {}", dir_name));
                    continue;
                }
            };

            let log = match SessionLog::open(&self.store.sessions_dir(), &name) {
                Ok(Some(log)) => log,
                Ok(None) => continue,
                Err(e) => {
                    report.problem(format!("session '{}': {}", name, e));
                    continue;
                }
            };
            report.sessions += 1;

            let head = match log.head() {
                Ok(head) => head,
                Err(e) => {
                    report.problem(format!("session '{}': {}", name, e));
                    continue;
                }
            };

            for id in 1..=head {
                let revision = match log.get(id) {
                    Ok(revision) => revision,
                    Err(e) => {
                        report.problem(format!("session '{}' revision {}: {}", name, id, e));
                        continue;
                    }
                };
                report.revisions += 1;

                let expected_parent = if id == 1 { None } else { Some(id - 1) };
                if revision.parent != expected_parent {
                    report.problem(format!(
                        "session '{}' revision {}: parent {:?}, expected {:?}",
                        name, id, revision.parent, expected_parent
                    ));
                }

                if !trees_seen.insert(revision.root_tree) {
                    continue;
                }
                let tree = match self.store.read_tree(&revision.root_tree) {
                    Ok(tree) => tree,
                    Err(e) => {
                        report.problem(format!("session '{}' revision {}: {}", name, id, e));
                        continue;
                    }
                };
                report.trees_checked += 1;

                for (path, file) in tree.iter() {
                    if !blobs_seen.insert(file.digest) {
                        continue;
                    }
                    report.blobs_checked += 1;
                    if let Err(e) = self.store.blob_store().get(&file.digest) {
                        report.problem(format!("{} (referenced as {}): {}", file.digest, path, e));
                    }
                }
            }
        }

        report.scan_duration = start.elapsed();
        if report.is_healthy() {
            tracing::info!(
                sessions = report.sessions,
                revisions = report.revisions,
                "integrity check passed"
            );
        }
        Ok(report)
    }

    fn session(&self, name: &str) -> Result<SessionLog> {
        SessionLog::open(&self.store.sessions_dir(), name)?
            .ok_or_else(|| Error::not_found(format!("session '{}'", name)))
    }

    fn session_lock_path(&self, name: &str) -> PathBuf {
        self.store
            .locks_dir()
            .join(format!("session-{}.lock", SessionLog::dir_name(name)))
    }
}

/// Result of [`Repository::verify`]
#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub sessions: usize,
    pub revisions: usize,
    pub trees_checked: usize,
    pub blobs_checked: usize,
    /// One line per problem found
    pub problems: Vec<String>,
    pub scan_duration: Duration,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, msg: String) {
        tracing::warn!("{}", msg);
        self.problems.push(msg);
    }
}
