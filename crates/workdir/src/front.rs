//! Repository access for workdirs, local or remote

use crate::remote::RemoteFront;
use cairn_core::{Digest, Error, Result, RevisionId, SessionId, Tree};
use cairn_journal::{Repository, Revision, SessionInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// URL scheme selecting the remote front
pub const REMOTE_SCHEME: &str = "cairn://";

/// Operations a workdir needs from a repository
pub trait Front: Send + Sync {
    /// Location string this front was opened from
    fn location(&self) -> &str;

    fn is_remote(&self) -> bool;

    fn mksession(&self, name: &str) -> Result<SessionId>;

    fn list_sessions(&self) -> Result<Vec<SessionInfo>>;

    /// Head of `session`, `None` if the session does not exist
    fn find_last_revision(&self, session: &str) -> Result<Option<RevisionId>>;

    fn get_revision(&self, session: &str, id: RevisionId) -> Result<Revision>;

    fn get_revision_tree(&self, session: &str, id: RevisionId) -> Result<Arc<Tree>>;

    fn commit_revision(&self, session: &str, parent: RevisionId, tree: &Tree) -> Result<RevisionId>;

    fn put_blob(&self, data: &[u8]) -> Result<Digest>;

    fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>>;

    fn has_blob(&self, digest: &Digest) -> Result<bool>;
}

/// Parsed repository location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    /// `host:port`
    Remote(String),
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        let Some(rest) = location.strip_prefix(REMOTE_SCHEME) else {
            return Ok(Location::Local(PathBuf::from(location)));
        };

        let addr = rest.trim_end_matches('/');
        let valid = match addr.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !valid {
            return Err(Error::user(format!(
                "malformed remote location {:?}, expected {}host:port",
                location, REMOTE_SCHEME
            )));
        }
        Ok(Location::Remote(addr.to_string()))
    }
}

/// Open the front for `location`
pub fn open_front(location: &str) -> Result<Arc<dyn Front>> {
    match Location::parse(location)? {
        Location::Local(path) => Ok(Arc::new(LocalFront::open(&path)?)),
        Location::Remote(addr) => Ok(Arc::new(RemoteFront::connect(location, &addr)?)),
    }
}

/// Front over a repository on the local filesystem
pub struct LocalFront {
    location: String,
    repo: Arc<Repository>,
}

impl LocalFront {
    /// Open the repository at `path`, recorded by its absolute location
    pub fn open(path: &Path) -> Result<Self> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self::new(Arc::new(Repository::open(&path)?)))
    }

    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            location: repo.root().display().to_string(),
            repo,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }
}

impl Front for LocalFront {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn mksession(&self, name: &str) -> Result<SessionId> {
        self.repo.create_session(name)
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.repo.list_sessions()
    }

    fn find_last_revision(&self, session: &str) -> Result<Option<RevisionId>> {
        self.repo.find_last_revision(session)
    }

    fn get_revision(&self, session: &str, id: RevisionId) -> Result<Revision> {
        self.repo.get_revision(session, id)
    }

    fn get_revision_tree(&self, session: &str, id: RevisionId) -> Result<Arc<Tree>> {
        self.repo.get_revision_tree(session, id)
    }

    fn commit_revision(&self, session: &str, parent: RevisionId, tree: &Tree) -> Result<RevisionId> {
        self.repo.commit_revision(session, parent, tree)
    }

    fn put_blob(&self, data: &[u8]) -> Result<Digest> {
        self.repo.put_blob(data)
    }

    fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.repo.get_blob(digest)
    }

    fn has_blob(&self, digest: &Digest) -> Result<bool> {
        Ok(self.repo.has_blob(digest))
    }
}
