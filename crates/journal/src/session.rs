//! Per-session revision log
//!
//! Each session lives in `sessions/<hex(name)>/`:
//!
//! ```text
//! session.json            SessionInfo (JSON)
//! HEAD                    id of the latest revision (text)
//! revisions/
//!   0000000001.rev        Revision record (bincode)
//!   0000000002.rev
//! ```
//!
//! Revision files are written before `HEAD` is advanced, so a crash
//! between the two leaves an unreferenced record that the next commit
//! simply overwrites.

use crate::revision::Revision;
use cairn_core::hash::encode_hex;
use cairn_core::store::atomic_write;
use cairn_core::{Error, Result, RevisionId, SessionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "session.json";
const HEAD_FILE: &str = "HEAD";
const REVISIONS_DIR: &str = "revisions";

/// Descriptive record of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Repository-wide numeric id, starting at 1
    pub id: SessionId,
    pub name: String,
    pub created_unix_ms: u64,
}

/// Handle on one session's on-disk log
#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
    info: SessionInfo,
}

impl SessionLog {
    /// Directory name for a session: hex of the UTF-8 name, so any name is filesystem safe
    pub fn dir_name(name: &str) -> String {
        encode_hex(name.as_bytes())
    }

    /// Build a complete session directory under `scratch` and move it into place
    ///
    /// The caller holds the repository lock, so the existence check and the
    /// rename cannot race with another creator.
    pub fn create(
        sessions_dir: &Path,
        scratch: &Path,
        info: SessionInfo,
        first: &Revision,
    ) -> Result<Self> {
        let target = sessions_dir.join(Self::dir_name(&info.name));
        if target.exists() {
            return Err(Error::DuplicateSession(info.name));
        }

        let staging = scratch.join(format!("session-{}", uuid::Uuid::new_v4()));
        let build = || -> Result<()> {
            fs::create_dir_all(staging.join(REVISIONS_DIR))?;
            let json = serde_json::to_vec_pretty(&info)
                .map_err(|e| Error::corrupt(format!("failed to encode session record: {}", e)))?;
            fs::write(staging.join(INFO_FILE), json)?;
            fs::write(
                staging.join(REVISIONS_DIR).join(revision_file_name(first.id)),
                first.serialize()?,
            )?;
            fs::write(staging.join(HEAD_FILE), format!("{}\n", first.id))?;
            fs::rename(&staging, &target)?;
            Ok(())
        };

        if let Err(e) = build() {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        Ok(Self { dir: target, info })
    }

    /// Open a session by name; `None` if it does not exist
    pub fn open(sessions_dir: &Path, name: &str) -> Result<Option<Self>> {
        let dir = sessions_dir.join(Self::dir_name(name));
        if !dir.is_dir() {
            return Ok(None);
        }
        let info = read_info(&dir)?;
        if info.name != name {
            return Err(Error::corrupt(format!(
                "session directory {} records name '{}'",
                dir.display(),
                info.name
            )));
        }
        Ok(Some(Self { dir, info }))
    }

    /// Every session in the repository, ordered by id
    pub fn list(sessions_dir: &Path) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(sessions_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                sessions.push(read_info(&entry.path())?);
            }
        }
        sessions.sort_by_key(|s| s.id);
        Ok(sessions)
    }

    /// Number of session directories, used to allocate the next session id
    pub fn count(sessions_dir: &Path) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(sessions_dir)? {
            if entry?.file_type()?.is_dir() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Id of the latest committed revision
    pub fn head(&self) -> Result<RevisionId> {
        let text = fs::read_to_string(self.dir.join(HEAD_FILE))?;
        text.trim().parse().map_err(|_| {
            Error::corrupt(format!(
                "malformed HEAD for session '{}': {:?}",
                self.info.name,
                text.trim()
            ))
        })
    }

    /// Load one revision record
    pub fn get(&self, id: RevisionId) -> Result<Revision> {
        if id == 0 || id > self.head()? {
            return Err(Error::not_found(format!(
                "revision {} in session '{}'",
                id, self.info.name
            )));
        }

        let path = self.revision_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::corrupt(format!(
                    "revision {} of session '{}' is below HEAD but has no record",
                    id, self.info.name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let revision = Revision::deserialize(&bytes)?;
        if revision.id != id || revision.session != self.info.name {
            return Err(Error::corrupt(format!(
                "record {} holds revision {} of session '{}'",
                path.display(),
                revision.id,
                revision.session
            )));
        }
        Ok(revision)
    }

    /// Write `revision` durably, then advance HEAD to it
    ///
    /// Must be called with the session lock held.
    pub fn append(&self, tmp_dir: &Path, revision: &Revision) -> Result<()> {
        atomic_write(tmp_dir, &self.revision_path(revision.id), &revision.serialize()?)?;
        atomic_write(
            tmp_dir,
            &self.dir.join(HEAD_FILE),
            format!("{}\n", revision.id).as_bytes(),
        )?;
        Ok(())
    }

    /// All revisions from 1 up to HEAD, oldest first
    pub fn revisions(&self) -> Result<Vec<Revision>> {
        (1..=self.head()?).map(|id| self.get(id)).collect()
    }

    fn revision_path(&self, id: RevisionId) -> PathBuf {
        self.dir.join(REVISIONS_DIR).join(revision_file_name(id))
    }
}

fn revision_file_name(id: RevisionId) -> String {
    format!("{:010}.rev", id)
}

fn read_info(dir: &Path) -> Result<SessionInfo> {
    let bytes = fs::read(dir.join(INFO_FILE))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::corrupt(format!(
            "malformed session record in {}: {}",
            dir.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionStats;
    use cairn_core::hash::hash_bytes;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let sessions = temp_dir.path().join("sessions");
        let scratch = temp_dir.path().join("tmp");
        fs::create_dir_all(&sessions).unwrap();
        fs::create_dir_all(&scratch).unwrap();
        (temp_dir, sessions, scratch)
    }

    fn info(id: SessionId, name: &str) -> SessionInfo {
        SessionInfo {
            id,
            name: name.to_string(),
            created_unix_ms: 1,
        }
    }

    fn revision(id: RevisionId, session: &str) -> Revision {
        let parent = if id > 1 { Some(id - 1) } else { None };
        Revision::new(id, session, parent, hash_bytes(b"tree"), RevisionStats::default())
    }

    #[test]
    fn test_create_and_open() {
        let (_temp, sessions, scratch) = setup();
        SessionLog::create(&sessions, &scratch, info(1, "work"), &revision(1, "work")).unwrap();

        let log = SessionLog::open(&sessions, "work").unwrap().unwrap();
        assert_eq!(log.info().id, 1);
        assert_eq!(log.head().unwrap(), 1);
        assert_eq!(log.get(1).unwrap().session, "work");

        // Staging directory is gone
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_duplicate_session() {
        let (_temp, sessions, scratch) = setup();
        SessionLog::create(&sessions, &scratch, info(1, "work"), &revision(1, "work")).unwrap();
        let result = SessionLog::create(&sessions, &scratch, info(2, "work"), &revision(1, "work"));
        assert!(matches!(result, Err(Error::DuplicateSession(name)) if name == "work"));
    }

    #[test]
    fn test_open_unknown_is_none() {
        let (_temp, sessions, _scratch) = setup();
        assert!(SessionLog::open(&sessions, "missing").unwrap().is_none());
    }

    #[test]
    fn test_append_advances_head() {
        let (_temp, sessions, scratch) = setup();
        let log =
            SessionLog::create(&sessions, &scratch, info(1, "a/b c"), &revision(1, "a/b c")).unwrap();

        log.append(&scratch, &revision(2, "a/b c")).unwrap();
        log.append(&scratch, &revision(3, "a/b c")).unwrap();

        assert_eq!(log.head().unwrap(), 3);
        let ids: Vec<_> = log.revisions().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_get_beyond_head_is_not_found() {
        let (_temp, sessions, scratch) = setup();
        let log = SessionLog::create(&sessions, &scratch, info(1, "s"), &revision(1, "s")).unwrap();
        assert!(matches!(log.get(2), Err(Error::NotFound(_))));
        assert!(matches!(log.get(0), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_orders_by_id() {
        let (_temp, sessions, scratch) = setup();
        SessionLog::create(&sessions, &scratch, info(2, "zeta"), &revision(1, "zeta")).unwrap();
        SessionLog::create(&sessions, &scratch, info(1, "alpha"), &revision(1, "alpha")).unwrap();

        let names: Vec<_> = SessionLog::list(&sessions)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(SessionLog::count(&sessions).unwrap(), 2);
    }

    #[test]
    fn test_malformed_head_is_corrupt() {
        let (_temp, sessions, scratch) = setup();
        let log = SessionLog::create(&sessions, &scratch, info(1, "s"), &revision(1, "s")).unwrap();
        fs::write(sessions.join(SessionLog::dir_name("s")).join(HEAD_FILE), "garbage").unwrap();
        assert!(matches!(log.head(), Err(Error::Corrupt(_))));
    }
}
