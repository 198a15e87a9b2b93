//! A filesystem directory bound to one session of a repository

use crate::changes::{classify, Changes};
use crate::front::{open_front, Front};
use crate::ignore::IgnoreRules;
use crate::meta::{Baseline, MetaDir, WorkdirInfo};
use crate::scan::{scan, LiveTree};
use cairn_core::hash::hash_bytes;
use cairn_core::store::normalize_path;
use cairn_core::tree::join_offset;
use cairn_core::{Entry, Error, Result, RevisionId, Tree};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Knobs for [`Workdir::checkin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinOptions {
    /// Commit new files only; modifications and deletions stay local
    pub add_only: bool,
    /// Compute the change set but store nothing
    pub dry_run: bool,
    /// Refuse (`UserError`) if any baseline file was modified or removed
    pub fail_on_modifications: bool,
    /// Persist the new baseline under `.meta/`
    pub write_meta: bool,
}

impl Default for CheckinOptions {
    fn default() -> Self {
        Self {
            add_only: false,
            dry_run: false,
            fail_on_modifications: false,
            write_meta: true,
        }
    }
}

/// What [`Workdir::update`] did, by workdir-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Paths changed upstream but left alone because of local edits
    pub kept: Vec<String>,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty() && self.kept.is_empty()
    }
}

enum Action {
    Write { path: String, entry: Entry, added: bool },
    Delete(String),
    Keep(String),
}

/// Binds `root` to (repository, session, offset, baseline revision)
pub struct Workdir {
    root: PathBuf,
    session: String,
    offset: String,
    front: Arc<dyn Front>,
    ignore: IgnoreRules,
    meta: MetaDir,
    /// Baseline revision requested by the caller or loaded from metadata
    revision: Option<RevisionId>,
    baseline: Option<Baseline>,
}

impl Workdir {
    /// Create a workdir handle without reading any metadata
    ///
    /// The baseline is `revision` if given, otherwise the session head at
    /// first use.
    pub fn new(
        location: &str,
        session: &str,
        offset: &str,
        revision: Option<RevisionId>,
        root: &Path,
    ) -> Result<Self> {
        Self::with_front(open_front(location)?, session, offset, revision, root)
    }

    pub fn with_front(
        front: Arc<dyn Front>,
        session: &str,
        offset: &str,
        revision: Option<RevisionId>,
        root: &Path,
    ) -> Result<Self> {
        if session.is_empty() {
            return Err(Error::user("session name must not be empty"));
        }
        Ok(Self {
            root: root.to_path_buf(),
            session: session.to_string(),
            offset: normalize_path(offset)?,
            front,
            ignore: IgnoreRules::new(),
            meta: MetaDir::new(root),
            revision,
            baseline: None,
        })
    }

    /// Reopen a workdir from its `.meta/` directory
    pub fn open(root: &Path) -> Result<Self> {
        let meta = MetaDir::new(root);
        let (info, baseline) = meta.load()?;
        let front = open_front(&info.repo_location)?;

        Ok(Self {
            root: root.to_path_buf(),
            session: info.session,
            offset: info.offset,
            front,
            ignore: IgnoreRules::new(),
            meta,
            revision: Some(baseline.revision),
            baseline: Some(baseline),
        })
    }

    pub fn with_ignore(mut self, rules: IgnoreRules) -> Self {
        self.ignore = rules;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn offset(&self) -> &str {
        &self.offset
    }

    pub fn front(&self) -> &Arc<dyn Front> {
        &self.front
    }

    /// Baseline revision, if one has been fixed yet
    pub fn revision(&self) -> Option<RevisionId> {
        self.baseline.as_ref().map(|b| b.revision).or(self.revision)
    }

    /// Classify every path against the baseline
    pub fn get_changes(&mut self) -> Result<Changes> {
        let live = scan(&self.root, &self.ignore)?;
        let baseline = load_baseline(
            &mut self.baseline,
            self.front.as_ref(),
            &self.session,
            &self.offset,
            self.revision,
        )?;
        Ok(Changes::from_states(classify(&baseline.tree, &live, &self.ignore)))
    }

    /// Commit local changes on top of the session head
    ///
    /// Returns the new revision id, or 0 when nothing was committed.
    pub fn checkin(&mut self, options: &CheckinOptions) -> Result<RevisionId> {
        let head = self.head()?;
        let live = scan(&self.root, &self.ignore)?;
        let changes = {
            let baseline = load_baseline(
                &mut self.baseline,
                self.front.as_ref(),
                &self.session,
                &self.offset,
                self.revision,
            )?;
            Changes::from_states(classify(&baseline.tree, &live, &self.ignore))
        };

        if options.fail_on_modifications && !(changes.modified.is_empty() && changes.missing.is_empty()) {
            return Err(Error::user(format!(
                "checkin would overwrite {} modified and remove {} missing file(s) in session '{}'",
                changes.modified.len(),
                changes.missing.len(),
                self.session
            )));
        }

        let mut delta = entries_for(&changes.new, &live);
        if !options.add_only {
            delta.extend(entries_for(&changes.modified, &live));
            delta.extend(changes.missing.iter().map(|path| (path.clone(), None)));
        }

        if delta.is_empty() {
            tracing::info!(session = %self.session, "nothing to commit");
            return Ok(0);
        }
        if options.dry_run {
            tracing::info!(session = %self.session, changes = delta.len(), "dry run, nothing committed");
            return Ok(0);
        }

        for (path, entry) in delta.iter_mut() {
            if let Some(entry) = entry {
                self.upload(path, entry)?;
            }
        }

        let mut tree = (*self.front.get_revision_tree(&self.session, head)?).clone();
        tree.apply(
            delta
                .iter()
                .map(|(path, entry)| (join_offset(&self.offset, path), entry.clone())),
        );
        let id = self.front.commit_revision(&self.session, head, &tree)?;

        let mut baseline = self.baseline.take().unwrap_or_default();
        baseline.tree.apply(delta);
        baseline.revision = id;
        self.baseline = Some(baseline);
        self.revision = Some(id);

        if options.write_meta {
            self.save_meta()?;
        }

        tracing::info!(session = %self.session, revision = id, "checked in");
        Ok(id)
    }

    /// Materialize a revision (default: the requested one, else head) into the workdir root
    pub fn checkout(&mut self, revision: Option<RevisionId>) -> Result<RevisionId> {
        if self.meta.exists() {
            return Err(Error::user(format!(
                "{} is already a workdir",
                self.root.display()
            )));
        }

        let revision = match revision.or(self.revision) {
            Some(id) => id,
            None => self.head()?,
        };
        let tree = self
            .front
            .get_revision_tree(&self.session, revision)?
            .subtree(&self.offset);

        for path in tree.paths() {
            let target = self.root.join(path);
            if fs::symlink_metadata(&target).is_ok() {
                return Err(Error::user(format!(
                    "refusing to overwrite existing file {}",
                    target.display()
                )));
            }
        }

        fs::create_dir_all(&self.root)?;
        let mut written = Vec::new();
        if let Err(e) = self.write_tree_files(&tree, &mut written) {
            for path in written.iter().rev() {
                let _ = fs::remove_file(path);
                prune_empty_dirs(&self.root, path);
            }
            return Err(e);
        }

        self.baseline = Some(Baseline::new(revision, tree));
        self.revision = Some(revision);
        self.save_meta()?;

        tracing::info!(
            session = %self.session,
            revision,
            files = written.len(),
            root = %self.root.display(),
            "checked out"
        );
        Ok(revision)
    }

    /// Bring the workdir up to the session head, keeping local edits
    pub fn update(&mut self, log: &mut dyn Write) -> Result<UpdateReport> {
        self.update_to(None, log)
    }

    /// Bring the workdir to `revision` (default: head), keeping local edits
    ///
    /// Locally unchanged files follow the target; new, modified and missing
    /// files are never touched.
    pub fn update_to(&mut self, revision: Option<RevisionId>, log: &mut dyn Write) -> Result<UpdateReport> {
        let target_id = match revision {
            Some(id) => id,
            None => self.head()?,
        };
        let target = self
            .front
            .get_revision_tree(&self.session, target_id)?
            .subtree(&self.offset);
        let live = scan(&self.root, &self.ignore)?;

        let plan = {
            let baseline = load_baseline(
                &mut self.baseline,
                self.front.as_ref(),
                &self.session,
                &self.offset,
                self.revision,
            )?;
            plan_update(&baseline.tree, &target, &live, &self.ignore)
        };

        let mut report = UpdateReport::default();
        for action in plan {
            match action {
                Action::Write { path, entry, added } => {
                    let data = self.fetch(&entry)?;
                    write_file(&self.root.join(&path), &data, entry.mode)?;
                    if added {
                        writeln!(log, "Adding: {}", path)?;
                        report.added.push(path);
                    } else {
                        writeln!(log, "Updating: {}", path)?;
                        report.updated.push(path);
                    }
                }
                Action::Delete(path) => {
                    let full = self.root.join(&path);
                    match fs::remove_file(&full) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    prune_empty_dirs(&self.root, &full);
                    writeln!(log, "Deleting: {}", path)?;
                    report.deleted.push(path);
                }
                Action::Keep(path) => {
                    writeln!(log, "Keeping local changes: {}", path)?;
                    report.kept.push(path);
                }
            }
        }

        self.baseline = Some(Baseline::new(target_id, target));
        self.revision = Some(target_id);
        self.save_meta()?;

        tracing::info!(
            session = %self.session,
            revision = target_id,
            added = report.added.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            kept = report.kept.len(),
            "updated"
        );
        Ok(report)
    }

    fn head(&self) -> Result<RevisionId> {
        self.front
            .find_last_revision(&self.session)?
            .ok_or_else(|| Error::not_found(format!("session '{}'", self.session)))
    }

    /// Store a file's bytes unless the repository already has them
    fn upload(&self, rel: &str, entry: &mut Entry) -> Result<()> {
        if self.front.has_blob(&entry.digest)? {
            tracing::debug!(path = rel, "blob already stored");
            return Ok(());
        }

        let data = fs::read(self.root.join(rel))?;
        let digest = self.front.put_blob(&data)?;
        if digest != entry.digest {
            tracing::warn!(path = rel, "file changed while checking in, recording current content");
            entry.digest = digest;
            entry.size = data.len() as u64;
        }
        tracing::debug!(path = rel, size = data.len(), "stored blob");
        Ok(())
    }

    /// Fetch a blob and check it against the entry's digest
    fn fetch(&self, entry: &Entry) -> Result<Vec<u8>> {
        let data = self.front.get_blob(&entry.digest)?;
        let actual = hash_bytes(&data);
        if actual != entry.digest {
            return Err(Error::CorruptBlob {
                digest: entry.digest,
                actual: actual.to_hex(),
            });
        }
        Ok(data)
    }

    fn write_tree_files(&self, tree: &Tree, written: &mut Vec<PathBuf>) -> Result<()> {
        for (rel, entry) in tree.iter() {
            let data = self.fetch(entry)?;
            let path = self.root.join(rel);
            written.push(path.clone());
            write_file(&path, &data, entry.mode)?;
            tracing::debug!(path = rel, size = data.len(), "wrote file");
        }
        Ok(())
    }

    fn save_meta(&self) -> Result<()> {
        let Some(baseline) = &self.baseline else {
            return Ok(());
        };
        let info = WorkdirInfo {
            repo_location: self.front.location().to_string(),
            session: self.session.clone(),
            offset: self.offset.clone(),
            revision: baseline.revision,
        };
        self.meta.save(&info, baseline)
    }
}

/// Resolve the baseline on first use
fn load_baseline<'a>(
    slot: &'a mut Option<Baseline>,
    front: &dyn Front,
    session: &str,
    offset: &str,
    revision: Option<RevisionId>,
) -> Result<&'a Baseline> {
    let baseline = match slot.take() {
        Some(baseline) => baseline,
        None => {
            let revision = match revision {
                Some(id) => id,
                None => front
                    .find_last_revision(session)?
                    .ok_or_else(|| Error::not_found(format!("session '{}'", session)))?,
            };
            let tree = front.get_revision_tree(session, revision)?.subtree(offset);
            Baseline::new(revision, tree)
        }
    };
    Ok(slot.insert(baseline))
}

fn entries_for(paths: &BTreeSet<String>, live: &LiveTree) -> Vec<(String, Option<Entry>)> {
    paths
        .iter()
        .filter_map(|path| live.tree.get(path).map(|entry| (path.clone(), Some(entry.clone()))))
        .collect()
}

/// Three-way comparison of baseline, target and disk
fn plan_update(baseline: &Tree, target: &Tree, live: &LiveTree, rules: &IgnoreRules) -> Vec<Action> {
    let paths: BTreeSet<&str> = baseline.paths().chain(target.paths()).collect();
    let mut plan = Vec::new();

    for path in paths {
        if rules.is_ignored(path) {
            continue;
        }
        let base = baseline.get(path);
        let want = target.get(path);
        let local = live.tree.get(path);

        if same(base, want) || same(local, want) {
            continue;
        }
        if !same(base, local) {
            plan.push(Action::Keep(path.to_string()));
            continue;
        }

        match want {
            Some(entry) => plan.push(Action::Write {
                path: path.to_string(),
                entry: entry.clone(),
                added: local.is_none(),
            }),
            None => plan.push(Action::Delete(path.to_string())),
        }
    }

    plan
}

fn same(a: Option<&Entry>, b: Option<&Entry>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_content(b),
        (None, None) => true,
        _ => false,
    }
}

fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Read-only files cannot be rewritten in place
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    fs::write(path, data)?;

    #[cfg(unix)]
    if mode != 0 {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Remove now-empty directories between `path` and `root`
fn prune_empty_dirs(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
