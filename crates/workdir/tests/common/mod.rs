//! Shared fixtures for workdir integration tests

#![allow(dead_code)]

use cairn_core::RevisionId;
use cairn_journal::Repository;
use cairn_workdir::{open_front, Server, Workdir};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const SESSION: &str = "TestSession";

/// A repository with one session, reachable locally or through a server
pub struct Fixture {
    pub temp: TempDir,
    pub repo_path: PathBuf,
    pub location: String,
    next_dir: Cell<usize>,
}

impl Fixture {
    pub fn local() -> Self {
        Self::build(false)
    }

    pub fn remote() -> Self {
        Self::build(true)
    }

    fn build(remote: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let repo_path = temp.path().join("repo");
        Repository::create(&repo_path).unwrap();

        let location = if remote {
            start_server(&repo_path)
        } else {
            fs::canonicalize(&repo_path).unwrap().display().to_string()
        };

        let front = open_front(&location).unwrap();
        assert_eq!(front.is_remote(), remote);
        assert_eq!(front.mksession(SESSION).unwrap(), 1);

        Self {
            temp,
            repo_path,
            location,
            next_dir: Cell::new(0),
        }
    }

    /// A fresh, not yet existing directory path
    pub fn fresh_root(&self) -> PathBuf {
        let n = self.next_dir.get();
        self.next_dir.set(n + 1);
        self.temp.path().join(format!("wd{}", n))
    }

    /// New workdir whose root holds `files`
    pub fn workdir(&self, files: &[(&str, &str)], offset: &str, revision: Option<RevisionId>) -> Workdir {
        let root = self.fresh_root();
        write_tree(&root, files);
        let wd = Workdir::new(&self.location, SESSION, offset, revision, &root).unwrap();
        assert!(wd.front().find_last_revision(SESSION).unwrap().is_some());
        wd
    }

    /// Direct handle on the repository for inspection
    pub fn repo(&self) -> Repository {
        Repository::open(&self.repo_path).unwrap()
    }
}

fn start_server(repo_path: &Path) -> String {
    let repo = Arc::new(Repository::open(repo_path).unwrap());
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let server = Server::bind("127.0.0.1:0", repo).await.unwrap();
            tx.send(server.local_addr().unwrap()).unwrap();
            server.run().await
        })
    });

    let addr = rx.recv().unwrap();
    format!("cairn://{}/", addr)
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(root).unwrap();
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

/// Every file under `root` except the metadata directory
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<String, String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if rel == ".meta" {
            continue;
        }
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            files.insert(rel, fs::read_to_string(&path).unwrap());
        }
    }
}

/// Every file path under `root`, metadata included
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files = BTreeMap::new();
    collect_all(root, root, &mut files);
    files.into_keys().collect()
}

fn collect_all(root: &Path, dir: &Path, files: &mut BTreeMap<String, ()>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_all(root, &path, files);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            files.insert(rel, ());
        }
    }
}

pub fn map(files: &[(&str, &str)]) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}
