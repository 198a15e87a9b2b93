//! Per-path change classification

use crate::ignore::IgnoreRules;
use crate::scan::LiveTree;
use ahash::AHashMap;
use cairn_core::Tree;
use std::collections::BTreeSet;

/// State of one path relative to the workdir baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    Unchanged,
    New,
    Modified,
    Missing,
    Ignored,
}

/// Classify every path in the baseline or on disk
///
/// The classes are disjoint: an ignored path is `Ignored` whatever its
/// baseline or disk state.
pub fn classify(baseline: &Tree, live: &LiveTree, rules: &IgnoreRules) -> AHashMap<String, Change> {
    let mut states = AHashMap::with_capacity(baseline.len().max(live.tree.len()));

    for (path, entry) in live.tree.iter() {
        let change = if rules.is_ignored(path) {
            Change::Ignored
        } else {
            match baseline.get(path) {
                Some(base) if base.same_content(entry) => Change::Unchanged,
                Some(_) => Change::Modified,
                None => Change::New,
            }
        };
        states.insert(path.to_string(), change);
    }

    for path in &live.ignored {
        states.insert(path.clone(), Change::Ignored);
    }

    for path in baseline.paths() {
        if !states.contains_key(path) {
            let change = if rules.is_ignored(path) {
                Change::Ignored
            } else {
                Change::Missing
            };
            states.insert(path.to_string(), change);
        }
    }

    states
}

/// The five disjoint change sets of a workdir
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub unchanged: BTreeSet<String>,
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub ignored: BTreeSet<String>,
}

impl Changes {
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = (String, Change)>,
    {
        let mut changes = Changes::default();
        for (path, change) in states {
            let set = match change {
                Change::Unchanged => &mut changes.unchanged,
                Change::New => &mut changes.new,
                Change::Modified => &mut changes.modified,
                Change::Missing => &mut changes.missing,
                Change::Ignored => &mut changes.ignored,
            };
            set.insert(path);
        }
        changes
    }

    /// No new, modified or missing paths
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.missing.is_empty()
    }
}
