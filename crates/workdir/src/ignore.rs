//! Ignore rules for workdir scans

use serde::{Deserialize, Serialize};

/// Reserved directory holding workdir metadata; never scanned
pub const META_DIR: &str = ".meta";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// `a/b`: that path, or everything below it
    Path(String),
    /// `name`: any file or directory component with that name
    Name(String),
    /// `*.ext`: file names ending with the suffix
    Suffix(String),
}

/// Set of user-configured ignore patterns
///
/// Patterns are matched against workdir-relative, forward-slash paths:
///
/// - `build/out.log` or `build/`: exact path or directory prefix
/// - `target`: a file name or directory component anywhere in the path
/// - `*.tmp`: suffix glob on the file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IgnoreRules {
    raw: Vec<String>,
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern; empty patterns are ignored
    pub fn add(&mut self, pattern: &str) {
        let trimmed = pattern.trim();
        let parsed = if let Some(suffix) = trimmed.strip_prefix('*') {
            if suffix.is_empty() || suffix.contains('/') {
                None
            } else {
                Some(Pattern::Suffix(suffix.to_string()))
            }
        } else {
            let path = trimmed.trim_matches('/');
            if path.is_empty() {
                None
            } else if path.contains('/') || trimmed.ends_with('/') {
                Some(Pattern::Path(path.to_string()))
            } else {
                Some(Pattern::Name(path.to_string()))
            }
        };

        match parsed {
            Some(p) => {
                self.raw.push(trimmed.to_string());
                self.patterns.push(p);
            }
            None => tracing::warn!(pattern, "skipping unusable ignore pattern"),
        }
    }

    pub fn with(mut self, pattern: &str) -> Self {
        self.add(pattern);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `rel` (relative to the workdir root) is ignored
    pub fn is_ignored(&self, rel: &str) -> bool {
        if rel == META_DIR || rel.starts_with(".meta/") {
            return true;
        }

        let file_name = rel.rsplit('/').next().unwrap_or(rel);
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Path(p) => {
                rel == p || (rel.starts_with(p.as_str()) && rel.as_bytes().get(p.len()) == Some(&b'/'))
            }
            Pattern::Name(name) => rel.split('/').any(|component| component == name),
            Pattern::Suffix(suffix) => file_name.ends_with(suffix.as_str()),
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }
}

impl From<Vec<String>> for IgnoreRules {
    fn from(patterns: Vec<String>) -> Self {
        let mut rules = IgnoreRules::new();
        for pattern in &patterns {
            rules.add(pattern);
        }
        rules
    }
}

impl From<IgnoreRules> for Vec<String> {
    fn from(rules: IgnoreRules) -> Self {
        rules.raw
    }
}
