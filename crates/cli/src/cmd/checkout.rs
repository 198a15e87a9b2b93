//! Check out a session into a new workdir

use crate::system_config::SystemConfig;
use crate::util;
use anyhow::{Context, Result};
use cairn_workdir::Workdir;
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub fn run(
    repo: Option<&str>,
    session: &str,
    dir: Option<PathBuf>,
    offset: &str,
    revision: Option<u64>,
    config: &SystemConfig,
) -> Result<()> {
    let repo = util::require_repo(repo)?;
    let dir = dir.unwrap_or_else(|| default_dir(session, offset));

    let mut workdir = Workdir::new(repo, session, offset, revision, &dir)
        .with_context(|| format!("Failed to open session '{}'", session))?
        .with_ignore(config.workdir.ignore_rules());
    let id = workdir
        .checkout(revision)
        .with_context(|| format!("Failed to check out into {}", dir.display()))?;

    println!(
        "{} Checked out {} r{} into {}",
        "✓".green(),
        session.cyan(),
        id,
        dir.display()
    );
    Ok(())
}

/// Last component of the offset, or of the session name
fn default_dir(session: &str, offset: &str) -> PathBuf {
    let source = if offset.trim_matches('/').is_empty() { session } else { offset };
    let name = source
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(session);
    PathBuf::from(name)
}
