//! Check repository integrity

use crate::util;
use anyhow::{Context, Result};
use cairn_journal::Repository;
use cairn_workdir::Location;
use owo_colors::OwoColorize;

pub fn run(repo: Option<&str>) -> Result<()> {
    let path = match Location::parse(util::require_repo(repo)?)? {
        Location::Local(path) => path,
        Location::Remote(url) => anyhow::bail!("Can only verify a local repository, not {}", url),
    };
    let repo = Repository::open(&path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;

    println!("{}", "Verifying repository".bold());
    let report = repo.verify().context("Verification failed to run")?;

    println!("  Sessions:  {}", report.sessions);
    println!("  Revisions: {}", report.revisions);
    println!("  Trees:     {}", report.trees_checked);
    println!("  Blobs:     {}", report.blobs_checked);
    println!("  Time:      {:.2?}", report.scan_duration);
    println!();

    if report.is_healthy() {
        println!("{}", "Repository is healthy ✓".green().bold());
        return Ok(());
    }

    for problem in &report.problems {
        println!("  {} {}", "✗".red(), problem);
    }
    anyhow::bail!("Repository has {} problem(s)", report.problems.len())
}
