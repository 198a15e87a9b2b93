//! Bring a workdir up to date

use crate::system_config::SystemConfig;
use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(dir: &Path, revision: Option<u64>, config: &SystemConfig) -> Result<()> {
    let mut workdir = util::open_workdir(dir, None, None, "", config.workdir.ignore_rules())?;

    let mut stdout = std::io::stdout();
    let report = workdir
        .update_to(revision, &mut stdout)
        .with_context(|| format!("Failed to update {}", dir.display()))?;

    let target = workdir.revision().unwrap_or(0);
    if report.is_empty() {
        println!("{} Already at r{}", "✓".green(), target);
    } else {
        println!(
            "{} Updated to r{}: {} added, {} updated, {} deleted, {} kept",
            "✓".green(),
            target,
            report.added.len(),
            report.updated.len(),
            report.deleted.len(),
            report.kept.len()
        );
    }
    Ok(())
}
