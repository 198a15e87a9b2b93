//! Commit workdir changes

use crate::system_config::SystemConfig;
use crate::util;
use anyhow::{Context, Result};
use cairn_workdir::CheckinOptions;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(
    repo: Option<&str>,
    dir: &Path,
    session: Option<&str>,
    offset: &str,
    options: &CheckinOptions,
    config: &SystemConfig,
) -> Result<()> {
    let mut workdir = util::open_workdir(dir, repo, session, offset, config.workdir.ignore_rules())?;

    if options.dry_run {
        let changes = workdir.get_changes()?;
        for path in &changes.new {
            println!("{} {}", "A".green(), path);
        }
        if !options.add_only {
            for path in &changes.modified {
                println!("{} {}", "M".yellow(), path);
            }
            for path in &changes.missing {
                println!("{} {}", "D".red(), path);
            }
        }
    }

    let id = workdir
        .checkin(options)
        .with_context(|| format!("Failed to check in {}", dir.display()))?;

    if options.dry_run {
        println!("{}", "Dry run, nothing stored".dimmed());
    } else if id == 0 {
        println!("{}", "Nothing to commit".dimmed());
    } else {
        println!("{} Checked in {} r{}", "✓".green(), workdir.session().cyan(), id);
    }
    Ok(())
}
