//! Show workdir changes

use crate::system_config::SystemConfig;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(dir: &Path, verbose: bool, config: &SystemConfig) -> Result<()> {
    let mut workdir = util::open_workdir(dir, None, None, "", config.workdir.ignore_rules())?;
    let changes = workdir.get_changes()?;

    let revision = workdir.revision().map(|r| format!("r{}", r)).unwrap_or_else(|| "-".into());
    println!("{} {} at {}", "Session".bold(), workdir.session().cyan(), revision.yellow());
    if !workdir.offset().is_empty() {
        println!("Offset:  {}", workdir.offset());
    }
    println!();

    for path in &changes.new {
        println!("{} {}", "A".green(), path);
    }
    for path in &changes.modified {
        println!("{} {}", "M".yellow(), path);
    }
    for path in &changes.missing {
        println!("{} {}", "!".red(), path);
    }
    if verbose {
        for path in &changes.unchanged {
            println!("{} {}", "=".dimmed(), path.dimmed());
        }
        for path in &changes.ignored {
            println!("{} {}", "i".dimmed(), path.dimmed());
        }
    }

    if changes.is_clean() {
        println!("{}", "Workdir is clean".green());
    } else {
        println!();
        println!(
            "{} new, {} modified, {} missing",
            changes.new.len(),
            changes.modified.len(),
            changes.missing.len()
        );
    }
    Ok(())
}
