//! Create a new session

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;

pub fn run(repo: Option<&str>, name: &str) -> Result<()> {
    let front = cairn_workdir::open_front(util::require_repo(repo)?)?;

    let id = front
        .mksession(name)
        .with_context(|| format!("Failed to create session '{}'", name))?;

    println!("{} Created session {} (id {})", "✓".green(), name.cyan(), id);
    Ok(())
}
