//! Create an empty repository

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;

pub fn run(location: Option<&str>) -> Result<()> {
    let location = util::require_repo(location)?;

    cairn_workdir::create_repository(location)
        .with_context(|| format!("Failed to create repository at {}", location))?;

    println!("{} Created repository at {}", "✓".green(), location.cyan());
    Ok(())
}
