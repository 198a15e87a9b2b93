//! List sessions

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run(repo: Option<&str>) -> Result<()> {
    let front = cairn_workdir::open_front(util::require_repo(repo)?)?;
    let sessions = front.list_sessions()?;

    if sessions.is_empty() {
        println!("{}", "No sessions yet".dimmed());
        return Ok(());
    }

    for info in sessions {
        let head = front.find_last_revision(&info.name)?.unwrap_or(0);
        println!(
            "{:>4}  {}  {}",
            info.id,
            info.name.cyan(),
            format!("head r{}, created {}", head, util::format_timestamp(info.created_unix_ms)).dimmed()
        );
    }
    Ok(())
}
