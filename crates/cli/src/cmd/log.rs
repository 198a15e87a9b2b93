//! Show revision history

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run(repo: Option<&str>, session: &str, limit: Option<usize>) -> Result<()> {
    let front = cairn_workdir::open_front(util::require_repo(repo)?)?;
    let head = front
        .find_last_revision(session)?
        .ok_or_else(|| anyhow::anyhow!("No such session: {}", session))?;
    let limit = limit.unwrap_or(20);

    println!("{} {}", "Session".bold(), session.cyan());
    println!();

    for id in (1..=head).rev().take(limit) {
        let rev = front.get_revision(session, id)?;
        let stats = &rev.stats;
        println!(
            "{}  {}  {} files, {}",
            format!("r{}", rev.id).yellow(),
            util::format_timestamp(rev.ts_unix_ms).dimmed(),
            stats.file_count,
            util::format_size(stats.total_size),
        );
        if stats.files_changed > 0 {
            println!(
                "      {} changed, {} {}",
                stats.files_changed,
                format!("+{}", util::format_size(stats.bytes_added)).green(),
                format!("-{}", util::format_size(stats.bytes_removed)).red(),
            );
        }
    }

    if head as usize > limit {
        println!();
        println!("{}", format!("... {} older revisions", head as usize - limit).dimmed());
    }
    Ok(())
}
