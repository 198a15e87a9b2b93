//! Shared helpers for CLI commands

use anyhow::{Context, Result};
use cairn_workdir::{IgnoreRules, MetaDir, Workdir};
use std::path::Path;

/// The repository location, or a hint on how to supply one
pub fn require_repo(repo: Option<&str>) -> Result<&str> {
    repo.ok_or_else(|| anyhow::anyhow!("No repository given (use --repo or set CAIRN_REPO)"))
}

/// Open the workdir at `dir`
///
/// Directories with metadata reopen their own binding; others need an
/// explicit repository and session.
pub fn open_workdir(
    dir: &Path,
    repo: Option<&str>,
    session: Option<&str>,
    offset: &str,
    ignore: IgnoreRules,
) -> Result<Workdir> {
    let workdir = if MetaDir::new(dir).exists() {
        Workdir::open(dir).with_context(|| format!("Failed to open workdir at {}", dir.display()))?
    } else {
        let session = session.ok_or_else(|| {
            anyhow::anyhow!(
                "{} is not a workdir (use --session to bind it to a session)",
                dir.display()
            )
        })?;
        Workdir::new(require_repo(repo)?, session, offset, None, dir)
            .with_context(|| format!("Failed to open session '{}'", session))?
    };
    Ok(workdir.with_ignore(ignore))
}

/// Format timestamp in absolute local time (YYYY-MM-DD HH:MM:SS)
pub fn format_timestamp(ts_ms: u64) -> String {
    use chrono::{DateTime, Local, TimeZone, Utc};

    let secs = (ts_ms / 1000) as i64;
    let nsecs = ((ts_ms % 1000) * 1_000_000) as u32;

    match Utc.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(utc_dt) => {
            let local_dt: DateTime<Local> = utc_dt.with_timezone(&Local);
            local_dt.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        _ => "Unknown time".to_string(),
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_timestamp_shape() {
        let formatted = format_timestamp(1_700_000_000_000);
        assert_eq!(formatted.len(), "2023-11-14 22:13:20".len());
        assert!(formatted.starts_with("2023-11-1"));
    }

    #[test]
    fn test_require_repo() {
        assert_eq!(require_repo(Some("/srv/r")).unwrap(), "/srv/r");
        assert!(require_repo(None).is_err());
    }

    #[test]
    fn test_open_workdir_needs_session() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let result = open_workdir(temp_dir.path(), Some("/nowhere"), None, "", IgnoreRules::new());
        assert!(result.is_err());
        Ok(())
    }
}
