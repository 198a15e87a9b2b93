//! Serve a local repository over TCP

use crate::util;
use anyhow::{Context, Result};
use cairn_journal::Repository;
use cairn_workdir::{Location, Server};
use owo_colors::OwoColorize;
use std::sync::Arc;

pub fn run(repo: Option<&str>, bind: &str) -> Result<()> {
    let path = match Location::parse(util::require_repo(repo)?)? {
        Location::Local(path) => path,
        Location::Remote(url) => anyhow::bail!("Can only serve a local repository, not {}", url),
    };
    let repo = Arc::new(
        Repository::open(&path).with_context(|| format!("Failed to open repository at {}", path.display()))?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(async move {
        let server = Server::bind(bind, repo).await?;
        println!(
            "{} Serving {} on {}",
            "✓".green(),
            path.display(),
            server.local_addr()?.to_string().cyan()
        );
        server.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
