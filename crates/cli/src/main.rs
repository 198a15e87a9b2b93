//! cairn CLI - cairn command

use anyhow::Result;
use cairn_cli::{cmd, system_config};
use cairn_workdir::CheckinOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// cairn - content-addressed, deduplicating snapshots of directory trees
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository path, or cairn://host:port for a served repository
    #[arg(long, global = true, env = "CAIRN_REPO")]
    repo: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty repository
    Mkrepo {
        /// Where to create it (default: --repo)
        path: Option<String>,
    },
    /// Create a new session
    Mksession {
        /// Session name
        name: String,
    },
    /// List sessions and their heads
    Sessions,
    /// Show the revision history of a session
    Log {
        /// Session name
        session: String,
        /// Number of revisions to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check out a session into a new workdir
    Co {
        /// Session name
        session: String,
        /// Target directory (default: last component of offset or session)
        dir: Option<PathBuf>,
        /// Subtree of the session to check out
        #[arg(long, default_value = "")]
        offset: String,
        /// Revision to check out (default: head)
        #[arg(short, long)]
        revision: Option<u64>,
    },
    /// Commit workdir changes as a new revision
    Ci {
        /// Workdir (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Bind an unversioned directory to this session
        #[arg(long)]
        session: Option<String>,
        /// Subtree offset used with --session
        #[arg(long, default_value = "")]
        offset: String,
        /// Commit new files only
        #[arg(long)]
        add_only: bool,
        /// Show what would be committed without storing anything
        #[arg(long)]
        dry_run: bool,
        /// Refuse to commit if tracked files were modified or removed
        #[arg(long)]
        fail_on_modifications: bool,
    },
    /// Show workdir changes
    Status {
        /// Workdir (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Also list unchanged and ignored files
        #[arg(short, long)]
        verbose: bool,
    },
    /// Bring a workdir up to date with the session
    Update {
        /// Workdir (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Revision to update to (default: head)
        #[arg(short, long)]
        revision: Option<u64>,
    },
    /// Serve a local repository over TCP
    Serve {
        /// Listen address (default: from system config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Check repository integrity
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = system_config::load()?;
    let repo = cli.repo.as_deref();
    let here = || -> Result<PathBuf> { Ok(std::env::current_dir()?) };

    match cli.command {
        Commands::Mkrepo { path } => cmd::mkrepo::run(path.as_deref().or(repo)),
        Commands::Mksession { name } => cmd::mksession::run(repo, &name),
        Commands::Sessions => cmd::sessions::run(repo),
        Commands::Log { session, limit } => cmd::log::run(repo, &session, limit),
        Commands::Co { session, dir, offset, revision } => {
            cmd::checkout::run(repo, &session, dir, &offset, revision, &config)
        }
        Commands::Ci { dir, session, offset, add_only, dry_run, fail_on_modifications } => {
            let dir = match dir {
                Some(dir) => dir,
                None => here()?,
            };
            let options = CheckinOptions {
                add_only,
                dry_run,
                fail_on_modifications,
                ..CheckinOptions::default()
            };
            cmd::checkin::run(repo, &dir, session.as_deref(), &offset, &options, &config)
        }
        Commands::Status { dir, verbose } => {
            let dir = match dir {
                Some(dir) => dir,
                None => here()?,
            };
            cmd::status::run(&dir, verbose, &config)
        }
        Commands::Update { dir, revision } => {
            let dir = match dir {
                Some(dir) => dir,
                None => here()?,
            };
            cmd::update::run(&dir, revision, &config)
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            cmd::serve::run(repo, &bind)
        }
        Commands::Verify => cmd::verify::run(repo),
    }
}
