//! Workdir synchronization for cairn repositories
//!
//! A [`Workdir`] binds a directory to one session of a repository and
//! reconciles the two: [`Workdir::get_changes`] classifies every path,
//! [`Workdir::checkin`] turns local changes into a new revision,
//! [`Workdir::checkout`] and [`Workdir::update`] bring revisions to disk.
//!
//! Repository access goes through the [`Front`] trait, implemented for a
//! local repository ([`LocalFront`]) and a TCP server ([`RemoteFront`]).

pub mod changes;
pub mod front;
pub mod ignore;
pub mod meta;
pub mod remote;
pub mod scan;
pub mod workdir;

pub use changes::{Change, Changes};
pub use front::{open_front, Front, LocalFront, Location};
pub use ignore::IgnoreRules;
pub use meta::{Baseline, MetaDir, WorkdirInfo};
pub use remote::{RemoteFront, Server};
pub use workdir::{CheckinOptions, UpdateReport, Workdir};

/// Create an empty local repository at `location`
///
/// Remote locations are rejected; repositories are created on the
/// machine that serves them.
pub fn create_repository(location: &str) -> cairn_core::Result<()> {
    match Location::parse(location)? {
        Location::Local(path) => {
            cairn_journal::Repository::create(&path)?;
            Ok(())
        }
        Location::Remote(_) => Err(cairn_core::Error::user(
            "repositories can only be created on a local path",
        )),
    }
}
