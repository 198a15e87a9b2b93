//! Command implementations

pub mod checkin;
pub mod checkout;
pub mod log;
pub mod mkrepo;
pub mod mksession;
pub mod serve;
pub mod sessions;
pub mod status;
pub mod update;
pub mod verify;
