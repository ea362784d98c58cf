//! Subcommand implementations

pub mod inspect;
pub mod optimize;
pub mod run;
pub mod verify;
