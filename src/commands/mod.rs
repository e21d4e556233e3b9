//! Subcommand implementations for the `citydir` binary

pub mod download;
pub mod init;
pub mod parse;
pub mod run;
pub mod transform;
