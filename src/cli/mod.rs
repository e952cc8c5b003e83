//! CLI module for jobwright - command-line interface and subcommands.
//!
//! Provides the daemon entry point and offline job operations on the snapshot.

pub mod commands;

pub use commands::Cli;
