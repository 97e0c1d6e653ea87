//! CLI module for harvestr - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for the daemon, one-off
//! runs, status inspection and record maintenance.

pub mod commands;

pub use commands::Cli;
