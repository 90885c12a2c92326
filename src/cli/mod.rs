//! CLI module for juggle - command-line interface and subcommands.
//!
//! Provides session and item management plus the agent loop entry point.

pub mod commands;

pub use commands::Cli;
