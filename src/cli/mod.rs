//! CLI module for the listing pipeline binaries
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;
#[cfg(feature = "server")]
mod server;

pub use main_impl::{main, Cli, CliOutputFormat, CliRemovalMode};
#[cfg(feature = "server")]
pub use server::{serve_main, ServerCli};
