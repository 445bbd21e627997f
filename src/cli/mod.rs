//! CLI module for the bgkey library
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use config::{parse_magic_spec, parse_pick_color, CliConfigBuilder, MagicSpec};
pub use main_impl::{main, Cli, CliEdgeMode, CliMode};
