//! The `trestle-bot` command line: argument parsing, config loading and the
//! command handlers that drive `trestle_bot_core`.

pub mod cli;
pub mod commands;
pub mod error;
pub mod load_config;
pub mod log;
