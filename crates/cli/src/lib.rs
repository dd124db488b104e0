//! dtree command-line front end
//!
//! Argument parsing, logging setup and the control-input readers used by the
//! `dtree` binary.

pub mod args;
pub mod commands;
pub mod logging;

pub use args::Cli;
