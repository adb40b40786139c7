//! Ironbot CLI -- command-line control of pipeline units
//!
//! The binary in `main.rs` is a thin dispatcher; argument parsing, command
//! handlers and output rendering live here so they can be tested directly.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
