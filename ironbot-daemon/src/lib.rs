//! Ironbot daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `ironbot-daemon` is used as a binary (main.rs).

pub mod api;
pub mod cli;
pub mod daemon;
pub mod health;
pub mod logging;
pub mod metrics_server;
