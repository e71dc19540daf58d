//! Pulseboard command-line front end.
//!
//! Exposes the CLI modules and configuration for integration testing.

pub mod cli;
pub mod config;

pub use config::Config;
