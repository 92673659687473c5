//! Operator tooling for the pushreg device registry.
//!
//! Runs the token-hash backfill and the duplicate-device sweep against a JSON
//! device snapshot.

pub mod cli;
pub mod config;

pub use config::AdminConfig;
