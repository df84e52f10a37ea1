//! STOCKPULSE: stock-sampling sales estimation engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod money;
pub mod cache;
pub mod store;
pub mod platform;
pub mod engine;
pub mod api;
