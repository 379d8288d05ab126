//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`key`] - Cache key generation
//! - [`cache`] - Cache operations (put, get, stats, cleanup, optimize, clear)

pub mod cache;
pub mod key;
