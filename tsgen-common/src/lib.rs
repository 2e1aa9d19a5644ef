//! # tsgen Common Library
//!
//! Shared code for the term sheet generation service:
//! - Error types
//! - Configuration loading (TOML file + environment)
//! - Session event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
