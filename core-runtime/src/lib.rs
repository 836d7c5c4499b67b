//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the document sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the sync core depends on.
//! It establishes the logging conventions, the fail-fast bridge wiring and the
//! event broadcasting used to fan state changes out to secondary observers.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
