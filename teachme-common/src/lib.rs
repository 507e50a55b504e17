//! TeachMe Common - Shared types, utilities, and configuration for the
//! TeachMe backend.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    ChatbotConfig, Config, DatabaseConfig, LlmConfig, ObservabilityConfig, ServerConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
