//! Common utilities and types shared across the conference SFU components.

#![warn(clippy::pedantic)]

/// Module for identifier types
pub mod types;

/// Module for common configuration
pub mod config;
