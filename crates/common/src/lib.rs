//! Common types shared across Switchboard components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
