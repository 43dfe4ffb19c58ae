//! Configuration module
//!
//! Handles loading relay settings from the optional config file, the
//! environment, and CLI overrides.

mod settings;

pub use settings::*;
