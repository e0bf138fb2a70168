//! Core types, configuration, and error handling for azdo-tools.
//!
//! This crate provides the foundational pieces used across all azdo
//! components: the error taxonomy, configuration loading, organization URL
//! resolution, REST enum string forms, and text truncation helpers.

pub mod config;
pub mod enums;
pub mod error;
pub mod orgurl;
pub mod text;

pub use config::{Config, WatchSettings};
pub use error::{Error, Result};
pub use orgurl::BaseUrls;
