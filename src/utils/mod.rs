//! The `utils` module provides a collection of shared definitions used across
//! the `pubrelay` application.
//!
//! It centralizes the error taxonomy and the tracing/logging setup so the
//! rest of the crate reports failures and diagnostics consistently.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
