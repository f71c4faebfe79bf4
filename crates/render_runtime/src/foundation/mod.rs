//! Foundation module - core utilities and types
//!
//! - Math types and operations
//! - Logging utilities
//! - Lock helpers

pub mod math;
pub mod logging;
pub mod sync;
