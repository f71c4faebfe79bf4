//! Passive render resources
//!
//! Pipelines, materials and geometry instances. Nothing here records commands; the
//! renderer reads these tables while it builds a frame.

pub mod geo;
pub mod materials;
