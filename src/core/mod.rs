//! Core types: errors, configuration, the image data model.

pub mod config;
pub mod errors;
pub mod model;
