//! Exclusion rules: artifact loading and reference matching.

pub mod artifact;
pub mod matcher;
