#![forbid(unsafe_code)]

//! Image eraser: node-level container image hygiene.
//!
//! Three short-lived phases share one run record:
//! 1. **Collector**: inventory a node over CRI and publish unused, non-excluded images
//! 2. **Scanner**: verify every candidate and record the vulnerable ones
//! 3. **Eraser**: re-check exclusions and running containers, then remove
//!
//! # Library usage
//!
//! ```rust,no_run
//! use image_eraser::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use image_eraser::core::config::Config;
//! use image_eraser::pipeline::reconcile::reconcile;
//! ```

pub mod prelude;

pub mod core;
pub mod events;
pub mod exclusion;
pub mod logger;
pub mod pipeline;
pub mod runtime;
pub mod state;
pub mod verify;
