//! Core transcoding data models and constants
//!
//! Shared data structures for transcode-service and related tooling.

pub mod constants;
pub mod models;

pub use models::*;
