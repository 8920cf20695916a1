//! Core domain models for protorun
//!
//! This module defines the fundamental data structures: run configuration,
//! compact per-iteration notation, protocols, steps and pipelines.

pub mod config;
pub mod error;
pub mod expand;
pub mod pipeline;
pub mod protocol;
pub mod state;
pub mod step;

pub use error::*;
pub use expand::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
