//! # lb-types
//!
//! Core data model shared by every latent-bo crate: search-space bounds,
//! observations and the append-only dataset, plus the error taxonomy used
//! across evaluation, surrogate fitting, acquisition and the optimization
//! loop.

pub mod bounds;
pub mod errors;
pub mod observation;

pub use bounds::*;
pub use errors::*;
pub use observation::*;
