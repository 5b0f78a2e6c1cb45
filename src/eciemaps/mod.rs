//! eCIEMaps (CIE-10-ES classification browser) integration
//!
//! This module provides:
//! - API types for taxonomy levels, axis tables and per-code details
//! - The `ClassificationApi` seam with an HTTP and an in-memory implementation

pub mod client;
pub mod types;

pub use client::{fetch, ClassificationApi, EciemapsClient, StaticApi};
pub use types::*;
