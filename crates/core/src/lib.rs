//! Core types for revstore
//!
//! This crate defines the foundational types used throughout the system:
//! - AtomId: numeric identity of atoms, artifacts, chains and revisions
//! - Wcn: global commit counter
//! - SystemKey / JunctionKey: keys of junctions stored in atoms
//! - Value: attribute payloads
//! - Particle / ValueCodec: opaque junction payloads and their encoding
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod particle;
pub mod types;
pub mod value;
pub mod wcn;

pub use error::{ChainFailure, Error, Result};
pub use particle::{Particle, StoredValue, ValueCodec};
pub use types::{AtomId, JunctionKey, SystemKey};
pub use value::Value;
pub use wcn::Wcn;
