//! Particles: opaque junction payloads
//!
//! An atom stores every junction value as a `Particle`. System junctions hold
//! `Particle::Long` (atom references and marker codes); attribute junctions hold
//! `Particle::Bytes`, a bincode-encoded `StoredValue`.
//!
//! `StoredValue::Unset` records an explicit unset, which shadows any value
//! inherited from earlier revisions.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque value handle stored in an atom junction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Particle {
    /// Numeric payload (system references, marker codes)
    Long(u64),
    /// Serialized payload (attribute values)
    Bytes(Arc<[u8]>),
}

impl Particle {
    /// Numeric payload, if this is a `Long` particle
    #[inline]
    pub fn as_long(&self) -> Option<u64> {
        match self {
            Particle::Long(v) => Some(*v),
            Particle::Bytes(_) => None,
        }
    }

    /// Serialized payload, if this is a `Bytes` particle
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Particle::Bytes(b) => Some(b),
            Particle::Long(_) => None,
        }
    }
}

/// What an attribute junction records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Attribute explicitly unset in this revision
    Unset,
    /// Attribute set to a value in this revision
    Set(Value),
}

impl StoredValue {
    /// Convert to the API representation (`Unset` becomes `None`)
    pub fn into_value(self) -> Option<Value> {
        match self {
            StoredValue::Unset => None,
            StoredValue::Set(value) => Some(value),
        }
    }
}

impl From<Option<Value>> for StoredValue {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(v) => StoredValue::Set(v),
            None => StoredValue::Unset,
        }
    }
}

/// Marshals attribute values to and from particles
///
/// Decoding failures are reported as transient inconsistencies: a particle that
/// cannot be understood usually means the atom was read while being replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec;

impl ValueCodec {
    /// Create a codec
    pub const fn new() -> Self {
        ValueCodec
    }

    /// Encode a stored value into a particle
    pub fn marshall(&self, value: &StoredValue) -> Result<Particle> {
        let bytes = bincode::serialize(value)?;
        Ok(Particle::Bytes(Arc::from(bytes)))
    }

    /// Decode a particle into a stored value
    pub fn unmarshall(&self, particle: &Particle) -> Result<StoredValue> {
        match particle {
            Particle::Bytes(bytes) => bincode::deserialize(bytes).map_err(|e| {
                Error::Inconsistent(format!("cannot understand value particle: {}", e))
            }),
            Particle::Long(v) => Err(Error::Inconsistent(format!(
                "expected value particle, found long {}",
                v
            ))),
        }
    }

    /// Decode a particle straight to the API representation
    pub fn extract(&self, particle: &Particle) -> Result<Option<Value>> {
        self.unmarshall(particle).map(StoredValue::into_value)
    }
}
