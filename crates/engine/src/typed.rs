//! Typed views of artifacts
//!
//! A type artifact is registered with the Rust type that wraps its instances.
//! An artifact's `type` attribute (on its first revision) names its type
//! artifact; type artifacts may name a parent through `super_type`.
//! `Artifact::typed::<T>()` follows that chain until it reaches a registered
//! type and wraps the artifact if the registered type is `T`.

use crate::artifact::Artifact;
use crate::basis::Basis;
use revstore_core::{AtomId, Error, Result, Value};
use rustc_hash::FxHashSet;
use std::any::TypeId;

/// Rust wrapper around an artifact of a registered type
pub trait TypedArtifact: Sized + 'static {
    /// Wrap `artifact`
    fn from_artifact(artifact: Artifact) -> Self;
}

fn reference(value: Option<Value>, what: AtomId) -> Result<Option<AtomId>> {
    match value {
        None => Ok(None),
        Some(Value::Reference(id)) => Ok(Some(id)),
        Some(other) => Err(Error::InvalidOperation(format!(
            "attribute {} holds {} instead of a reference",
            what,
            other.type_name()
        ))),
    }
}

impl Basis {
    /// Wrap instances of `type_artifact` (and of its subtypes) as `T`
    pub fn register_typed<T: TypedArtifact>(&self, type_artifact: &Artifact) {
        self.register_type(type_artifact.key(), TypeId::of::<T>());
    }
}

impl Artifact {
    /// Typed wrapper of this artifact, if its type resolves to `T`
    pub fn typed<T: TypedArtifact>(&self) -> Result<Option<T>> {
        let schema = self.basis().schema();
        let first = self.first_revision()?;
        let mut current = reference(first.value(schema.type_attr)?, schema.type_attr)?;

        let mut visited = FxHashSet::default();
        while let Some(type_key) = current {
            if !visited.insert(type_key) {
                return Err(Error::ChainCycle {
                    start: type_key,
                    steps: visited.len(),
                });
            }
            if let Some(registered) = self.basis().registered_type(type_key) {
                return Ok((registered == TypeId::of::<T>()).then(|| T::from_artifact(self.clone())));
            }
            let type_artifact = self.basis().artifact(type_key)?;
            let parent = type_artifact.last_revision()?.value(schema.super_type)?;
            current = reference(parent, schema.super_type)?;
        }
        Ok(None)
    }
}
