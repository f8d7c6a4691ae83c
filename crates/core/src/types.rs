//! Identifier types shared by every layer
//!
//! - `AtomId`: numeric identity of an atom. Artifacts, chains and revisions are
//!   all addressed by the id of the atom that represents them.
//! - `SystemKey`: junction keys reserved for chain bookkeeping.
//! - `JunctionKey`: key of a single junction inside an atom, either a system key
//!   or a user attribute (addressed by the attribute artifact's key).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identity of an atom
///
/// Ids are allocated by the universe and never reused. An artifact's key, a
/// chain's key and a revision's key are all atom ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AtomId(u64);

impl AtomId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        AtomId(raw)
    }

    /// Raw numeric value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for AtomId {
    fn from(raw: u64) -> Self {
        AtomId(raw)
    }
}

/// Junction keys reserved for system bookkeeping
///
/// These never collide with user attributes, which are keyed by artifact id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SystemKey {
    /// What kind of object the atom represents (see the engine's `AtomMarker`)
    AtomMarker,
    /// Head atom of the physical chain this atom belongs to
    ChainHead,
    /// Previous atom on the same physical chain
    PrevAtom,
    /// For a local chain head: the artifact that owns the chain
    ChainArtifact,
    /// For a local chain head: the main chain atom the local chain branched from
    CopiedFrom,
    /// Marks the revision that closed a local chain
    IsClosure,
    /// Token identifying a bootstrapped system object
    SingletonToken,
}

impl SystemKey {
    /// All system keys, in declaration order
    pub const ALL: [SystemKey; 7] = [
        SystemKey::AtomMarker,
        SystemKey::ChainHead,
        SystemKey::PrevAtom,
        SystemKey::ChainArtifact,
        SystemKey::CopiedFrom,
        SystemKey::IsClosure,
        SystemKey::SingletonToken,
    ];

    /// Short name used in diagnostics
    pub const fn name(&self) -> &'static str {
        match self {
            SystemKey::AtomMarker => "KL_ATOM_MARKER",
            SystemKey::ChainHead => "KA_CHAIN_HEAD",
            SystemKey::PrevAtom => "KA_PREV_ATOM",
            SystemKey::ChainArtifact => "KA_CHAIN_ARTIFACT",
            SystemKey::CopiedFrom => "KA_COPIED_FROM",
            SystemKey::IsClosure => "KL_IS_CLOSURE",
            SystemKey::SingletonToken => "KL_SINGLETON_TOKEN",
        }
    }
}

impl fmt::Display for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of a junction stored in an atom
///
/// System junctions sort before attribute junctions, so iterating an atom's
/// junctions yields the bookkeeping first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JunctionKey {
    /// Reserved bookkeeping junction
    System(SystemKey),
    /// User attribute, keyed by the attribute artifact
    Attribute(AtomId),
}

impl JunctionKey {
    /// Check if this is a user attribute junction
    #[inline]
    pub const fn is_attribute(&self) -> bool {
        matches!(self, JunctionKey::Attribute(_))
    }

    /// The attribute key, if this is a user attribute junction
    #[inline]
    pub const fn attribute(&self) -> Option<AtomId> {
        match self {
            JunctionKey::Attribute(id) => Some(*id),
            JunctionKey::System(_) => None,
        }
    }
}

impl From<SystemKey> for JunctionKey {
    fn from(key: SystemKey) -> Self {
        JunctionKey::System(key)
    }
}

impl From<AtomId> for JunctionKey {
    fn from(attribute: AtomId) -> Self {
        JunctionKey::Attribute(attribute)
    }
}

impl fmt::Display for JunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JunctionKey::System(key) => write!(f, "{}", key),
            JunctionKey::Attribute(id) => write!(f, "attr{}", id),
        }
    }
}
