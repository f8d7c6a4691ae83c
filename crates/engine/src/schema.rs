//! Atom markers and system attributes
//!
//! Every atom written by the revision layer carries an `AtomMarker` junction
//! saying what it is. System attributes (`deleted`, `type`, `super_type`) are
//! singleton artifacts, found by their `SingletonToken` and created on first
//! open of a universe.

use revstore_core::{AtomId, Error, Result, SystemKey};
use revstore_storage::{Atom, Universe, Verifier};
use std::sync::Arc;
use tracing::{debug, info};

/// What an atom represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum AtomMarker {
    /// Artifact atom of an ordinary artifact (first revision of its chain)
    LocalArtifact = 1,
    /// Artifact atom of a remote-capable artifact (first main chain revision)
    RcbArtifact = 2,
    /// Head of a local chain of a remote-capable artifact
    LocalChainHead = 3,
    /// Any later revision
    Revision = 4,
    /// Artifact atom of a bootstrapped system object
    Singleton = 5,
}

impl AtomMarker {
    /// Numeric code stored in the junction
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Decode a junction value
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(AtomMarker::LocalArtifact),
            2 => Some(AtomMarker::RcbArtifact),
            3 => Some(AtomMarker::LocalChainHead),
            4 => Some(AtomMarker::Revision),
            5 => Some(AtomMarker::Singleton),
            _ => None,
        }
    }

    /// Marker of an atom, if it has a valid one
    pub fn of(atom: &Atom) -> Option<Self> {
        atom.get_long(SystemKey::AtomMarker).and_then(Self::from_code)
    }

    /// Check if the atom is the artifact atom of some artifact
    pub const fn is_artifact(self) -> bool {
        matches!(
            self,
            AtomMarker::LocalArtifact | AtomMarker::RcbArtifact | AtomMarker::Singleton
        )
    }
}

/// Singleton tokens of the system attributes
const TOKEN_DELETED: u64 = 1;
const TOKEN_TYPE: u64 = 2;
const TOKEN_SUPER_TYPE: u64 = 3;

const SYSTEM_TOKENS: [(u64, &str); 3] = [
    (TOKEN_DELETED, "deleted"),
    (TOKEN_TYPE, "type"),
    (TOKEN_SUPER_TYPE, "super_type"),
];

/// Bootstrap attempts before giving up on a racing opener
const BOOTSTRAP_ATTEMPTS: usize = 3;

/// Keys of the system attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// `deleted`: `Bool(true)` on the revision that deletes an artifact
    pub deleted: AtomId,
    /// `type`: reference to the artifact's type artifact
    pub type_attr: AtomId,
    /// `super_type`: on a type artifact, reference to its parent type
    pub super_type: AtomId,
}

/// Rejects a singleton that another opener created first
struct SingletonVerifier {
    token: u64,
}

impl Verifier for SingletonVerifier {
    fn verify(&self, universe: &Universe) -> Result<()> {
        match find_singleton(universe, self.token) {
            Some(existing) => Err(Error::CommitConflict {
                chain: existing,
                reason: format!("singleton {} already exists", self.token),
            }),
            None => Ok(()),
        }
    }
}

fn find_singleton(universe: &Universe, token: u64) -> Option<AtomId> {
    universe
        .index(SystemKey::SingletonToken)
        .and_then(|index| index.search_exact(token))
        .map(|entry| entry.atom)
}

impl Schema {
    /// Find the system attributes, creating the missing ones
    pub(crate) fn bootstrap(universe: &Arc<Universe>, read_only: bool) -> Result<Schema> {
        for attempt in 0..BOOTSTRAP_ATTEMPTS {
            let found: Vec<Option<AtomId>> = SYSTEM_TOKENS
                .iter()
                .map(|(token, _)| find_singleton(universe, *token))
                .collect();

            if let [Some(deleted), Some(type_attr), Some(super_type)] = found[..] {
                debug!(target: "revstore::schema", %deleted, %type_attr, %super_type, "Schema found");
                return Ok(Schema {
                    deleted,
                    type_attr,
                    super_type,
                });
            }
            if read_only {
                return Err(Error::InvalidOperation(
                    "read-only store has no schema".into(),
                ));
            }

            let expansion = universe.begin();
            for ((token, name), existing) in SYSTEM_TOKENS.iter().zip(&found) {
                if existing.is_some() {
                    continue;
                }
                let atom = expansion.create_atom()?;
                atom.build_long(SystemKey::AtomMarker, AtomMarker::Singleton.code())?;
                atom.build_ref(SystemKey::ChainHead, atom.id())?;
                atom.build_long(SystemKey::SingletonToken, *token)?;
                expansion.add_verifier(Box::new(SingletonVerifier { token: *token }))?;
                info!(target: "revstore::schema", attribute = name, key = %atom.id(), "Creating system attribute");
            }
            match expansion.commit() {
                Ok(_) => continue,
                Err(e) if e.is_conflict() => {
                    debug!(target: "revstore::schema", attempt, "Schema bootstrap raced, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::InvalidOperation(format!(
            "schema bootstrap did not settle after {} attempts",
            BOOTSTRAP_ATTEMPTS
        )))
    }
}
