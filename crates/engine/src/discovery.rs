//! Chain discovery over raw atoms
//!
//! # Last Atom Of A Physical Chain
//!
//! The `ChainHead` index orders the claimants of a chain newest first. The
//! newest atom is found in three tiers:
//!
//! 1. A single claimant at the newest counter is the answer.
//! 2. Two claimants at one counter (several revisions committed together):
//!    the one whose `PrevAtom` names the other is the answer.
//! 3. Otherwise scan every claimant at that counter, remove each atom that
//!    another names as its `PrevAtom`, and return the survivor. Several
//!    survivors are logged and the highest id wins.
//!
//! Reads here can race a commit that is still publishing; callers wrap them
//! in the basis's `ConsistencyWrapper`.

use crate::access::RevisionIterator;
use crate::artifact::Artifact;
use crate::basis::Basis;
use crate::chain::RevisionChain;
use crate::revision::Revision;
use revstore_core::{AtomId, Error, Result, SystemKey, Wcn};
use revstore_storage::{Atom, AtomIndex, IndexEntry, Universe};
use rustc_hash::FxHashSet;
use std::fmt::Write;
use tracing::{debug, warn};

fn index(universe: &Universe, key: SystemKey) -> Result<&AtomIndex> {
    universe
        .index(key)
        .ok_or_else(|| Error::inconsistent(format!("no index on {}", key)))
}

fn atom(universe: &Universe, id: AtomId) -> Result<Atom> {
    universe
        .get_atom(id)
        .ok_or_else(|| Error::inconsistent(format!("indexed atom {} not found", id)))
}

/// Newest atom of the physical chain headed by `head`, or `None` if no atom
/// claims the chain
pub fn last_atom_in_physical_chain(universe: &Universe, head: AtomId) -> Result<Option<AtomId>> {
    let value = head.as_u64();
    let mut claimants = index(universe, SystemKey::ChainHead)?
        .search_from(value)
        .take_while(|entry| entry.value == value);

    let Some(newest) = claimants.next() else {
        return Ok(None);
    };
    let mut tied: Vec<IndexEntry> = vec![newest];
    for entry in claimants.take(2) {
        if entry.wcn != newest.wcn {
            break;
        }
        tied.push(entry);
    }

    match tied.as_slice() {
        [only] => Ok(Some(only.atom)),
        [a, b] => match resolve_pair(universe, a.atom, b.atom)? {
            Some(last) => Ok(Some(last)),
            None => last_by_scan(universe, head, newest.wcn),
        },
        _ => last_by_scan(universe, head, newest.wcn),
    }
}

fn resolve_pair(universe: &Universe, a: AtomId, b: AtomId) -> Result<Option<AtomId>> {
    let atom_a = atom(universe, a)?;
    let atom_b = atom(universe, b)?;
    if atom_b.get_ref(SystemKey::PrevAtom) == Some(a) {
        Ok(Some(b))
    } else if atom_a.get_ref(SystemKey::PrevAtom) == Some(b) {
        Ok(Some(a))
    } else {
        Ok(None)
    }
}

fn last_by_scan(universe: &Universe, head: AtomId, wcn: Wcn) -> Result<Option<AtomId>> {
    let claimants: Vec<Atom> = index(universe, SystemKey::ChainHead)?
        .search_all(head.as_u64())
        .into_iter()
        .filter(|entry| entry.wcn == wcn)
        .map(|entry| atom(universe, entry.atom))
        .collect::<Result<_>>()?;

    let referenced: FxHashSet<AtomId> = claimants
        .iter()
        .filter_map(|a| a.get_ref(SystemKey::PrevAtom))
        .collect();
    let survivors: Vec<AtomId> = claimants
        .iter()
        .map(Atom::id)
        .filter(|id| !referenced.contains(id))
        .collect();

    warn!(
        target: "revstore::discovery",
        chain = %head,
        wcn = %wcn,
        claimants = claimants.len(),
        survivors = survivors.len(),
        "Chain head resolved by full scan"
    );

    match survivors.iter().max() {
        Some(last) if survivors.len() == 1 => Ok(Some(*last)),
        Some(last) => {
            warn!(target: "revstore::discovery", chain = %head, ?survivors, "Several chain heads, taking the highest id");
            Ok(Some(*last))
        }
        None => Err(Error::ChainCycle {
            start: head,
            steps: claimants.len(),
        }),
    }
}

/// Head of the physical chain holding atom `id`
pub fn physical_chain_of_atom(basis: &Basis, id: AtomId) -> Result<AtomId> {
    let universe = basis.universe();
    basis.consistency().run("physical chain of atom", || {
        atom(universe, id)?
            .get_ref(SystemKey::ChainHead)
            .ok_or_else(|| Error::inconsistent(format!("atom {} has no chain head", id)))
    })
}

/// Physical chain holding `revision`
pub fn physical_chain_of_revision(revision: &Revision) -> Result<RevisionChain> {
    let basis = revision.basis();
    let head = match revision {
        Revision::Pending(creator) if creator.built_revision().is_none() => creator.chain_head(),
        _ => physical_chain_of_atom(basis, revision.key())?,
    };
    basis.physical_chain(head)
}

/// Check if `target` comes before `reference` when walking back with
/// `iterator`
pub fn is_earlier_on_chain(
    universe: &Universe,
    reference: AtomId,
    target: AtomId,
    iterator: RevisionIterator,
) -> Result<bool> {
    let mut visited = FxHashSet::default();
    let mut current = atom(universe, reference)?;
    loop {
        if !visited.insert(current.id()) {
            return Err(Error::ChainCycle {
                start: reference,
                steps: visited.len(),
            });
        }
        match iterator.prev_atom(&current) {
            Some(prev) if prev == target => return Ok(true),
            Some(prev) => current = atom(universe, prev)?,
            None => return Ok(false),
        }
    }
}

/// Check if an atom carries any user attribute junction
pub fn has_user_content(atom: &Atom) -> bool {
    !atom.attribute_keys().is_empty()
}

// ============================================================================
// Local chains
// ============================================================================

/// Open local chain of a remote-capable artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalChain {
    /// Local chain head atom
    pub head: AtomId,
    /// Newest atom of the local chain
    pub last: AtomId,
}

/// Head of the newest local chain of `artifact`, open or closed
pub fn newest_local_head(universe: &Universe, artifact: AtomId) -> Option<AtomId> {
    universe
        .index(SystemKey::ChainArtifact)
        .and_then(|index| index.search_exact(artifact.as_u64()))
        .map(|entry| entry.atom)
}

/// Newest local chain of `artifact` if it is not closed
pub fn open_local_chain(universe: &Universe, artifact: AtomId) -> Result<Option<LocalChain>> {
    let Some(head) = newest_local_head(universe, artifact) else {
        return Ok(None);
    };
    let last = last_atom_in_physical_chain(universe, head)?
        .ok_or_else(|| Error::inconsistent(format!("local chain {} has no atoms", head)))?;
    if atom(universe, last)?.has(SystemKey::IsClosure) {
        Ok(None)
    } else {
        Ok(Some(LocalChain { head, last }))
    }
}

/// Previous revision a reader should see, skipping local chain closures
pub fn prev_revision_for_view(revision: &Revision) -> Result<Option<Revision>> {
    let mut visited = FxHashSet::default();
    let mut prev = revision.prev_revision()?;
    while let Some(candidate) = &prev {
        if !visited.insert(candidate.key()) {
            return Err(Error::ChainCycle {
                start: revision.key(),
                steps: visited.len(),
            });
        }
        if !candidate.is_closure()? {
            break;
        }
        prev = candidate.prev_revision()?;
    }
    Ok(prev)
}

/// Resolved attribute dump of the artifact's newest revision
pub fn describe_artifact(artifact: &Artifact) -> Result<String> {
    let last = artifact.last_revision()?;
    let mut out = format!("{} at {}", artifact, last);
    for (attribute, value) in last.values()? {
        let _ = write!(out, "\n  {} = {:?}", attribute, value);
    }
    debug!(target: "revstore::discovery", %artifact, "{}", out);
    Ok(out)
}
