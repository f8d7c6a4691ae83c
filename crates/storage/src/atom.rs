//! Atoms: the storage unit of the universe
//!
//! An atom is a numbered set of junctions (`JunctionKey -> Particle`). It is
//! created *ethereal* inside an expansion, receives junctions while ethereal,
//! and is frozen when the expansion commits. A frozen atom carries the WCN of
//! its commit and rejects further writes.
//!
//! `Atom` is a cheap handle; clones share the same underlying record.

use parking_lot::RwLock;
use revstore_core::{AtomId, Error, JunctionKey, Particle, Result, SystemKey, Wcn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct AtomInner {
    id: AtomId,
    /// 0 while ethereal
    wcn: AtomicU64,
    frozen: AtomicBool,
    junctions: RwLock<BTreeMap<JunctionKey, Particle>>,
}

/// Handle to an atom record
#[derive(Clone)]
pub struct Atom {
    inner: Arc<AtomInner>,
}

impl Atom {
    pub(crate) fn ethereal(id: AtomId) -> Self {
        Atom {
            inner: Arc::new(AtomInner {
                id,
                wcn: AtomicU64::new(Wcn::EARLIEST.as_u64()),
                frozen: AtomicBool::new(false),
                junctions: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Atom identity
    #[inline]
    pub fn id(&self) -> AtomId {
        self.inner.id
    }

    /// Commit counter of the commit that froze this atom (`EARLIEST` while ethereal)
    #[inline]
    pub fn wcn(&self) -> Wcn {
        Wcn::new(self.inner.wcn.load(Ordering::Acquire))
    }

    /// Check if the atom has been committed
    #[inline]
    pub fn is_committed(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Read a junction
    pub fn get(&self, key: impl Into<JunctionKey>) -> Option<Particle> {
        self.inner.junctions.read().get(&key.into()).cloned()
    }

    /// Check if a junction is present
    pub fn has(&self, key: impl Into<JunctionKey>) -> bool {
        self.inner.junctions.read().contains_key(&key.into())
    }

    /// Read a numeric system junction
    pub fn get_long(&self, key: SystemKey) -> Option<u64> {
        self.get(key).and_then(|p| p.as_long())
    }

    /// Read a system junction that references another atom
    pub fn get_ref(&self, key: SystemKey) -> Option<AtomId> {
        self.get_long(key).map(AtomId::new)
    }

    /// Snapshot of all junctions, system keys first
    pub fn copy_junctions(&self) -> BTreeMap<JunctionKey, Particle> {
        self.inner.junctions.read().clone()
    }

    /// Keys of the user attribute junctions
    pub fn attribute_keys(&self) -> Vec<AtomId> {
        self.inner
            .junctions
            .read()
            .keys()
            .filter_map(JunctionKey::attribute)
            .collect()
    }

    /// Write a junction on an ethereal atom
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the atom is already committed.
    pub fn build_junction(&self, key: impl Into<JunctionKey>, particle: Particle) -> Result<()> {
        let key = key.into();
        // Checked under the write lock so a racing freeze cannot slip in between.
        let mut junctions = self.inner.junctions.write();
        if self.is_committed() {
            return Err(Error::InvalidOperation(format!(
                "cannot write {} on committed atom {}",
                key,
                self.id()
            )));
        }
        junctions.insert(key, particle);
        Ok(())
    }

    /// Write a reference junction on an ethereal atom
    pub fn build_ref(&self, key: SystemKey, target: AtomId) -> Result<()> {
        self.build_junction(key, Particle::Long(target.as_u64()))
    }

    /// Write a numeric junction on an ethereal atom
    pub fn build_long(&self, key: SystemKey, value: u64) -> Result<()> {
        self.build_junction(key, Particle::Long(value))
    }

    pub(crate) fn freeze(&self, wcn: Wcn) {
        let _junctions = self.inner.junctions.write();
        self.inner.wcn.store(wcn.as_u64(), Ordering::Release);
        self.inner.frozen.store(true, Ordering::Release);
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Atom {}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("wcn", &self.wcn())
            .field("committed", &self.is_committed())
            .finish()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom{}@{}", self.id(), self.wcn())
    }
}
