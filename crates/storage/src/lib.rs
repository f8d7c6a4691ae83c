//! Atom substrate for revstore
//!
//! This crate implements the in-memory universe the revision layer is built on:
//! - Atom: numbered junction sets, ethereal until committed
//! - Universe: committed atoms, global commit counter, commit lock
//! - Expansion: write transaction with verifiers and commit listeners
//! - AtomIndex: secondary indices with exact and range search
//!
//! Nothing here knows about artifacts or revisions; chain bookkeeping is just
//! a set of system junctions the upper layer agrees on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atom;
pub mod expansion;
pub mod index;
pub mod universe;

pub use atom::Atom;
pub use expansion::{CommitListener, Expansion, ExpansionStatus, Verifier};
pub use index::{AtomIndex, IndexCursor, IndexEntry};
pub use universe::{Universe, INDEXED_KEYS};
