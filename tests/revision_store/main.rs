//! Revision Store Integration Test Suite
//!
//! End-to-end scenarios over the public `revstore` API.
//!
//! ## Modules
//!
//! - `workflow`: a bug tracker built on artifacts, revisions and time travel
//! - `remote`: local edits on remote-capable artifacts
//! - `config`: opening a basis from `revstore.toml`
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test revision_store
//! cargo test --test revision_store workflow::
//! cargo test --test revision_store -- --nocapture
//! ```

#[path = "../common/mod.rs"]
mod common;

mod config;
mod remote;
mod workflow;
