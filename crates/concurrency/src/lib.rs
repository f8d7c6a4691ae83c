//! Concurrency primitives for revstore
//!
//! This crate implements the coordination pieces the revision layer is built from:
//! - ValueCache: per-revision slot cache with single-flight loading
//! - ConsistencyWrapper: bounded retry of transiently inconsistent reads
//! - CounterMemo: memo valid until the global commit counter advances
//! - StateSwitch: one-way building → built switch under one mutex
//! - HandleCache: bounded cache of handle state
//!
//! Locks here guard in-memory bookkeeping only; loaders and memo computations
//! always run with no lock held.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
pub mod handle_cache;
pub mod memo;
pub mod switch;
pub mod value_cache;

pub use consistency::{ConsistencyConfig, ConsistencyWrapper};
pub use handle_cache::HandleCache;
pub use memo::CounterMemo;
pub use switch::{Phase, StateSwitch};
pub use value_cache::{CacheStats, ValueCache};
