//! Write commit number
//!
//! The WCN is the global commit counter. Every committed atom carries the WCN
//! of the commit that produced it, which gives a total order over commits.
//!
//! ## Sentinels
//!
//! - `Wcn::EARLIEST`: before every commit. Pending revisions report it.
//! - `Wcn::LATEST`: after every commit. Used as "no time-travel bound".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Global commit counter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Wcn(u64);

impl Wcn {
    /// Before any commit
    pub const EARLIEST: Wcn = Wcn(0);

    /// After any commit
    pub const LATEST: Wcn = Wcn(u64::MAX);

    /// Wrap a raw counter value
    pub const fn new(ucn: u64) -> Self {
        Wcn(ucn)
    }

    /// Raw counter value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The counter value that follows this one
    #[inline]
    pub const fn next(&self) -> Self {
        Wcn(self.0.saturating_add(1))
    }

    /// The counter value preceding this one (saturates at `EARLIEST`)
    #[inline]
    pub const fn step_back(&self) -> Self {
        Wcn(self.0.saturating_sub(1))
    }

    /// Strictly earlier than `other`
    #[inline]
    pub fn is_earlier(&self, other: Wcn) -> bool {
        *self < other
    }

    /// Earlier than or equal to `other`
    #[inline]
    pub fn is_earlier_or_equal(&self, other: Wcn) -> bool {
        *self <= other
    }

    /// Check for the `LATEST` sentinel
    #[inline]
    pub const fn is_latest(&self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for Wcn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("--"),
            u64::MAX => f.write_str("++"),
            ucn => write!(f, "{}", ucn),
        }
    }
}
