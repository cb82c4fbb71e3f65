#![forbid(unsafe_code)]

//! Wakeables: identifiers for external values a render can wait on.
//!
//! A component that needs a value which is not ready yet returns
//! [`crate::error::Thrown::Suspend`] with a wakeable. The owner of the value
//! announces resolution to the reconciler, which pings or retries every
//! render parked on it.

use std::fmt;

/// Identity of a pending external value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Wakeable(u64);

impl Wakeable {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Wakeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wakeable#{}", self.0)
    }
}
