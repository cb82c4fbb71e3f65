#![forbid(unsafe_code)]

//! Errors returned by the reconciler's public API.
//!
//! Render-time failures are not API errors: they are captured by error
//! boundaries or surfaced through `Reconciler::take_uncaught_errors`.

use std::fmt;

use arbor_core::{FiberHandle, RootId};

/// Misuse of the reconciler API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerError {
    /// The root was never created or has been unmounted.
    UnknownRoot(RootId),
    /// The handle names a position that is no longer in the tree.
    UnmountedFiber(FiberHandle),
    /// Called from inside a render or commit.
    Reentrant,
}

impl fmt::Display for ReconcilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRoot(root) => write!(f, "unknown root {root:?}"),
            Self::UnmountedFiber(handle) => {
                write!(f, "fiber {:?} is not mounted in root {:?}", handle.position, handle.root)
            }
            Self::Reentrant => f.write_str("reconciler entered while rendering or committing"),
        }
    }
}

impl std::error::Error for ReconcilerError {}

/// Result alias for reconciler API calls.
pub type ReconcilerResult<T> = Result<T, ReconcilerError>;
