#![forbid(unsafe_code)]

//! Identifiers shared between the arena, the reconciler, and hosts.

slotmap::new_key_type! {
    /// An independent tree attached to one host container.
    pub struct RootId;
    /// One stable position in a fiber tree. Both buffers of a fiber live
    /// under the same position.
    pub struct PositionKey;
}

/// Opaque handle to a host task returned by a [`crate::host::HostScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

/// Stable handle to a mounted fiber position, valid until it is deleted.
///
/// Components receive their own handle during render and use it to
/// enqueue state updates later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberHandle {
    pub root: RootId,
    pub position: PositionKey,
}
