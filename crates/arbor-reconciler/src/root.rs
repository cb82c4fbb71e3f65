#![forbid(unsafe_code)]

//! Per-container root record.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use arbor_core::{
    FiberArena, FiberId, FiberKind, FiberProps, Lanes, PositionKey, RenderError, RootId,
    RootLanes, TaskHandle, Wakeable,
};

/// A finished render waiting for its commit.
pub(crate) struct FinishedWork {
    pub(crate) fiber: FiberId,
    pub(crate) lanes: Lanes,
    pub(crate) uncaught: Vec<RenderError>,
}

/// One independent tree attached to a host container.
pub(crate) struct FiberRoot<I> {
    pub(crate) container: I,
    pub(crate) arena: FiberArena<I>,
    /// Host-root buffer of the committed tree.
    pub(crate) current: FiberId,
    pub(crate) lanes: RootLanes,

    /// Host task currently scheduled for this root.
    pub(crate) callback_node: Option<TaskHandle>,
    /// Highest lane the scheduled task was created for.
    pub(crate) callback_priority: Lanes,
    /// Next root in the scheduled-roots list.
    pub(crate) next: Option<RootId>,

    /// Render finished but its commit is throttled.
    pub(crate) pending_commit: Option<FinishedWork>,
    pub(crate) timeout_handle: Option<TaskHandle>,

    /// Lanes suspended on each wakeable, pinged when it resolves.
    pub(crate) ping_cache: HashMap<Wakeable, Lanes>,
    /// Suspense boundaries to retry when a wakeable resolves.
    pub(crate) retry_cache: HashMap<Wakeable, Vec<PositionKey>>,
    /// Wakeables resolved while a render or throttled commit was in flight.
    pub(crate) resolved: HashSet<Wakeable>,
    /// Host time at which a suspense fallback last appeared.
    pub(crate) most_recent_fallback_time: Option<Duration>,
}

impl<I> FiberRoot<I> {
    pub(crate) fn new(container: I) -> Self {
        let mut arena = FiberArena::new();
        let current = arena.create(FiberKind::HostRoot, None, None, FiberProps::Empty);
        Self {
            container,
            arena,
            current,
            lanes: RootLanes::new(),
            callback_node: None,
            callback_priority: Lanes::NONE,
            next: None,
            pending_commit: None,
            timeout_handle: None,
            ping_cache: HashMap::new(),
            retry_cache: HashMap::new(),
            resolved: HashSet::new(),
            most_recent_fallback_time: None,
        }
    }

    /// The host instance a host-parent fiber inserts children into.
    pub(crate) fn host_parent_instance(&self, fiber: FiberId) -> Option<&I> {
        match self.arena.kind(fiber) {
            FiberKind::HostRoot => Some(&self.container),
            FiberKind::HostComponent(_) => self.arena.state_node(fiber),
            _ => None,
        }
    }

    /// Drop ping entries for lanes that are no longer pending and retry
    /// entries for boundaries that were deleted.
    pub(crate) fn prune_wakeables(&mut self) {
        let pending = self.lanes.pending;
        self.ping_cache.retain(|_, lanes| {
            *lanes &= pending;
            !lanes.is_empty()
        });
        let arena = &self.arena;
        self.retry_cache.retain(|_, boundaries| {
            boundaries.retain(|&b| arena.position(b).is_some());
            !boundaries.is_empty()
        });
    }

    /// Distinct wakeables this root still holds bookkeeping for.
    pub(crate) fn tracked_wakeables(&self) -> usize {
        let mut all: HashSet<Wakeable> = self.ping_cache.keys().copied().collect();
        all.extend(self.retry_cache.keys().copied());
        all.extend(self.resolved.iter().copied());
        all.len()
    }

    /// Nearest ancestor of `from` (inclusive) that is an error boundary not
    /// already showing its fallback.
    pub(crate) fn find_error_boundary(&self, from: Option<FiberId>) -> Option<FiberId> {
        let mut node = from;
        while let Some(id) = node {
            if matches!(self.arena.kind(id), FiberKind::ErrorBoundary(_))
                && !self.arena[id].showing_fallback
            {
                return Some(id);
            }
            node = self.arena[id].return_fiber;
        }
        None
    }
}
