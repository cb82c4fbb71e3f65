#![forbid(unsafe_code)]

//! Fiber arena with two buffers per tree position.
//!
//! Every tree position owns two buffer slots. The buffer reachable from a
//! root's current tree is "current"; the other slot holds the
//! work-in-progress copy (or a stale copy waiting to be reused). A
//! [`FiberId`] names one buffer: a position plus a slot. The alternate of a
//! buffer is simply the other slot of the same position, so no pointer
//! cycle exists between the two.
//!
//! ```text
//!   Position ─┬─ kind, key, parent        (shared by both buffers)
//!             ├─ state_node               (host instance, shared)
//!             ├─ pending updates          (shared)
//!             └─ buffers: [Slot A, Slot B]
//! ```
//!
//! # Invariants
//!
//! - A position never holds more than two buffers.
//! - Both buffers of a position have the same kind and key, because those
//!   live on the position itself.
//! - [`FiberArena::clone_for_work`] reuses the other slot when it is
//!   occupied and allocates only when it is empty.
//! - Positions unreachable from the current trees are reclaimed only by
//!   [`FiberArena::sweep`].
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Stale `FiberId` indexed | Position swept | Panics with the id |
//! | Stale `FiberHandle` used | Position swept | `try_*` accessors return `None` |

use std::collections::HashSet;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::cx::Effect;
use crate::element::{BoundaryType, ComponentType, ElementType, Key, Node, Props};
use crate::flags::Flags;
use crate::id::PositionKey;
use crate::lane::{Lane, Lanes};
use crate::update_queue::{StateValue, Update, UpdateQueue};
use crate::wakeable::Wakeable;

// =============================================================================
// Kinds and props
// =============================================================================

/// Closed set of fiber kinds.
#[derive(Clone)]
pub enum FiberKind {
    HostRoot,
    HostComponent(Rc<str>),
    HostText,
    Fragment,
    FunctionComponent(ComponentType),
    Suspense,
    ErrorBoundary(BoundaryType),
}

impl FiberKind {
    pub fn from_element_type(ty: &ElementType) -> Self {
        match ty {
            ElementType::Host(tag) => Self::HostComponent(tag.clone()),
            ElementType::Component(c) => Self::FunctionComponent(c.clone()),
            ElementType::Fragment => Self::Fragment,
            ElementType::Suspense => Self::Suspense,
            ElementType::ErrorBoundary(b) => Self::ErrorBoundary(b.clone()),
        }
    }

    /// True if an element of type `ty` can reuse a fiber of this kind.
    pub fn matches(&self, ty: &ElementType) -> bool {
        match (self, ty) {
            (Self::HostComponent(a), ElementType::Host(b)) => a == b,
            (Self::FunctionComponent(a), ElementType::Component(b)) => a.same(b),
            (Self::Fragment, ElementType::Fragment) => true,
            (Self::Suspense, ElementType::Suspense) => true,
            (Self::ErrorBoundary(a), ElementType::ErrorBoundary(b)) => a.same(b),
            _ => false,
        }
    }

    /// Host components and text own a host instance.
    pub fn is_host(&self) -> bool {
        matches!(self, Self::HostComponent(_) | Self::HostText)
    }

    /// Fibers whose host instance (or container) can parent other host
    /// instances.
    pub fn is_host_parent(&self) -> bool {
        matches!(self, Self::HostComponent(_) | Self::HostRoot)
    }

    pub fn label(&self) -> &str {
        match self {
            Self::HostRoot => "#root",
            Self::HostComponent(tag) => tag,
            Self::HostText => "#text",
            Self::Fragment => "#fragment",
            Self::FunctionComponent(c) => c.name(),
            Self::Suspense => "#suspense",
            Self::ErrorBoundary(b) => b.name(),
        }
    }
}

impl fmt::Debug for FiberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberKind({})", self.label())
    }
}

/// Props as stored on a fiber.
#[derive(Debug, Clone, Default)]
pub enum FiberProps {
    #[default]
    Empty,
    Element(Rc<Props>),
    Text(Rc<str>),
    /// Children of a fragment.
    Children(Node),
}

impl FiberProps {
    /// Referential equality, used for bailout.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Element(a), Self::Element(b)) => Rc::ptr_eq(a, b),
            (Self::Text(a), Self::Text(b)) => Rc::ptr_eq(a, b),
            (Self::Children(a), Self::Children(b)) => a.same(b),
            _ => false,
        }
    }

    pub fn as_element(&self) -> Option<&Rc<Props>> {
        match self {
            Self::Element(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }
}

// =============================================================================
// Ids
// =============================================================================

/// Which of a position's two buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// One buffer of one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId {
    pub position: PositionKey,
    pub slot: Slot,
}

// =============================================================================
// Fiber
// =============================================================================

/// Mutable per-buffer state of a tree position.
#[derive(Debug, Clone, Default)]
pub struct Fiber {
    pub pending_props: FiberProps,
    pub memoized_props: FiberProps,
    pub memoized_state: Option<StateValue>,
    pub update_queue: UpdateQueue,
    /// Effects registered by the last render of this fiber.
    pub effects: Vec<Effect>,
    /// Suspense or error boundary is rendering its fallback.
    pub showing_fallback: bool,
    /// Wakeables a suspense boundary must retry on once committed.
    pub retry_queue: SmallVec<[Wakeable; 2]>,

    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub return_fiber: Option<FiberId>,
    /// Position among siblings.
    pub index: usize,

    pub flags: Flags,
    pub subtree_flags: Flags,
    /// Children to remove during commit.
    pub deletions: SmallVec<[FiberId; 2]>,

    pub lanes: Lanes,
    pub child_lanes: Lanes,
}

impl Fiber {
    fn new(props: FiberProps) -> Self {
        Self {
            pending_props: props,
            ..Self::default()
        }
    }
}

/// A tree position and its two buffers.
pub struct Position<I> {
    kind: FiberKind,
    key: Option<Key>,
    parent: Option<PositionKey>,
    state_node: Option<I>,
    pending: Vec<Update>,
    /// Transition lanes entangled through this position's queue.
    pub queue_lanes: Lanes,
    buffers: [Option<Fiber>; 2],
}

impl<I> Position<I> {
    pub fn kind(&self) -> &FiberKind {
        &self.kind
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn parent(&self) -> Option<PositionKey> {
        self.parent
    }

    pub fn state_node(&self) -> Option<&I> {
        self.state_node.as_ref()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Pool of fiber positions for one root.
pub struct FiberArena<I> {
    positions: SlotMap<PositionKey, Position<I>>,
    allocations: u64,
}

impl<I> Default for FiberArena<I> {
    fn default() -> Self {
        Self {
            positions: SlotMap::with_key(),
            allocations: 0,
        }
    }
}

impl<I> FiberArena<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a position with a single buffer in slot A.
    pub fn create(
        &mut self,
        kind: FiberKind,
        key: Option<Key>,
        parent: Option<PositionKey>,
        props: FiberProps,
    ) -> FiberId {
        self.allocations += 1;
        let position = self.positions.insert(Position {
            kind,
            key,
            parent,
            state_node: None,
            pending: Vec::new(),
            queue_lanes: Lanes::NONE,
            buffers: [Some(Fiber::new(props)), None],
        });
        FiberId {
            position,
            slot: Slot::A,
        }
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.try_fiber(id).is_some()
    }

    pub fn try_fiber(&self, id: FiberId) -> Option<&Fiber> {
        self.positions
            .get(id.position)
            .and_then(|p| p.buffers[id.slot.index()].as_ref())
    }

    pub fn position(&self, key: PositionKey) -> Option<&Position<I>> {
        self.positions.get(key)
    }

    pub fn position_mut(&mut self, key: PositionKey) -> Option<&mut Position<I>> {
        self.positions.get_mut(key)
    }

    fn pos(&self, id: FiberId) -> &Position<I> {
        match self.positions.get(id.position) {
            Some(p) => p,
            None => panic!("fiber {id:?} refers to a reclaimed position"),
        }
    }

    pub fn kind(&self, id: FiberId) -> &FiberKind {
        &self.pos(id).kind
    }

    pub fn key(&self, id: FiberId) -> Option<&Key> {
        self.pos(id).key.as_ref()
    }

    pub fn state_node(&self, id: FiberId) -> Option<&I> {
        self.pos(id).state_node.as_ref()
    }

    pub fn set_state_node(&mut self, id: FiberId, instance: I) {
        if let Some(p) = self.positions.get_mut(id.position) {
            p.state_node = Some(instance);
        }
    }

    /// The other buffer of the same position, if it exists.
    pub fn alternate(&self, id: FiberId) -> Option<FiberId> {
        let other = FiberId {
            position: id.position,
            slot: id.slot.other(),
        };
        self.contains(other).then_some(other)
    }

    /// Prepare a work-in-progress buffer from `current`.
    ///
    /// If the other slot is occupied its contents are overwritten in place;
    /// otherwise it is allocated. Either way the result mirrors `current`
    /// with non-static flags cleared and `props` as pending props.
    pub fn clone_for_work(&mut self, current: FiberId, props: FiberProps) -> FiberId {
        let src = &self[current];
        let fresh = Fiber {
            pending_props: props,
            memoized_props: src.memoized_props.clone(),
            memoized_state: src.memoized_state.clone(),
            update_queue: src.update_queue.clone(),
            effects: src.effects.clone(),
            showing_fallback: src.showing_fallback,
            retry_queue: SmallVec::new(),
            child: src.child,
            sibling: src.sibling,
            return_fiber: src.return_fiber,
            index: src.index,
            flags: src.flags & Flags::STATIC_MASK,
            subtree_flags: Flags::empty(),
            deletions: SmallVec::new(),
            lanes: src.lanes,
            child_lanes: src.child_lanes,
        };

        let other = current.slot.other();
        let position = &mut self.positions[current.position];
        let slot = &mut position.buffers[other.index()];
        if slot.is_none() {
            self.allocations += 1;
        }
        *slot = Some(fresh);
        FiberId {
            position: current.position,
            slot: other,
        }
    }

    /// Queue an update on a position, shared by both buffers.
    pub fn enqueue_update(&mut self, position: PositionKey, update: Update) -> bool {
        match self.positions.get_mut(position) {
            Some(p) => {
                p.pending.push(update);
                true
            }
            None => false,
        }
    }

    /// Move pending updates into the base queues of `wip` and, if present,
    /// its alternate, so an interrupted render cannot lose them.
    pub fn merge_pending_updates(&mut self, wip: FiberId) {
        let Some(position) = self.positions.get_mut(wip.position) else {
            return;
        };
        if position.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut position.pending);
        for buffer in position.buffers.iter_mut().flatten() {
            buffer.update_queue.base_updates.extend(pending.iter().cloned());
        }
    }

    /// Mark `lane` on a position and `child_lanes` on all its ancestors,
    /// on both buffers of each.
    pub fn mark_update_lane(&mut self, position: PositionKey, lane: Lane) -> bool {
        let Some(p) = self.positions.get_mut(position) else {
            return false;
        };
        for buffer in p.buffers.iter_mut().flatten() {
            buffer.lanes |= lane;
        }
        let mut parent = p.parent;
        while let Some(key) = parent {
            let Some(p) = self.positions.get_mut(key) else {
                break;
            };
            for buffer in p.buffers.iter_mut().flatten() {
                buffer.child_lanes |= lane;
            }
            parent = p.parent;
        }
        true
    }

    /// Iterate the children of a fiber in sibling order.
    pub fn children(&self, id: FiberId) -> Children<'_, I> {
        Children {
            arena: self,
            next: self[id].child,
        }
    }

    /// Reclaim every position not reachable from `roots`. Returns the number
    /// of positions removed.
    pub fn sweep(&mut self, roots: impl IntoIterator<Item = FiberId>) -> usize {
        let mut live = HashSet::with_capacity(self.positions.len());
        let mut stack: Vec<FiberId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.try_fiber(id) else {
                continue;
            };
            if !live.insert(id.position) {
                continue;
            }
            stack.extend(fiber.child);
            stack.extend(fiber.sibling);
        }
        let before = self.positions.len();
        self.positions.retain(|key, _| live.contains(&key));
        before - self.positions.len()
    }

    /// Number of live positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of live buffers across all positions.
    pub fn buffer_count(&self) -> usize {
        self.positions.values().map(Position::buffer_count).sum()
    }

    /// Total buffers ever allocated (in-place reuse does not count).
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn positions(&self) -> impl Iterator<Item = (PositionKey, &Position<I>)> {
        self.positions.iter()
    }
}

impl<I> Index<FiberId> for FiberArena<I> {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.try_fiber(id) {
            Some(f) => f,
            None => panic!("no fiber buffer at {id:?}"),
        }
    }
}

impl<I> IndexMut<FiberId> for FiberArena<I> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self
            .positions
            .get_mut(id.position)
            .and_then(|p| p.buffers[id.slot.index()].as_mut())
        {
            Some(f) => f,
            None => panic!("no fiber buffer at {id:?}"),
        }
    }
}

/// Iterator over a fiber's children.
pub struct Children<'a, I> {
    arena: &'a FiberArena<I>,
    next: Option<FiberId>,
}

impl<I> Iterator for Children<'_, I> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.next?;
        self.next = self.arena[id].sibling;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_arena() -> (FiberArena<u32>, FiberId) {
        let mut arena = FiberArena::new();
        let root = arena.create(FiberKind::HostRoot, None, None, FiberProps::Empty);
        (arena, root)
    }

    fn add_child(arena: &mut FiberArena<u32>, parent: FiberId, tag: &str) -> FiberId {
        let child = arena.create(
            FiberKind::HostComponent(Rc::from(tag)),
            None,
            Some(parent.position),
            FiberProps::Empty,
        );
        arena[child].return_fiber = Some(parent);
        let last = arena.children(parent).last();
        match last {
            Some(last) => arena[last].sibling = Some(child),
            None => arena[parent].child = Some(child),
        }
        child
    }

    // =========================================================================
    // Double buffering
    // =========================================================================

    #[test]
    fn first_clone_allocates_second_reuses() {
        let (mut arena, root) = root_arena();
        assert_eq!(arena.allocations(), 1);

        let wip = arena.clone_for_work(root, FiberProps::Empty);
        assert_eq!(wip.slot, Slot::B);
        assert_eq!(arena.allocations(), 2);
        assert_eq!(arena.alternate(wip), Some(root));
        assert_eq!(arena.alternate(root), Some(wip));

        // Render retried without a commit: same slot, no allocation.
        let again = arena.clone_for_work(root, FiberProps::Empty);
        assert_eq!(again, wip);
        assert_eq!(arena.allocations(), 2);

        // After a commit, wip is current and the old current is reused.
        let next = arena.clone_for_work(wip, FiberProps::Empty);
        assert_eq!(next, root);
        assert_eq!(arena.allocations(), 2);
        assert_eq!(arena.buffer_count(), 2);
    }

    #[test]
    fn alternate_of_fresh_fiber_is_none() {
        let (arena, root) = root_arena();
        assert_eq!(arena.alternate(root), None);
    }

    #[test]
    fn clone_keeps_only_static_flags() {
        let (mut arena, root) = root_arena();
        arena[root].flags = Flags::PLACEMENT | Flags::UNMOUNT_STATIC;
        arena[root].subtree_flags = Flags::UPDATE;
        arena[root].lanes = Lanes::DEFAULT;
        arena[root].deletions.push(root);

        let wip = arena.clone_for_work(root, FiberProps::Empty);
        assert_eq!(arena[wip].flags, Flags::UNMOUNT_STATIC);
        assert_eq!(arena[wip].subtree_flags, Flags::empty());
        assert_eq!(arena[wip].lanes, Lanes::DEFAULT);
        assert!(arena[wip].deletions.is_empty());
    }

    #[test]
    fn kind_and_key_shared_by_both_buffers() {
        let mut arena: FiberArena<u32> = FiberArena::new();
        let id = arena.create(
            FiberKind::HostText,
            Some(Key::from("k")),
            None,
            FiberProps::Empty,
        );
        let wip = arena.clone_for_work(id, FiberProps::Empty);
        assert_eq!(arena.key(id), arena.key(wip));
        assert_eq!(arena.kind(id).label(), arena.kind(wip).label());
    }

    // =========================================================================
    // Lanes and updates
    // =========================================================================

    #[test]
    fn mark_update_lane_bubbles_child_lanes() {
        let (mut arena, root) = root_arena();
        let div = add_child(&mut arena, root, "div");
        let span = add_child(&mut arena, div, "span");
        let root_wip = arena.clone_for_work(root, FiberProps::Empty);

        assert!(arena.mark_update_lane(span.position, Lanes::DEFAULT));
        assert_eq!(arena[span].lanes, Lanes::DEFAULT);
        assert_eq!(arena[div].child_lanes, Lanes::DEFAULT);
        assert_eq!(arena[root].child_lanes, Lanes::DEFAULT);
        assert_eq!(arena[root_wip].child_lanes, Lanes::DEFAULT);
        assert_eq!(arena[div].lanes, Lanes::NONE);
    }

    #[test]
    fn pending_updates_reach_both_buffers() {
        let (mut arena, root) = root_arena();
        let wip = arena.clone_for_work(root, FiberProps::Empty);
        arena.enqueue_update(root.position, Update::replace(Lanes::SYNC, Rc::new(1i32)));
        arena.merge_pending_updates(wip);
        assert_eq!(arena[wip].update_queue.base_updates.len(), 1);
        assert_eq!(arena[root].update_queue.base_updates.len(), 1);
    }

    // =========================================================================
    // Reclamation
    // =========================================================================

    #[test]
    fn sweep_reclaims_unreachable_positions() {
        let (mut arena, root) = root_arena();
        let a = add_child(&mut arena, root, "a");
        let b = add_child(&mut arena, root, "b");
        let _under_b = add_child(&mut arena, b, "c");
        assert_eq!(arena.len(), 4);

        // Unlink b.
        arena[a].sibling = None;
        assert_eq!(arena.sweep([root]), 2);
        assert_eq!(arena.len(), 2);
        assert!(!arena.contains(b));
        assert!(arena.contains(a));
    }

    #[test]
    fn children_iterates_in_order() {
        let (mut arena, root) = root_arena();
        let a = add_child(&mut arena, root, "a");
        let b = add_child(&mut arena, root, "b");
        assert_eq!(arena.children(root).collect::<Vec<_>>(), vec![a, b]);
    }
}
