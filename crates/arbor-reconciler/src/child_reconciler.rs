#![forbid(unsafe_code)]

//! Child reconciliation: diff a parent's current children against a new
//! child description and produce the work-in-progress child list.
//!
//! ```text
//!   current:  A ─ B ─ C          new: [C, A, B]
//!   pass 1:   A vs C  key mismatch → stop
//!   pass 2:   map {a: A, b: B, c: C}
//!             C reused (old idx 2, last placed = 2)
//!             A reused (old idx 0 < 2 → PLACEMENT)
//!             B reused (old idx 1 < 2 → PLACEMENT)
//! ```
//!
//! # Invariants
//!
//! - A reused child keeps its position; a created child gets a new one.
//! - Unused old children are recorded as deletions on the parent, in old
//!   sibling order, only when side effects are tracked.
//! - With duplicate keys the first occurrence wins and later ones are
//!   created fresh.
//! - Every produced child has `return_fiber` set to the parent and `index`
//!   set to its new slot.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use arbor_core::{
    Element, ElementType, FiberArena, FiberId, FiberKind, FiberProps, Flags, Key, Lanes, Node,
    PositionKey,
};

/// Lookup key for the keyed phase of array reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Keyed(Key),
    Indexed(usize),
}

impl SlotKey {
    fn of(key: Option<&Key>, index: usize) -> Self {
        match key {
            Some(key) => Self::Keyed(key.clone()),
            None => Self::Indexed(index),
        }
    }
}

/// Props a fiber created from `el` starts with.
fn props_for(el: &Element) -> FiberProps {
    match el.ty {
        ElementType::Fragment => FiberProps::Children(el.props.children.clone()),
        _ => FiberProps::Element(el.props.clone()),
    }
}

/// Diffs one parent's children.
pub(crate) struct ChildReconciler<'a, I> {
    arena: &'a mut FiberArena<I>,
    lanes: Lanes,
    track_side_effects: bool,
}

impl<'a, I> ChildReconciler<'a, I> {
    /// `track_side_effects` is false when mounting a parent that has no
    /// current buffer: nothing can be placed or deleted relative to it.
    pub(crate) fn new(arena: &'a mut FiberArena<I>, lanes: Lanes, track_side_effects: bool) -> Self {
        Self {
            arena,
            lanes,
            track_side_effects,
        }
    }

    /// Reconcile `return_fiber`'s children and return the first new child.
    pub(crate) fn reconcile_child_fibers(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        new_child: &Node,
    ) -> Option<FiberId> {
        // An unkeyed fragment at the top level is transparent.
        let new_child = match new_child {
            Node::Element(el) if matches!(el.ty, ElementType::Fragment) && el.key.is_none() => {
                &el.props.children
            }
            other => other,
        };

        match new_child {
            Node::Element(el) => {
                let fiber = self.reconcile_single_element(return_fiber, current_first, el);
                Some(self.place_single_child(fiber))
            }
            Node::Text(text) => {
                let fiber = self.reconcile_single_text(return_fiber, current_first, text);
                Some(self.place_single_child(fiber))
            }
            Node::List(items) => self.reconcile_children_array(return_fiber, current_first, items),
            Node::Empty => {
                self.delete_remaining_children(return_fiber, current_first);
                None
            }
        }
    }

    // =========================================================================
    // Deletion and placement
    // =========================================================================

    fn delete_child(&mut self, return_fiber: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        let parent = &mut self.arena[return_fiber];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, return_fiber: FiberId, first: Option<FiberId>) {
        if !self.track_side_effects {
            return;
        }
        let mut child = first;
        while let Some(c) = child {
            self.delete_child(return_fiber, c);
            child = self.arena[c].sibling;
        }
    }

    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if self.track_side_effects && self.arena.alternate(fiber).is_none() {
            self.arena[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    /// Record the new index and decide whether the child moves. Returns the
    /// updated last placed index.
    fn place_child(&mut self, fiber: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        self.arena[fiber].index = new_index;
        if !self.track_side_effects {
            return last_placed_index;
        }
        match self.arena.alternate(fiber) {
            Some(current) => {
                let old_index = self.arena[current].index;
                if old_index < last_placed_index {
                    self.arena[fiber].flags |= Flags::PLACEMENT;
                    last_placed_index
                } else {
                    old_index
                }
            }
            None => {
                self.arena[fiber].flags |= Flags::PLACEMENT;
                last_placed_index
            }
        }
    }

    // =========================================================================
    // Fiber creation and reuse
    // =========================================================================

    fn use_fiber(&mut self, current: FiberId, props: FiberProps, return_fiber: FiberId) -> FiberId {
        let clone = self.arena.clone_for_work(current, props);
        let fiber = &mut self.arena[clone];
        fiber.index = 0;
        fiber.sibling = None;
        fiber.return_fiber = Some(return_fiber);
        clone
    }

    fn create(
        &mut self,
        kind: FiberKind,
        key: Option<Key>,
        props: FiberProps,
        return_fiber: FiberId,
    ) -> FiberId {
        let id = self
            .arena
            .create(kind, key, Some(return_fiber.position), props);
        let fiber = &mut self.arena[id];
        fiber.lanes = self.lanes;
        fiber.return_fiber = Some(return_fiber);
        id
    }

    fn create_from_element(&mut self, el: &Element, return_fiber: FiberId) -> FiberId {
        self.create(
            FiberKind::from_element_type(&el.ty),
            el.key.clone(),
            props_for(el),
            return_fiber,
        )
    }

    fn create_text(&mut self, text: &Rc<str>, return_fiber: FiberId) -> FiberId {
        self.create(
            FiberKind::HostText,
            None,
            FiberProps::Text(text.clone()),
            return_fiber,
        )
    }

    fn create_child(&mut self, return_fiber: FiberId, node: &Node) -> Option<FiberId> {
        match node {
            Node::Text(text) => Some(self.create_text(text, return_fiber)),
            Node::Element(el) => Some(self.create_from_element(el, return_fiber)),
            Node::List(_) => Some(self.create(
                FiberKind::Fragment,
                None,
                FiberProps::Children(node.clone()),
                return_fiber,
            )),
            Node::Empty => None,
        }
    }

    // =========================================================================
    // Single child
    // =========================================================================

    fn reconcile_single_element(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        el: &Element,
    ) -> FiberId {
        let mut child = current_first;
        while let Some(c) = child {
            let next = self.arena[c].sibling;
            if self.arena.key(c) == el.key.as_ref() {
                if self.arena.kind(c).matches(&el.ty) {
                    self.delete_remaining_children(return_fiber, next);
                    return self.use_fiber(c, props_for(el), return_fiber);
                }
                // Same key, different type: nothing after it can match.
                self.delete_remaining_children(return_fiber, Some(c));
                break;
            }
            self.delete_child(return_fiber, c);
            child = next;
        }
        self.create_from_element(el, return_fiber)
    }

    fn reconcile_single_text(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        if let Some(c) = current_first
            && matches!(self.arena.kind(c), FiberKind::HostText)
        {
            let next = self.arena[c].sibling;
            self.delete_remaining_children(return_fiber, next);
            return self.use_fiber(c, FiberProps::Text(text.clone()), return_fiber);
        }
        self.delete_remaining_children(return_fiber, current_first);
        self.create_text(text, return_fiber)
    }

    // =========================================================================
    // Slot updates
    // =========================================================================

    fn update_text(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        match current {
            Some(c) if matches!(self.arena.kind(c), FiberKind::HostText) => {
                self.use_fiber(c, FiberProps::Text(text.clone()), return_fiber)
            }
            _ => self.create_text(text, return_fiber),
        }
    }

    fn update_fragment(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        children: Node,
        key: Option<Key>,
    ) -> FiberId {
        match current {
            Some(c) if matches!(self.arena.kind(c), FiberKind::Fragment) => {
                self.use_fiber(c, FiberProps::Children(children), return_fiber)
            }
            _ => self.create(
                FiberKind::Fragment,
                key,
                FiberProps::Children(children),
                return_fiber,
            ),
        }
    }

    fn update_element(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        el: &Element,
    ) -> FiberId {
        if matches!(el.ty, ElementType::Fragment) {
            return self.update_fragment(
                return_fiber,
                current,
                el.props.children.clone(),
                el.key.clone(),
            );
        }
        match current {
            Some(c) if self.arena.kind(c).matches(&el.ty) => {
                self.use_fiber(c, props_for(el), return_fiber)
            }
            _ => self.create_from_element(el, return_fiber),
        }
    }

    /// Update the old fiber in the same slot if the keys agree. `None` means
    /// the keys differ and the in-order pass must stop.
    fn update_slot(
        &mut self,
        return_fiber: FiberId,
        old: Option<FiberId>,
        new_child: &Node,
    ) -> Option<FiberId> {
        let key = old.and_then(|o| self.arena.key(o).cloned());
        match new_child {
            Node::Text(text) => {
                if key.is_some() {
                    return None;
                }
                Some(self.update_text(return_fiber, old, text))
            }
            Node::Element(el) => {
                if el.key != key {
                    return None;
                }
                Some(self.update_element(return_fiber, old, el))
            }
            Node::List(_) => {
                if key.is_some() {
                    return None;
                }
                Some(self.update_fragment(return_fiber, old, new_child.clone(), None))
            }
            Node::Empty => None,
        }
    }

    fn update_from_map(
        &mut self,
        existing: &HashMap<SlotKey, FiberId>,
        return_fiber: FiberId,
        new_index: usize,
        new_child: &Node,
    ) -> Option<(FiberId, SlotKey)> {
        match new_child {
            Node::Text(text) => {
                let slot = SlotKey::Indexed(new_index);
                let matched = existing.get(&slot).copied();
                Some((self.update_text(return_fiber, matched, text), slot))
            }
            Node::Element(el) => {
                let slot = SlotKey::of(el.key.as_ref(), new_index);
                let matched = existing.get(&slot).copied();
                Some((self.update_element(return_fiber, matched, el), slot))
            }
            Node::List(_) => {
                let slot = SlotKey::Indexed(new_index);
                let matched = existing.get(&slot).copied();
                let fiber = self.update_fragment(return_fiber, matched, new_child.clone(), None);
                Some((fiber, slot))
            }
            Node::Empty => None,
        }
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    fn reconcile_children_array(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        items: &[Node],
    ) -> Option<FiberId> {
        #[cfg(debug_assertions)]
        warn_on_duplicate_keys(items);

        let mut first: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut link = |arena: &mut FiberArena<I>, fiber: FiberId| {
            match previous {
                Some(prev) => arena[prev].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            previous = Some(fiber);
        };

        let mut old_fiber = current_first;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        // Pass 1: walk old and new in step while keys agree.
        while let Some(old) = old_fiber {
            if new_index >= items.len() {
                break;
            }
            let (slot_old, next_old) = if self.arena[old].index > new_index {
                // A hole in the old list: compare the new item against nothing.
                (None, Some(old))
            } else {
                (Some(old), self.arena[old].sibling)
            };
            let Some(new_fiber) = self.update_slot(return_fiber, slot_old, &items[new_index]) else {
                break;
            };
            if let Some(o) = slot_old
                && self.arena.alternate(new_fiber).is_none()
            {
                // The slot matched by key but the type changed.
                self.delete_child(return_fiber, o);
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
            link(self.arena, new_fiber);
            old_fiber = next_old;
            new_index += 1;
        }

        if new_index == items.len() {
            self.delete_remaining_children(return_fiber, old_fiber);
            return first;
        }

        if old_fiber.is_none() {
            for (i, item) in items.iter().enumerate().skip(new_index) {
                if let Some(fiber) = self.create_child(return_fiber, item) {
                    last_placed_index = self.place_child(fiber, last_placed_index, i);
                    link(self.arena, fiber);
                }
            }
            return first;
        }

        // Pass 2: look the remaining old children up by key or index.
        let mut remaining = Vec::new();
        let mut existing: HashMap<SlotKey, FiberId> = HashMap::new();
        let mut cursor = old_fiber;
        while let Some(c) = cursor {
            let slot = SlotKey::of(self.arena.key(c), self.arena[c].index);
            existing.entry(slot).or_insert(c);
            remaining.push(c);
            cursor = self.arena[c].sibling;
        }

        let mut reused: HashSet<PositionKey> = HashSet::new();
        for (i, item) in items.iter().enumerate().skip(new_index) {
            let Some((fiber, slot)) = self.update_from_map(&existing, return_fiber, i, item) else {
                continue;
            };
            if self.arena.alternate(fiber).is_some() {
                existing.remove(&slot);
                reused.insert(fiber.position);
            }
            last_placed_index = self.place_child(fiber, last_placed_index, i);
            link(self.arena, fiber);
        }

        for old in remaining {
            if !reused.contains(&old.position) {
                self.delete_child(return_fiber, old);
            }
        }
        first
    }
}

#[cfg(debug_assertions)]
fn warn_on_duplicate_keys(items: &[Node]) {
    let mut seen = HashSet::new();
    for key in items.iter().filter_map(Node::key) {
        if !seen.insert(key) {
            tracing::warn!(key = key.as_str(), "duplicate key among siblings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{host, list, text};

    fn setup() -> (FiberArena<u32>, FiberId) {
        let mut arena = FiberArena::new();
        let root = arena.create(FiberKind::HostRoot, None, None, FiberProps::Empty);
        (arena, root)
    }

    fn keyed(keys: &[&str]) -> Node {
        list(keys.iter().map(|k| host("li").key(*k).build()))
    }

    fn mount(arena: &mut FiberArena<u32>, parent: FiberId, node: &Node) {
        let first = ChildReconciler::new(arena, Lanes::DEFAULT, false)
            .reconcile_child_fibers(parent, None, node);
        arena[parent].child = first;
    }

    fn update(arena: &mut FiberArena<u32>, current: FiberId, node: &Node) -> FiberId {
        let wip = arena.clone_for_work(current, FiberProps::Empty);
        let current_first = arena[current].child;
        let first = ChildReconciler::new(arena, Lanes::DEFAULT, true)
            .reconcile_child_fibers(wip, current_first, node);
        arena[wip].child = first;
        wip
    }

    fn child_keys(arena: &FiberArena<u32>, parent: FiberId) -> Vec<String> {
        arena
            .children(parent)
            .map(|c| arena.key(c).map(|k| k.as_str().to_string()).unwrap_or_default())
            .collect()
    }

    fn placed(arena: &FiberArena<u32>, parent: FiberId) -> Vec<String> {
        arena
            .children(parent)
            .filter(|c| arena[*c].flags.contains(Flags::PLACEMENT))
            .map(|c| arena.key(c).map(|k| k.as_str().to_string()).unwrap_or_default())
            .collect()
    }

    // =========================================================================
    // Mounting
    // =========================================================================

    #[test]
    fn mount_does_not_flag_placement() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["a", "b"]));
        assert_eq!(child_keys(&arena, root), vec!["a", "b"]);
        assert!(placed(&arena, root).is_empty());
        for (i, c) in arena.children(root).enumerate() {
            assert_eq!(arena[c].index, i);
            assert_eq!(arena[c].return_fiber, Some(root));
            assert_eq!(arena[c].lanes, Lanes::DEFAULT);
        }
    }

    #[test]
    fn unkeyed_top_level_fragment_is_transparent() {
        let (mut arena, root) = setup();
        let node = arbor_core::fragment().child(host("a").build()).child(host("b").build()).build();
        mount(&mut arena, root, &node);
        let kinds: Vec<&str> = arena.children(root).map(|c| arena.kind(c).label()).collect();
        assert_eq!(kinds, vec!["a", "b"]);
    }

    // =========================================================================
    // Keyed moves
    // =========================================================================

    #[test]
    fn rotate_right_places_only_moved_children() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["a", "b", "c"]));
        let old: Vec<PositionKey> = arena.children(root).map(|c| c.position).collect();

        let wip = update(&mut arena, root, &keyed(&["c", "a", "b"]));
        assert_eq!(child_keys(&arena, wip), vec!["c", "a", "b"]);
        assert_eq!(placed(&arena, wip), vec!["a", "b"]);
        assert!(arena[wip].deletions.is_empty());

        // Every child kept its position.
        let mut new: Vec<PositionKey> = arena.children(wip).map(|c| c.position).collect();
        new.sort();
        let mut old_sorted = old;
        old_sorted.sort();
        assert_eq!(new, old_sorted);
    }

    #[test]
    fn removal_is_recorded_as_deletion() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["a", "b", "c"]));
        let b = arena.children(root).nth(1).map(|c| c.position);

        let wip = update(&mut arena, root, &keyed(&["a", "c"]));
        assert!(arena[wip].flags.contains(Flags::CHILD_DELETION));
        let deleted: Vec<PositionKey> = arena[wip].deletions.iter().map(|d| d.position).collect();
        assert_eq!(deleted.first().copied(), b);
        assert_eq!(deleted.len(), 1);
        assert!(placed(&arena, wip).is_empty());
    }

    #[test]
    fn appended_child_is_placed() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["a"]));
        let wip = update(&mut arena, root, &keyed(&["a", "b"]));
        assert_eq!(placed(&arena, wip), vec!["b"]);
    }

    #[test]
    fn type_change_replaces_fiber() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &host("div").build());
        let wip = update(&mut arena, root, &host("span").build());
        assert_eq!(arena[wip].deletions.len(), 1);
        let child = arena[wip].child.map(|c| arena.kind(c).label().to_string());
        assert_eq!(child.as_deref(), Some("span"));
        assert_eq!(placed(&arena, wip), vec![String::new()]);
    }

    #[test]
    fn duplicate_keys_first_wins_rest_are_new() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["x", "y"]));
        let x = arena.children(root).next().map(|c| c.position);

        let wip = update(&mut arena, root, &keyed(&["y", "x", "x"]));
        let children: Vec<FiberId> = arena.children(wip).collect();
        assert_eq!(children.len(), 3);
        assert_eq!(Some(children[1].position), x);
        assert!(arena.alternate(children[2]).is_none());
    }

    // =========================================================================
    // Text and empties
    // =========================================================================

    #[test]
    fn text_reuses_text_fiber() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &text("one"));
        let before = arena[root].child;
        let wip = update(&mut arena, root, &text("two"));
        assert_eq!(arena[wip].child.map(|c| c.position), before.map(|c| c.position));
        assert!(arena[wip].deletions.is_empty());
    }

    #[test]
    fn empty_deletes_everything() {
        let (mut arena, root) = setup();
        mount(&mut arena, root, &keyed(&["a", "b"]));
        let wip = update(&mut arena, root, &Node::Empty);
        assert_eq!(arena[wip].child, None);
        assert_eq!(arena[wip].deletions.len(), 2);
    }

    #[test]
    fn nested_list_becomes_fragment() {
        let (mut arena, root) = setup();
        let node = list([text("a"), list([text("b"), text("c")])]);
        mount(&mut arena, root, &node);
        let kinds: Vec<&str> = arena.children(root).map(|c| arena.kind(c).label()).collect();
        assert_eq!(kinds, vec!["#text", "#fragment"]);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

        fn key_list() -> impl Strategy<Value = Vec<&'static str>> {
            proptest::sample::subsequence(KEYS.to_vec(), 0..=KEYS.len()).prop_shuffle()
        }

        proptest! {
            #[test]
            fn keyed_diff_reaches_target(old in key_list(), new in key_list()) {
                let (mut arena, root) = setup();
                mount(&mut arena, root, &keyed(&old));
                let old_index: HashMap<String, usize> = child_keys(&arena, root)
                    .into_iter()
                    .enumerate()
                    .map(|(i, k)| (k, i))
                    .collect();

                let wip = update(&mut arena, root, &keyed(&new));
                let expected: Vec<String> = new.iter().map(|k| k.to_string()).collect();
                prop_assert_eq!(child_keys(&arena, wip), expected);

                let deleted: HashSet<String> = arena[wip]
                    .deletions
                    .iter()
                    .filter_map(|d| arena.key(*d))
                    .map(|k| k.as_str().to_string())
                    .collect();
                let dropped: HashSet<String> = old
                    .iter()
                    .filter(|k| !new.contains(k))
                    .map(|k| k.to_string())
                    .collect();
                prop_assert_eq!(deleted, dropped);

                // Children that are not moved keep their old relative order.
                let stayed: Vec<usize> = arena
                    .children(wip)
                    .filter(|c| !arena[*c].flags.contains(Flags::PLACEMENT))
                    .filter_map(|c| arena.key(c))
                    .map(|k| old_index[k.as_str()])
                    .collect();
                prop_assert!(stayed.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
