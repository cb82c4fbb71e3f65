#![forbid(unsafe_code)]

//! Complete phase: create or diff host instances and bubble flags and lanes
//! up to the parent.

use std::rc::Rc;

use arbor_core::{FiberId, FiberKind, Flags, HostConfig, Lanes};

use crate::work_loop::RenderPass;

impl<H: HostConfig> RenderPass<'_, H> {
    pub(crate) fn complete_work(&mut self, current: Option<FiberId>, wip: FiberId) {
        let kind = self.root.arena.kind(wip).clone();
        match kind {
            FiberKind::HostComponent(tag) => self.complete_host_component(current, wip, &tag),
            FiberKind::HostText => self.complete_host_text(current, wip),
            FiberKind::Suspense => {
                let was_showing_fallback =
                    current.is_some_and(|c| self.root.arena[c].showing_fallback);
                let fiber = &mut self.root.arena[wip];
                if !fiber.retry_queue.is_empty() {
                    fiber.flags |= Flags::RETRY;
                }
                if fiber.showing_fallback != was_showing_fallback {
                    fiber.flags |= Flags::VISIBILITY;
                }
            }
            FiberKind::ErrorBoundary(_) | FiberKind::HostRoot => {
                self.root.arena[wip].flags.remove(Flags::DID_CAPTURE);
            }
            FiberKind::Fragment | FiberKind::FunctionComponent(_) => {}
        }
        self.bubble_properties(current, wip);
    }

    fn complete_host_component(&mut self, current: Option<FiberId>, wip: FiberId, tag: &Rc<str>) {
        let arena = &self.root.arena;
        let new_props = arena[wip]
            .memoized_props
            .as_element()
            .cloned()
            .unwrap_or_default();
        let existing = current.and_then(|c| arena.state_node(wip).cloned().map(|i| (c, i)));

        match existing {
            Some((cur, instance)) => {
                let old_props = arena[cur]
                    .memoized_props
                    .as_element()
                    .cloned()
                    .unwrap_or_default();
                if !Rc::ptr_eq(&old_props, &new_props)
                    && self.host.prepare_update(&instance, tag, &old_props, &new_props)
                {
                    self.root.arena[wip].flags |= Flags::UPDATE;
                }
            }
            None => {
                let instance = self.host.create_instance(tag, &new_props);
                self.append_all_children(&instance, wip);
                self.root.arena.set_state_node(wip, instance);
            }
        }
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) {
        let arena = &self.root.arena;
        let new_text = arena[wip].memoized_props.as_text().unwrap_or_default().to_string();
        let existing = current.and_then(|c| arena.state_node(wip).map(|_| c));

        match existing {
            Some(cur) => {
                if arena[cur].memoized_props.as_text() != Some(new_text.as_str()) {
                    self.root.arena[wip].flags |= Flags::UPDATE;
                }
            }
            None => {
                let instance = self.host.create_text_instance(&new_text);
                self.root.arena.set_state_node(wip, instance);
            }
        }
    }

    /// Append the nearest host descendants of `wip` to a freshly created
    /// instance.
    fn append_all_children(&mut self, parent: &H::Instance, wip: FiberId) {
        let arena = &self.root.arena;
        let Some(mut node) = arena[wip].child else {
            return;
        };
        loop {
            if arena.kind(node).is_host() {
                if let Some(instance) = arena.state_node(node) {
                    self.host.append_initial_child(parent, instance);
                }
            } else if let Some(child) = arena[node].child {
                node = child;
                continue;
            }
            loop {
                if let Some(sibling) = arena[node].sibling {
                    node = sibling;
                    break;
                }
                match arena[node].return_fiber {
                    Some(parent_fiber) if parent_fiber != wip => node = parent_fiber,
                    _ => return,
                }
            }
        }
    }

    /// Merge children's lanes and flags into `wip`.
    ///
    /// When `wip` bailed out its children are the current ones, so only
    /// their static flags carry over.
    pub(crate) fn bubble_properties(&mut self, current: Option<FiberId>, wip: FiberId) {
        let arena = &mut self.root.arena;
        let did_bailout = current.is_some_and(|c| arena[c].child == arena[wip].child);

        let mut child_lanes = Lanes::NONE;
        let mut subtree_flags = Flags::empty();
        let mut child = arena[wip].child;
        while let Some(c) = child {
            let fiber = &mut arena[c];
            child_lanes |= fiber.lanes | fiber.child_lanes;
            if did_bailout {
                subtree_flags |= (fiber.subtree_flags | fiber.flags) & Flags::STATIC_MASK;
            } else {
                subtree_flags |= fiber.subtree_flags | fiber.flags;
                fiber.return_fiber = Some(wip);
            }
            child = fiber.sibling;
        }

        let fiber = &mut arena[wip];
        fiber.subtree_flags |= subtree_flags;
        fiber.child_lanes = child_lanes;
    }
}
