#![forbid(unsafe_code)]

//! Begin phase: compute a fiber's new children, or bail out.
//!
//! A fiber bails out when its props are referentially unchanged, it has no
//! work in the render lanes, and it is not re-rendering after a capture. A
//! bailed-out fiber with no work below it returns no child, so its whole
//! subtree is skipped; otherwise its children are cloned unchanged and the
//! walk continues into them.

use std::rc::Rc;

use arbor_core::{
    BoundaryType, CapturedError, ComponentType, EffectKind, Element, ElementType, FiberHandle,
    FiberId, FiberKind, FiberProps, Flags, HostConfig, Key, Lanes, Node, Props, RenderCx,
    StateValue, Thrown,
};

use crate::child_reconciler::ChildReconciler;
use crate::work_loop::RenderPass;

/// Key of the fragment wrapping a boundary's primary children.
pub(crate) const PRIMARY_KEY: &str = "primary";
/// Key of the fragment wrapping a boundary's fallback.
pub(crate) const FALLBACK_KEY: &str = "fallback";

/// Wrap boundary content in a keyed fragment so switching between primary
/// and fallback replaces the subtree instead of diffing one against the
/// other.
fn boundary_branch(key: &str, children: Node) -> Node {
    Node::Element(Rc::new(Element {
        ty: ElementType::Fragment,
        key: Some(Key::from(key)),
        props: Rc::new(Props {
            children,
            ..Props::default()
        }),
    }))
}

fn state_as_node(state: Option<&StateValue>) -> Node {
    state
        .and_then(|s| s.downcast_ref::<Node>())
        .cloned()
        .unwrap_or_default()
}

impl<H: HostConfig> RenderPass<'_, H> {
    /// Begin `wip` and return the next fiber to work on.
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<Option<FiberId>, Thrown> {
        let render_lanes = self.work.entangled_lanes;

        if let Some(cur) = current {
            let arena = &self.root.arena;
            let unchanged = arena[cur].memoized_props.same(&arena[wip].pending_props);
            let has_work = arena[cur].lanes.includes_some(render_lanes);
            let captured = arena[wip].flags.contains(Flags::DID_CAPTURE);
            if unchanged && !has_work && !captured {
                return Ok(self.bailout_on_already_finished_work(wip));
            }
        }

        self.root.arena[wip].lanes = Lanes::NONE;
        let kind = self.root.arena.kind(wip).clone();
        match kind {
            FiberKind::HostRoot => Ok(self.update_host_root(current, wip)),
            FiberKind::HostComponent(_) => {
                let children = self.root.arena[wip]
                    .pending_props
                    .as_element()
                    .map(|p| p.children.clone())
                    .unwrap_or_default();
                Ok(self.reconcile_children(current, wip, &children))
            }
            FiberKind::HostText => Ok(None),
            FiberKind::Fragment => {
                let children = match &self.root.arena[wip].pending_props {
                    FiberProps::Children(node) => node.clone(),
                    _ => Node::Empty,
                };
                Ok(self.reconcile_children(current, wip, &children))
            }
            FiberKind::FunctionComponent(ty) => self.update_function_component(current, wip, &ty),
            FiberKind::Suspense => Ok(self.update_suspense(current, wip)),
            FiberKind::ErrorBoundary(ty) => Ok(self.update_error_boundary(current, wip, &ty)),
        }
    }

    fn bailout_on_already_finished_work(&mut self, wip: FiberId) -> Option<FiberId> {
        if !self.root.arena[wip]
            .child_lanes
            .includes_some(self.work.entangled_lanes)
        {
            return None;
        }
        self.clone_child_fibers(wip);
        self.root.arena[wip].child
    }

    /// Give `wip` work-in-progress copies of its current children.
    fn clone_child_fibers(&mut self, wip: FiberId) {
        let arena = &mut self.root.arena;
        let Some(first) = arena[wip].child else {
            return;
        };

        let props = arena[first].pending_props.clone();
        let new_first = arena.clone_for_work(first, props);
        arena[new_first].return_fiber = Some(wip);
        arena[wip].child = Some(new_first);

        let mut current_child = first;
        let mut previous = new_first;
        while let Some(next) = arena[current_child].sibling {
            current_child = next;
            let props = arena[next].pending_props.clone();
            let clone = arena.clone_for_work(next, props);
            arena[clone].return_fiber = Some(wip);
            arena[previous].sibling = Some(clone);
            previous = clone;
        }
        arena[previous].sibling = None;
    }

    fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        next: &Node,
    ) -> Option<FiberId> {
        let current_first = current.and_then(|c| self.root.arena[c].child);
        let lanes = self.work.entangled_lanes;
        let first = ChildReconciler::new(&mut self.root.arena, lanes, current.is_some())
            .reconcile_child_fibers(wip, current_first, next);
        self.root.arena[wip].child = first;
        first
    }

    /// Fold pending and base updates for the render lanes into
    /// `memoized_state`. Skipped lanes stay on the fiber.
    fn process_update_queue(&mut self, wip: FiberId) {
        let lanes = self.work.entangled_lanes;
        let arena = &mut self.root.arena;
        arena.merge_pending_updates(wip);
        let fiber = &mut arena[wip];
        let processed = fiber.update_queue.process(lanes);
        fiber.memoized_state = processed.state;
        fiber.lanes = processed.skipped;
    }

    // =========================================================================
    // Per-kind work
    // =========================================================================

    fn update_host_root(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let prev = state_as_node(
            current
                .and_then(|c| self.root.arena[c].memoized_state.as_ref())
                .or(self.root.arena[wip].memoized_state.as_ref()),
        );
        self.process_update_queue(wip);

        let fiber = &mut self.root.arena[wip];
        let captured = fiber.flags.contains(Flags::DID_CAPTURE);
        fiber.flags.remove(Flags::DID_CAPTURE);
        let next = state_as_node(fiber.memoized_state.as_ref());

        if !captured && next.same(&prev) {
            return self.bailout_on_already_finished_work(wip);
        }
        self.reconcile_children(current, wip, &next)
    }

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &ComponentType,
    ) -> Result<Option<FiberId>, Thrown> {
        self.process_update_queue(wip);

        let props = self.root.arena[wip]
            .pending_props
            .as_element()
            .cloned()
            .unwrap_or_default();
        let state = self.root.arena[wip].memoized_state.clone();
        let handle = FiberHandle {
            root: self.root_id,
            position: wip.position,
        };

        let mut cx = RenderCx::new(handle, state.as_ref(), self.work.entangled_lanes);
        let children = ty.render(&props, &mut cx)?;
        let effects = cx.into_effects();

        let fiber = &mut self.root.arena[wip];
        fiber.flags.remove(Flags::UNMOUNT_STATIC);
        for effect in &effects {
            fiber.flags |= match effect.kind {
                EffectKind::Snapshot => Flags::SNAPSHOT,
                EffectKind::Layout => Flags::CALLBACK,
                EffectKind::Passive => Flags::PASSIVE,
                EffectKind::Unmount => Flags::UNMOUNT_STATIC,
            };
        }
        fiber.effects = effects;

        Ok(self.reconcile_children(current, wip, &children))
    }

    fn update_suspense(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let fiber = &mut self.root.arena[wip];
        let props = fiber.pending_props.as_element().cloned().unwrap_or_default();
        let show_fallback = fiber.flags.contains(Flags::DID_CAPTURE);
        fiber.flags.remove(Flags::DID_CAPTURE);
        fiber.showing_fallback = show_fallback;

        let next = if show_fallback {
            boundary_branch(FALLBACK_KEY, props.fallback.clone().unwrap_or_default())
        } else {
            boundary_branch(PRIMARY_KEY, props.children.clone())
        };
        self.reconcile_children(current, wip, &next)
    }

    fn update_error_boundary(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &BoundaryType,
    ) -> Option<FiberId> {
        self.process_update_queue(wip);

        let fiber = &mut self.root.arena[wip];
        let props = fiber.pending_props.as_element().cloned().unwrap_or_default();
        let captured = fiber
            .memoized_state
            .as_ref()
            .and_then(|s| s.downcast_ref::<CapturedError>())
            .map(|c| c.0.clone());
        fiber.showing_fallback = captured.is_some();

        let next = match captured {
            Some(error) => boundary_branch(FALLBACK_KEY, ty.fallback(&error)),
            None => boundary_branch(PRIMARY_KEY, props.children.clone()),
        };
        self.reconcile_children(current, wip, &next)
    }
}
