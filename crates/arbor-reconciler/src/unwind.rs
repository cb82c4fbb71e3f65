#![forbid(unsafe_code)]

//! Throwing and unwinding.
//!
//! When a fiber's render fails, [`RenderPass::throw_exception`] marks it
//! incomplete and arranges for the nearest suitable boundary to capture:
//!
//! | Thrown | Boundary | Capture |
//! |--------|----------|---------|
//! | `Suspend(w)` | nearest suspense not showing its fallback | re-render with fallback, retry on `w` |
//! | `Suspend(w)` | none | render does not complete; lanes are parked |
//! | `Error(e)` | nearest error boundary not showing its fallback | re-render with fallback built from `e` |
//! | `Error(e)` | none | root renders nothing; `e` is reported as uncaught |
//!
//! Unwinding then walks up from the failed fiber. Ancestors below the
//! capturing boundary are marked incomplete and their partial output is
//! discarded; the boundary itself is begun again.

use std::rc::Rc;

use arbor_core::{
    CapturedError, FiberId, FiberKind, Flags, HostConfig, Lanes, Node, RenderError, Thrown,
    Update, Wakeable,
};

use crate::work_loop::{RenderPass, RootExitStatus, WorkInProgress};

impl<H: HostConfig> RenderPass<'_, H> {
    pub(crate) fn throw_exception(&mut self, source: FiberId, thrown: Thrown) {
        self.root.arena[source].flags |= Flags::INCOMPLETE;
        match thrown {
            Thrown::Suspend(wakeable) => self.throw_suspend(source, wakeable),
            Thrown::Error(error) => self.throw_error(source, error),
        }
    }

    fn throw_suspend(&mut self, source: FiberId, wakeable: Wakeable) {
        let lanes = self.work.lanes;
        tracing::debug!(?wakeable, %lanes, "render suspended");

        *self
            .root
            .ping_cache
            .entry(wakeable)
            .or_insert(Lanes::NONE) |= lanes;
        if self.root.resolved.contains(&wakeable) {
            self.work.pinged |= lanes;
        }

        let from = self.root.arena[source].return_fiber;
        let Some(boundary) = self.find_suspense_boundary(from) else {
            // Unwinding reaches the root and the render is abandoned.
            return;
        };

        let arena = &mut self.root.arena;
        let hides_content = arena
            .alternate(boundary)
            .is_some_and(|current| !arena[current].showing_fallback);
        if hides_content && lanes.includes_only_transitions() {
            self.work.suspend_with_delay();
        } else {
            self.work.suspend();
        }

        let fiber = &mut arena[boundary];
        fiber.flags |= Flags::SHOULD_CAPTURE;
        if !fiber.retry_queue.contains(&wakeable) {
            fiber.retry_queue.push(wakeable);
        }
    }

    fn throw_error(&mut self, source: FiberId, error: RenderError) {
        tracing::debug!(%error, "render error");
        self.work.error();

        let lane = self.work.lanes.highest_priority_lane();
        let from = self.root.arena[source].return_fiber;
        match self.root.find_error_boundary(from) {
            Some(boundary) => {
                let fiber = &mut self.root.arena[boundary];
                fiber
                    .update_queue
                    .push(Update::replace(lane, Rc::new(CapturedError(error))));
                fiber.flags |= Flags::SHOULD_CAPTURE;
                fiber.lanes |= lane;
            }
            None => {
                let Some(root_fiber) = self.work.root_fiber else {
                    return;
                };
                let fiber = &mut self.root.arena[root_fiber];
                fiber
                    .update_queue
                    .push(Update::replace(lane, Rc::new(Node::Empty)));
                fiber.flags |= Flags::SHOULD_CAPTURE;
                fiber.lanes |= lane;
                self.work.uncaught.push(error);
            }
        }
    }

    fn find_suspense_boundary(&self, from: Option<FiberId>) -> Option<FiberId> {
        let arena = &self.root.arena;
        let mut node = from;
        while let Some(id) = node {
            if matches!(arena.kind(id), FiberKind::Suspense) && !arena[id].showing_fallback {
                return Some(id);
            }
            node = arena[id].return_fiber;
        }
        None
    }

    /// Unwind an incomplete fiber. Returns the fiber itself if it captures
    /// and must be begun again.
    pub(crate) fn unwind_work(&mut self, wip: FiberId) -> Option<FiberId> {
        let fiber = &mut self.root.arena[wip];
        if !fiber.flags.contains(Flags::SHOULD_CAPTURE) {
            return None;
        }
        fiber.flags.remove(Flags::SHOULD_CAPTURE | Flags::INCOMPLETE);
        fiber.flags |= Flags::DID_CAPTURE;
        fiber.subtree_flags = Flags::empty();
        fiber.deletions.clear();
        Some(wip)
    }
}

impl WorkInProgress {
    fn suspend(&mut self) {
        if self.status == RootExitStatus::InProgress {
            self.status = RootExitStatus::Suspended;
        }
    }

    fn suspend_with_delay(&mut self) {
        if matches!(
            self.status,
            RootExitStatus::InProgress | RootExitStatus::Suspended | RootExitStatus::Errored
        ) {
            self.status = RootExitStatus::SuspendedWithDelay;
        }
    }

    fn error(&mut self) {
        if self.status != RootExitStatus::SuspendedWithDelay {
            self.status = RootExitStatus::Errored;
        }
    }
}
