#![forbid(unsafe_code)]

//! Render work loop.
//!
//! A render walks the work-in-progress tree depth first, one fiber per unit
//! of work. Concurrent renders check the host's yield signal between units;
//! sync renders do not. Work that yields keeps its place, and a later call
//! with the same lanes on the same root resumes it.
//!
//! ```text
//!   perform_unit_of_work(f)
//!     begin_work(f) ──► child? ── yes ──► next unit = child
//!                          │
//!                          no
//!                          ▼
//!     complete_unit_of_work(f)
//!       complete f, then sibling? ── yes ──► next unit = sibling
//!                          │
//!                          no ──► climb to parent and complete it
//! ```
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Render error, first time | Component returned an error | Retry once synchronously with all pending lanes |
//! | Render error, again | Retry failed too | Commit the captured result |
//! | Suspended at the shell | No suspense boundary above | Lanes parked until pinged |
//! | Suspended with delay | Transition would hide visible content | No commit; lanes parked |
//! | Suspended on retry lanes | Fallback shown recently | Commit delayed until the throttle elapses |

use std::time::Duration;

use arbor_core::{
    FiberId, FiberProps, Flags, HostConfig, HostScheduler, Lanes, RenderError, RootId, Task,
};

use crate::root::{FiberRoot, FinishedWork};
use crate::trace::TraceEvent;
use crate::reconciler::{ExecutionContext, Reconciler};

/// How a render pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootExitStatus {
    /// Still running, or yielded.
    #[default]
    InProgress,
    Completed,
    /// An error was thrown during the render.
    Errored,
    /// A suspense boundary is showing its fallback.
    Suspended,
    /// Suspended in a way that should keep the previous UI instead.
    SuspendedWithDelay,
    /// Suspended with no boundary to catch it.
    SuspendedAtTheShell,
}

/// State of the render in progress, if any.
#[derive(Debug, Default)]
pub(crate) struct WorkInProgress {
    pub(crate) root: Option<RootId>,
    pub(crate) lanes: Lanes,
    /// `lanes` plus everything entangled with them.
    pub(crate) entangled_lanes: Lanes,
    /// Next fiber to perform.
    pub(crate) unit: Option<FiberId>,
    /// Host-root buffer of the tree being built.
    pub(crate) root_fiber: Option<FiberId>,
    pub(crate) status: RootExitStatus,
    /// Render lanes pinged while this render was running.
    pub(crate) pinged: Lanes,
    /// Lanes that received updates while this render was running.
    pub(crate) interleaved: Lanes,
    pub(crate) uncaught: Vec<RenderError>,
}

impl WorkInProgress {
    pub(crate) fn is_rendering(&self, root: RootId) -> bool {
        self.root == Some(root) && self.unit.is_some()
    }
}

/// Borrowed view used by begin, complete, and unwind.
pub(crate) struct RenderPass<'a, H: HostConfig> {
    pub(crate) host: &'a mut H,
    pub(crate) root: &'a mut FiberRoot<H::Instance>,
    pub(crate) root_id: RootId,
    pub(crate) work: &'a mut WorkInProgress,
}

impl<H: HostConfig> RenderPass<'_, H> {
    pub(crate) fn perform_unit_of_work(&mut self, unit: FiberId) {
        let current = self.root.arena.alternate(unit);
        match self.begin_work(current, unit) {
            Ok(next) => {
                let fiber = &mut self.root.arena[unit];
                fiber.memoized_props = fiber.pending_props.clone();
                match next {
                    Some(child) => self.work.unit = Some(child),
                    None => self.complete_unit_of_work(unit),
                }
            }
            Err(thrown) => {
                self.throw_exception(unit, thrown);
                self.complete_unit_of_work(unit);
            }
        }
    }

    /// Complete `unit` and its ancestors until one has a sibling left to
    /// begin.
    fn complete_unit_of_work(&mut self, unit: FiberId) {
        let mut completed = unit;
        loop {
            let current = self.root.arena.alternate(completed);
            let return_fiber = self.root.arena[completed].return_fiber;

            if self.root.arena[completed].flags.contains(Flags::INCOMPLETE) {
                if let Some(next) = self.unwind_work(completed) {
                    self.work.unit = Some(next);
                    return;
                }
                match return_fiber {
                    Some(parent) => {
                        let fiber = &mut self.root.arena[parent];
                        fiber.flags |= Flags::INCOMPLETE;
                        fiber.subtree_flags = Flags::empty();
                        fiber.deletions.clear();
                        // Siblings of a failed fiber are not rendered.
                        completed = parent;
                        continue;
                    }
                    None => {
                        self.work.status = RootExitStatus::SuspendedAtTheShell;
                        self.work.unit = None;
                        return;
                    }
                }
            }

            self.complete_work(current, completed);

            if let Some(sibling) = self.root.arena[completed].sibling {
                self.work.unit = Some(sibling);
                return;
            }
            match return_fiber {
                Some(parent) => completed = parent,
                None => {
                    self.work.unit = None;
                    if self.work.status == RootExitStatus::InProgress {
                        self.work.status = RootExitStatus::Completed;
                    }
                    return;
                }
            }
        }
    }
}

impl<H: HostConfig, S: HostScheduler> Reconciler<H, S> {
    pub(crate) fn render_pass(&mut self, root_id: RootId) -> Option<RenderPass<'_, H>> {
        let root = self.roots.get_mut(root_id)?;
        Some(RenderPass {
            host: &mut self.host,
            root,
            root_id,
            work: &mut self.work,
        })
    }

    pub(crate) fn record(&mut self, event: TraceEvent) {
        let now = self.scheduler.now();
        self.trace.record(now, event);
    }

    /// Move queued updates onto their fibers and mark lanes up the tree.
    pub(crate) fn finish_queueing_concurrent_updates(&mut self) {
        for queued in std::mem::take(&mut self.concurrent_updates) {
            let Some(root) = self.roots.get_mut(queued.root) else {
                continue;
            };
            if let Some(update) = queued.update {
                root.arena.enqueue_update(queued.position, update);
            }
            root.arena.mark_update_lane(queued.position, queued.lane);
        }
    }

    /// Throw away any render in progress and start a new one at `lanes`.
    pub(crate) fn prepare_fresh_stack(&mut self, root_id: RootId, lanes: Lanes) {
        if let Some(root) = self.roots.get_mut(root_id)
            && let Some(handle) = root.timeout_handle.take()
        {
            self.scheduler.cancel_task(handle);
            root.pending_commit = None;
        }
        if let Some(previous) = self.work.root {
            if self.work.unit.is_some() {
                tracing::debug!(root = ?previous, "render interrupted");
                self.record(TraceEvent::RenderInterrupted { root: previous });
            }
            self.release_resolved(previous);
        }
        self.release_resolved(root_id);

        self.finish_queueing_concurrent_updates();

        let Some(root) = self.roots.get_mut(root_id) else {
            self.work = WorkInProgress::default();
            return;
        };
        let current = root.current;
        root.arena.sweep([current]);
        let wip = root.arena.clone_for_work(current, FiberProps::Empty);
        root.arena[wip].return_fiber = None;

        self.work = WorkInProgress {
            root: Some(root_id),
            lanes,
            entangled_lanes: root.lanes.entangled_lanes_for(lanes),
            unit: Some(wip),
            root_fiber: Some(wip),
            ..WorkInProgress::default()
        };
    }

    /// Drop the render in progress without starting another.
    pub(crate) fn abandon_work(&mut self) {
        if let Some(root) = self.work.root {
            self.record(TraceEvent::RenderInterrupted { root });
            self.release_resolved(root);
        }
        self.work = WorkInProgress::default();
    }

    /// Forget resolutions kept for a render of `root_id` that is no longer
    /// in flight.
    pub(crate) fn release_resolved(&mut self, root_id: RootId) {
        if let Some(root) = self.roots.get_mut(root_id)
            && root.pending_commit.is_none()
        {
            root.resolved.clear();
        }
    }

    fn ensure_stack(&mut self, root_id: RootId, lanes: Lanes, concurrent: bool) {
        if self.work.root != Some(root_id) || self.work.lanes != lanes || self.work.unit.is_none()
        {
            self.prepare_fresh_stack(root_id, lanes);
            self.record(TraceEvent::RenderStarted {
                root: root_id,
                lanes,
                concurrent,
            });
        }
    }

    pub(crate) fn render_root_sync(&mut self, root_id: RootId, lanes: Lanes) -> RootExitStatus {
        let previous = self.execution;
        self.execution |= ExecutionContext::RENDER;
        self.ensure_stack(root_id, lanes, false);

        let _span = tracing::debug_span!("render", root = ?root_id, %lanes, sync = true).entered();
        while let Some(unit) = self.work.unit {
            let Some(mut pass) = self.render_pass(root_id) else {
                break;
            };
            pass.perform_unit_of_work(unit);
        }

        self.execution = previous;
        self.finish_queueing_concurrent_updates();
        self.work.status
    }

    pub(crate) fn render_root_concurrent(
        &mut self,
        root_id: RootId,
        lanes: Lanes,
    ) -> RootExitStatus {
        let previous = self.execution;
        self.execution |= ExecutionContext::RENDER;
        self.ensure_stack(root_id, lanes, true);

        let _span = tracing::debug_span!("render", root = ?root_id, %lanes, sync = false).entered();
        while let Some(unit) = self.work.unit {
            if self.scheduler.should_yield() {
                break;
            }
            let Some(mut pass) = self.render_pass(root_id) else {
                break;
            };
            pass.perform_unit_of_work(unit);
        }

        self.execution = previous;
        if self.work.unit.is_some() {
            tracing::trace!(root = ?root_id, "render yielded");
            self.record(TraceEvent::RenderYielded { root: root_id });
            return RootExitStatus::InProgress;
        }
        self.finish_queueing_concurrent_updates();
        self.work.status
    }

    /// Render `lanes` on a root and commit the result when it is ready.
    pub(crate) fn perform_work_on_root(&mut self, root_id: RootId, lanes: Lanes, force_sync: bool) {
        if self
            .execution
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            tracing::warn!(root = ?root_id, "work requested while already rendering or committing");
            return;
        }
        let Some(root) = self.roots.get(root_id) else {
            return;
        };

        let time_slice = !force_sync
            && self.config.should_time_slice(lanes)
            && !root.lanes.includes_expired(lanes);
        let mut lanes = lanes;
        let mut status = if time_slice {
            self.render_root_concurrent(root_id, lanes)
        } else {
            self.render_root_sync(root_id, lanes)
        };

        loop {
            if status == RootExitStatus::InProgress {
                break;
            }
            let finished = std::mem::take(&mut self.work);

            if status == RootExitStatus::Errored
                && let Some(root) = self.roots.get_mut(root_id)
            {
                let retry = root.lanes.lanes_to_retry_on_error(lanes);
                if !retry.is_empty() {
                    root.lanes.error_recovery_disabled |= retry;
                    tracing::debug!(root = ?root_id, lanes = %retry, "retrying render after error");
                    self.record(TraceEvent::ErrorRetry {
                        root: root_id,
                        lanes: retry,
                    });
                    lanes = retry;
                    status = self.render_root_sync(root_id, retry);
                    continue;
                }
            }

            self.finish_concurrent_render(root_id, finished, status, lanes);
            break;
        }

        self.ensure_root_is_scheduled(root_id);
    }

    fn finish_concurrent_render(
        &mut self,
        root_id: RootId,
        finished: WorkInProgress,
        status: RootExitStatus,
        lanes: Lanes,
    ) {
        self.record(TraceEvent::RenderFinished {
            root: root_id,
            lanes,
            status,
        });
        tracing::debug!(root = ?root_id, %lanes, ?status, "render finished");
        let Some(fiber) = finished.root_fiber else {
            return;
        };

        match status {
            RootExitStatus::SuspendedAtTheShell => {
                self.mark_root_suspended(root_id, lanes, &finished);
                self.release_resolved(root_id);
                return;
            }
            RootExitStatus::SuspendedWithDelay if lanes.includes_only_transitions() => {
                self.mark_root_suspended(root_id, lanes, &finished);
                self.release_resolved(root_id);
                return;
            }
            _ => {}
        }

        if status == RootExitStatus::Suspended && lanes.includes_only_retries() {
            let now = self.scheduler.now();
            let throttle = self.config.fallback_throttle;
            let remaining = self
                .roots
                .get(root_id)
                .and_then(|r| r.most_recent_fallback_time)
                .map_or(Duration::ZERO, |shown| (shown + throttle).saturating_sub(now));

            if remaining > self.config.throttle_min_delay {
                self.mark_root_suspended(root_id, lanes, &finished);
                let Some(root) = self.roots.get_mut(root_id) else {
                    return;
                };
                if !root.lanes.next_lanes(Lanes::NONE).is_empty() {
                    // Other work is ready; it will pick these lanes up later.
                    self.release_resolved(root_id);
                    return;
                }
                root.pending_commit = Some(FinishedWork {
                    fiber,
                    lanes,
                    uncaught: finished.uncaught,
                });
                root.timeout_handle = Some(
                    self.scheduler
                        .schedule_timeout(remaining, Task::CommitSuspended(root_id)),
                );
                self.record(TraceEvent::CommitThrottled {
                    root: root_id,
                    delay: remaining,
                });
                return;
            }
        }

        self.commit_root(root_id, fiber, lanes, finished.uncaught);
    }

    fn mark_root_suspended(&mut self, root_id: RootId, lanes: Lanes, finished: &WorkInProgress) {
        let Some(root) = self.roots.get_mut(root_id) else {
            return;
        };
        let suspended = lanes.remove(finished.pinged).remove(finished.interleaved);
        root.lanes.mark_suspended(suspended);
    }

    /// Run a commit whose throttle window elapsed.
    pub(crate) fn commit_suspended(&mut self, root_id: RootId) {
        let Some(root) = self.roots.get_mut(root_id) else {
            return;
        };
        root.timeout_handle = None;
        let Some(work) = root.pending_commit.take() else {
            return;
        };
        self.commit_root(root_id, work.fiber, work.lanes, work.uncaught);
        self.ensure_root_is_scheduled(root_id);
    }
}
