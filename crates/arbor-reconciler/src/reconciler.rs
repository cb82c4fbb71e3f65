#![forbid(unsafe_code)]

//! The reconciler: roots, update entry points, and host task dispatch.
//!
//! [`Reconciler`] owns every piece of scheduling state: the roots and their
//! arenas, the render in progress, the scheduled-roots list, the transition
//! context, and pending passive effects. Nothing is global, so independent
//! reconcilers never observe each other.
//!
//! # Usage
//!
//! ```ignore
//! let mut reconciler = Reconciler::new(host, scheduler);
//! let root = reconciler.create_container(container);
//! reconciler.update_container(root, app())?;
//!
//! // Host loop:
//! //   on microtask:      reconciler.process_root_schedule()
//! //   on task:           reconciler.run_task(handle, task, did_timeout)
//! //   on data arriving:  reconciler.ping(wakeable)
//! ```
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown root | Root was unmounted | `ReconcilerError::UnknownRoot` |
//! | Stale handle | Fiber was deleted | `ReconcilerError::UnmountedFiber` |
//! | Re-entrant call | Called from an effect during commit | `ReconcilerError::Reentrant` |
//! | Uncaught render error | No error boundary | Root renders nothing; error in `take_uncaught_errors` |

use std::any::Any;
use std::rc::Rc;

use arbor_core::{
    EventPriority, FiberArena, FiberHandle, FiberId, HostConfig, HostScheduler, Lane, LaneCursor,
    Lanes, Node, PositionKey, RenderError, RootId, RootLanes, StateValue, Task, TaskHandle,
    TaskStatus, Update, Wakeable,
};
use slotmap::SlotMap;

use crate::config::ReconcilerConfig;
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::root::FiberRoot;
use crate::root_scheduler::RootSchedule;
use crate::trace::{RenderTrace, TraceEvent};
use crate::work_loop::{RootExitStatus, WorkInProgress};

bitflags::bitflags! {
    /// What the reconciler is doing right now.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ExecutionContext: u8 {
        const RENDER = 1 << 0;
        const COMMIT = 1 << 1;
    }
}

/// An update waiting to be attached to its fiber. Updates are held here
/// until the render in progress ends so they cannot change a tree that is
/// half built.
#[derive(Debug)]
pub(crate) struct ConcurrentUpdate {
    pub(crate) root: RootId,
    pub(crate) position: PositionKey,
    pub(crate) update: Option<Update>,
    pub(crate) lane: Lane,
}

/// Passive effects of the last commit, not run yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingPassive {
    pub(crate) root: RootId,
    pub(crate) finished: FiberId,
}

/// Priority context for new updates.
#[derive(Debug, Default)]
pub(crate) struct TransitionState {
    pub(crate) cursor: LaneCursor,
    pub(crate) in_transition: bool,
    /// Lane shared by every transition update of the current event.
    pub(crate) current_event_transition_lane: Lane,
    /// Set by `with_event_priority`; overrides the host's event priority.
    pub(crate) update_priority: Option<EventPriority>,
}

/// Coarse view of what the reconciler is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkPhase {
    Idle,
    /// A render yielded and will resume.
    Rendering { root: RootId, lanes: Lanes },
    /// A finished render is held back by the fallback throttle.
    CommitThrottled { root: RootId, lanes: Lanes },
    Committing,
}

/// Lane-prioritized tree reconciler over a host adapter and a host
/// scheduler.
pub struct Reconciler<H: HostConfig, S: HostScheduler> {
    pub(crate) host: H,
    pub(crate) scheduler: S,
    pub(crate) config: ReconcilerConfig,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H::Instance>>,
    pub(crate) schedule: RootSchedule,
    pub(crate) work: WorkInProgress,
    pub(crate) concurrent_updates: Vec<ConcurrentUpdate>,
    pub(crate) execution: ExecutionContext,
    pub(crate) transitions: TransitionState,
    pub(crate) pending_passive: Option<PendingPassive>,
    pub(crate) passive_task: Option<TaskHandle>,
    pub(crate) uncaught_errors: Vec<RenderError>,
    pub(crate) trace: RenderTrace,
}

impl<H: HostConfig, S: HostScheduler> Reconciler<H, S> {
    pub fn new(host: H, scheduler: S) -> Self {
        Self::with_config(host, scheduler, ReconcilerConfig::default())
    }

    pub fn with_config(host: H, scheduler: S, config: ReconcilerConfig) -> Self {
        Self {
            host,
            scheduler,
            trace: RenderTrace::new(config.trace_capacity),
            config,
            roots: SlotMap::with_key(),
            schedule: RootSchedule::default(),
            work: WorkInProgress::default(),
            concurrent_updates: Vec::new(),
            execution: ExecutionContext::empty(),
            transitions: TransitionState::default(),
            pending_passive: None,
            passive_task: None,
            uncaught_errors: Vec::new(),
        }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Create an empty root rendering into `container`.
    pub fn create_container(&mut self, container: H::Instance) -> RootId {
        let root = self.roots.insert(FiberRoot::new(container));
        tracing::debug!(?root, "created container");
        root
    }

    /// Schedule `element` as the new content of a root. Returns the lane the
    /// update was assigned.
    pub fn update_container(&mut self, root_id: RootId, element: Node) -> ReconcilerResult<Lane> {
        let position = self
            .roots
            .get(root_id)
            .map(|r| r.current.position)
            .ok_or(ReconcilerError::UnknownRoot(root_id))?;
        let lane = self.request_update_lane();
        let update = Update::replace(lane, Rc::new(element));
        self.schedule_update(root_id, position, Some(update), lane);
        Ok(lane)
    }

    /// Render nothing into a root synchronously, run its cleanup, and drop
    /// it.
    pub fn unmount_container(&mut self, root_id: RootId) -> ReconcilerResult<()> {
        if !self.roots.contains_key(root_id) {
            return Err(ReconcilerError::UnknownRoot(root_id));
        }
        if !self.execution.is_empty() {
            return Err(ReconcilerError::Reentrant);
        }

        self.flush_sync(|r| r.update_container(root_id, Node::Empty))?;
        self.flush_passive_effects();

        if self.work.root == Some(root_id) {
            self.work = WorkInProgress::default();
        }
        self.unlink_root(root_id);
        self.concurrent_updates.retain(|u| u.root != root_id);
        if let Some(root) = self.roots.remove(root_id) {
            for handle in [root.callback_node, root.timeout_handle].into_iter().flatten() {
                self.scheduler.cancel_task(handle);
            }
        }
        tracing::debug!(root = ?root_id, "unmounted container");
        Ok(())
    }

    // =========================================================================
    // Lanes and updates
    // =========================================================================

    /// Lane for an update issued in the current context: the transition lane
    /// of this event inside `start_transition`, otherwise the lane of the
    /// current event priority.
    pub fn request_update_lane(&mut self) -> Lane {
        let transitions = &mut self.transitions;
        if transitions.in_transition {
            if transitions.current_event_transition_lane.is_empty() {
                transitions.current_event_transition_lane =
                    transitions.cursor.claim_next_transition_lane();
            }
            return transitions.current_event_transition_lane;
        }
        if let Some(priority) = transitions.update_priority {
            return priority.lane();
        }
        self.host.current_event_priority().lane()
    }

    /// Re-render a mounted fiber at `lane` without changing its state.
    pub fn schedule_update_on_fiber(
        &mut self,
        handle: FiberHandle,
        lane: Lane,
    ) -> ReconcilerResult<()> {
        self.check_handle(handle)?;
        self.schedule_update(handle.root, handle.position, None, lane);
        Ok(())
    }

    /// Replace a component's state with `value`.
    pub fn dispatch<T: Any>(&mut self, handle: FiberHandle, value: T) -> ReconcilerResult<Lane> {
        self.check_handle(handle)?;
        let lane = self.request_update_lane();
        let update = Update::replace(lane, Rc::new(value));
        self.schedule_update(handle.root, handle.position, Some(update), lane);
        Ok(lane)
    }

    /// Compute a component's next state from its previous one. The reducer
    /// runs during render and may run more than once.
    pub fn dispatch_with<T, F>(&mut self, handle: FiberHandle, reducer: F) -> ReconcilerResult<Lane>
    where
        T: Any,
        F: Fn(Option<&T>) -> T + 'static,
    {
        self.check_handle(handle)?;
        let lane = self.request_update_lane();
        let update = Update::reduce(
            lane,
            Rc::new(move |prev: Option<&StateValue>| -> StateValue {
                Rc::new(reducer(prev.and_then(|s| s.downcast_ref::<T>())))
            }),
        );
        self.schedule_update(handle.root, handle.position, Some(update), lane);
        Ok(lane)
    }

    fn check_handle(&self, handle: FiberHandle) -> ReconcilerResult<()> {
        let root = self
            .roots
            .get(handle.root)
            .ok_or(ReconcilerError::UnknownRoot(handle.root))?;
        if root.arena.position(handle.position).is_none() {
            tracing::warn!(root = ?handle.root, position = ?handle.position, "update on unmounted fiber");
            return Err(ReconcilerError::UnmountedFiber(handle));
        }
        Ok(())
    }

    /// Queue an update (or a bare lane) on a position and schedule its root.
    pub(crate) fn schedule_update(
        &mut self,
        root_id: RootId,
        position: PositionKey,
        update: Option<Update>,
        lane: Lane,
    ) {
        let Some(root) = self.roots.get_mut(root_id) else {
            return;
        };
        if root.arena.position(position).is_none() {
            tracing::warn!(root = ?root_id, ?position, "dropping update on unmounted fiber");
            return;
        }

        self.concurrent_updates.push(ConcurrentUpdate {
            root: root_id,
            position,
            update,
            lane,
        });
        root.lanes.mark_updated(lane);

        // A transition update joins the transitions already queued here.
        if lane.is_transition()
            && let Some(p) = root.arena.position_mut(position)
        {
            let queue_lanes = (p.queue_lanes & root.lanes.pending) | lane;
            p.queue_lanes = queue_lanes;
            root.lanes.mark_entangled(queue_lanes);
        }

        if self.work.root == Some(root_id) {
            self.work.interleaved |= lane;
            if self.work.status == RootExitStatus::SuspendedWithDelay {
                root.lanes.mark_suspended(self.work.lanes);
            }
        }

        self.record(TraceEvent::UpdateScheduled {
            root: root_id,
            lane,
        });
        self.ensure_root_is_scheduled(root_id);
    }

    // =========================================================================
    // Priority contexts
    // =========================================================================

    /// Run `f` with updates assigned the lane of `priority`.
    pub fn with_event_priority<R>(
        &mut self,
        priority: EventPriority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let previous = self.transitions.update_priority.replace(priority);
        let result = f(self);
        self.transitions.update_priority = previous;
        result
    }

    /// Run `f` with updates assigned a transition lane. All updates of one
    /// event share the same lane.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.transitions.in_transition, true);
        let result = f(self);
        self.transitions.in_transition = previous;
        result
    }

    /// Run `f` at discrete priority, then render and commit all sync work
    /// before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let result = self.with_event_priority(EventPriority::Discrete, f);
        self.flush_sync_work();
        result
    }

    /// Render and commit all pending sync-lane work now.
    pub fn flush_sync_work(&mut self) {
        if !self.execution.is_empty() {
            tracing::warn!("flush_sync_work called while rendering or committing");
            return;
        }
        self.flush_sync_work_on_all_roots();
    }

    // =========================================================================
    // Host entry points
    // =========================================================================

    /// Run a task previously handed to [`HostScheduler::schedule_task`] or
    /// [`HostScheduler::schedule_timeout`].
    ///
    /// `did_timeout` tells the reconciler the task waited past its
    /// priority's deadline; the work is then finished without yielding.
    pub fn run_task(&mut self, handle: TaskHandle, task: Task, did_timeout: bool) -> TaskStatus {
        let _span = tracing::trace_span!("task", ?task, ?handle).entered();
        match task {
            Task::PerformWork(root) => self.perform_work_via_task(root, handle, did_timeout),
            Task::CommitSuspended(root) => {
                if self.roots.get(root).and_then(|r| r.timeout_handle) == Some(handle) {
                    self.commit_suspended(root);
                }
                TaskStatus::Complete
            }
            Task::FlushPassiveEffects => {
                if self.passive_task == Some(handle) {
                    self.passive_task = None;
                }
                self.flush_passive_effects();
                TaskStatus::Complete
            }
        }
    }

    /// A wakeable resolved: ping the lanes suspended on it and retry the
    /// boundaries showing a fallback for it.
    pub fn ping(&mut self, wakeable: Wakeable) {
        let roots: Vec<RootId> = self.roots.keys().collect();
        for root_id in roots {
            let Some(root) = self.roots.get_mut(root_id) else {
                continue;
            };
            if self.work.root == Some(root_id) || root.pending_commit.is_some() {
                root.resolved.insert(wakeable);
            }
            let pinged = root.ping_cache.remove(&wakeable);
            let boundaries = root.retry_cache.remove(&wakeable).unwrap_or_default();

            if let Some(lanes) = pinged {
                self.ping_suspended_root(root_id, lanes);
            }
            for boundary in boundaries {
                self.retry_boundary(root_id, boundary);
            }
        }
    }

    fn ping_suspended_root(&mut self, root_id: RootId, lanes: Lanes) {
        let now = self.scheduler.now();
        let Some(root) = self.roots.get_mut(root_id) else {
            return;
        };
        root.lanes.mark_pinged(lanes);

        if self.work.root == Some(root_id) && self.work.lanes.is_subset_of(lanes) {
            let throttled = self.work.status == RootExitStatus::Suspended
                && self.work.lanes.includes_only_retries()
                && root
                    .most_recent_fallback_time
                    .is_some_and(|shown| now < shown + self.config.fallback_throttle);
            if self.work.status == RootExitStatus::SuspendedWithDelay || throttled {
                // Nothing from this attempt is worth keeping.
                if self.execution.is_empty() {
                    self.abandon_work();
                }
            } else {
                self.work.pinged |= lanes;
            }
        }

        self.record(TraceEvent::Pinged {
            root: root_id,
            lanes,
        });
        self.ensure_root_is_scheduled(root_id);
    }

    /// Schedule a re-render of a suspense boundary on a fresh retry lane.
    pub(crate) fn retry_boundary(&mut self, root_id: RootId, boundary: PositionKey) {
        let lane = self.transitions.cursor.claim_next_retry_lane();
        self.record(TraceEvent::RetryScheduled {
            root: root_id,
            lane,
        });
        self.schedule_update(root_id, boundary, None, lane);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Errors no boundary captured, oldest first.
    pub fn take_uncaught_errors(&mut self) -> Vec<RenderError> {
        std::mem::take(&mut self.uncaught_errors)
    }

    pub fn work_phase(&self) -> WorkPhase {
        if self.execution.contains(ExecutionContext::COMMIT) {
            return WorkPhase::Committing;
        }
        if let Some(root) = self.work.root
            && self.work.unit.is_some()
        {
            return WorkPhase::Rendering {
                root,
                lanes: self.work.lanes,
            };
        }
        self.roots
            .iter()
            .find_map(|(id, r)| {
                r.pending_commit.as_ref().map(|p| WorkPhase::CommitThrottled {
                    root: id,
                    lanes: p.lanes,
                })
            })
            .unwrap_or(WorkPhase::Idle)
    }

    pub fn arena(&self, root: RootId) -> Option<&FiberArena<H::Instance>> {
        self.roots.get(root).map(|r| &r.arena)
    }

    pub fn root_lanes(&self, root: RootId) -> Option<&RootLanes> {
        self.roots.get(root).map(|r| &r.lanes)
    }

    /// Host-root buffer of the committed tree.
    pub fn current_fiber(&self, root: RootId) -> Option<FiberId> {
        self.roots.get(root).map(|r| r.current)
    }

    pub fn container(&self, root: RootId) -> Option<&H::Instance> {
        self.roots.get(root).map(|r| &r.container)
    }

    /// Wakeables a root still tracks for pings, retries, or in-flight
    /// resolutions. Zero for an unknown root.
    pub fn tracked_wakeables(&self, root: RootId) -> usize {
        self.roots.get(root).map_or(0, |r| r.tracked_wakeables())
    }

    pub fn roots(&self) -> impl Iterator<Item = RootId> + '_ {
        self.roots.keys()
    }

    pub fn trace(&self) -> &RenderTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut RenderTrace {
        &mut self.trace
    }

    pub fn has_pending_passive_effects(&self) -> bool {
        self.pending_passive.is_some()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }
}

impl<H, S> std::fmt::Debug for Reconciler<H, S>
where
    H: HostConfig,
    S: HostScheduler,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("roots", &self.roots.len())
            .field("work", &self.work)
            .field("execution", &self.execution)
            .field("pending_passive", &self.pending_passive)
            .finish_non_exhaustive()
    }
}
