#![forbid(unsafe_code)]

//! Root scheduler: which roots have work, and which host task runs it.
//!
//! Roots with pending work form a singly linked list. Scheduling work on a
//! root only links it and requests one microtask; the microtask then walks
//! the list once, decides for each root whether it needs a host task (and
//! at which priority), and unlinks roots that are done. Sync-lane work never
//! gets a host task: it is flushed at the end of the microtask, or sooner
//! by `flush_sync`.
//!
//! # Invariants
//!
//! - A root is in the list at most once.
//! - At most one microtask is outstanding.
//! - A root has at most one host task; a task at the right priority is
//!   reused rather than replaced.
//! - A root with no remaining lanes is unlinked and has no task.

use std::time::Duration;

use arbor_core::{
    EventPriority, HostConfig, HostScheduler, Lanes, RootId, Task, TaskHandle, TaskStatus,
};

use crate::trace::TraceEvent;
use crate::reconciler::{ExecutionContext, Reconciler};

/// Scheduled-roots list and flush state.
#[derive(Debug, Default)]
pub(crate) struct RootSchedule {
    pub(crate) first: Option<RootId>,
    pub(crate) last: Option<RootId>,
    pub(crate) did_schedule_microtask: bool,
    pub(crate) might_have_pending_sync_work: bool,
    pub(crate) is_flushing_work: bool,
}

impl<H: HostConfig, S: HostScheduler> Reconciler<H, S> {
    /// Make sure a root with work is in the schedule and a microtask is
    /// pending to process it. Idempotent within a turn.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root_id: RootId) {
        let Some(root) = self.roots.get(root_id) else {
            return;
        };
        let linked = self.schedule.last == Some(root_id) || root.next.is_some();
        if !linked {
            match self.schedule.last {
                Some(last) => {
                    if let Some(last_root) = self.roots.get_mut(last) {
                        last_root.next = Some(root_id);
                    }
                }
                None => self.schedule.first = Some(root_id),
            }
            self.schedule.last = Some(root_id);
        }

        self.schedule.might_have_pending_sync_work = true;
        if !self.schedule.did_schedule_microtask {
            self.schedule.did_schedule_microtask = true;
            self.scheduler.schedule_microtask();
            self.record(TraceEvent::MicrotaskScheduled);
        }
    }

    pub(crate) fn unlink_root(&mut self, root_id: RootId) {
        let mut previous: Option<RootId> = None;
        let mut cursor = self.schedule.first;
        while let Some(id) = cursor {
            let next = self.roots.get(id).and_then(|r| r.next);
            if id == root_id {
                match previous {
                    Some(p) => {
                        if let Some(prev_root) = self.roots.get_mut(p) {
                            prev_root.next = next;
                        }
                    }
                    None => self.schedule.first = next,
                }
                if self.schedule.last == Some(id) {
                    self.schedule.last = previous;
                }
                if let Some(root) = self.roots.get_mut(id) {
                    root.next = None;
                }
                return;
            }
            previous = Some(id);
            cursor = next;
        }
    }

    /// Process the scheduled-roots list. Hosts call this when the microtask
    /// requested through [`HostScheduler::schedule_microtask`] runs.
    pub fn process_root_schedule(&mut self) {
        self.schedule.did_schedule_microtask = false;
        self.schedule.might_have_pending_sync_work = false;
        let now = self.scheduler.now();

        let mut previous: Option<RootId> = None;
        let mut cursor = self.schedule.first;
        while let Some(id) = cursor {
            let next = self.roots.get(id).and_then(|r| r.next);
            let lanes = if self.roots.contains_key(id) {
                self.schedule_task_for_root(id, now)
            } else {
                Lanes::NONE
            };

            if lanes.is_empty() {
                if let Some(root) = self.roots.get_mut(id) {
                    root.next = None;
                }
                match previous {
                    Some(p) => {
                        if let Some(prev_root) = self.roots.get_mut(p) {
                            prev_root.next = next;
                        }
                    }
                    None => self.schedule.first = next,
                }
                if next.is_none() {
                    self.schedule.last = previous;
                }
            } else {
                previous = Some(id);
                if lanes.includes_sync_lane() {
                    self.schedule.might_have_pending_sync_work = true;
                }
            }
            cursor = next;
        }

        // A new event gets a new transition lane.
        self.transitions.current_event_transition_lane = Lanes::NONE;
        self.flush_sync_work_on_all_roots();
    }

    /// Decide the host task for one root and return its next lanes.
    fn schedule_task_for_root(&mut self, root_id: RootId, now: Duration) -> Lanes {
        let wip_lanes = if self.work.root == Some(root_id) {
            self.work.lanes
        } else {
            Lanes::NONE
        };
        let Some(root) = self.roots.get_mut(root_id) else {
            return Lanes::NONE;
        };
        root.lanes.mark_starved_lanes_as_expired(now, &self.config.lanes);
        let next = root.lanes.next_lanes(wip_lanes);
        let existing = root.callback_node;

        if next.is_empty() {
            root.callback_node = None;
            root.callback_priority = Lanes::NONE;
            if let Some(handle) = existing {
                self.scheduler.cancel_task(handle);
                self.record(TraceEvent::TaskCancelled {
                    root: root_id,
                    handle,
                });
            }
            return Lanes::NONE;
        }

        if next.includes_sync_lane() {
            root.callback_node = None;
            root.callback_priority = Lanes::SYNC;
            if let Some(handle) = existing {
                self.scheduler.cancel_task(handle);
                self.record(TraceEvent::TaskCancelled {
                    root: root_id,
                    handle,
                });
            }
            return next;
        }

        let priority_lane = next.highest_priority_lane();
        if let Some(handle) = existing
            && root.callback_priority == priority_lane
        {
            self.record(TraceEvent::TaskReused {
                root: root_id,
                handle,
            });
            return next;
        }

        if let Some(handle) = existing {
            self.scheduler.cancel_task(handle);
        }
        let priority = EventPriority::from_lanes(next).scheduler_priority();
        let handle = self
            .scheduler
            .schedule_task(priority, Task::PerformWork(root_id));
        root.callback_node = Some(handle);
        root.callback_priority = priority_lane;
        tracing::trace!(root = ?root_id, %next, ?priority, "scheduled root task");
        self.record(TraceEvent::TaskScheduled {
            root: root_id,
            priority,
            handle,
        });
        next
    }

    /// Render and commit sync-lane work on every scheduled root until none
    /// is left.
    pub(crate) fn flush_sync_work_on_all_roots(&mut self) {
        if self.schedule.is_flushing_work || !self.schedule.might_have_pending_sync_work {
            return;
        }
        if self
            .execution
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return;
        }

        self.schedule.is_flushing_work = true;
        loop {
            let mut did_perform_work = false;
            let mut cursor = self.schedule.first;
            while let Some(id) = cursor {
                let wip_lanes = if self.work.root == Some(id) {
                    self.work.lanes
                } else {
                    Lanes::NONE
                };
                let next_lanes = self
                    .roots
                    .get(id)
                    .map_or(Lanes::NONE, |r| r.lanes.next_lanes(wip_lanes));
                if next_lanes.includes_sync_lane() {
                    did_perform_work = true;
                    self.perform_sync_work_on_root(id, next_lanes);
                }
                cursor = self.roots.get(id).and_then(|r| r.next);
            }
            if !did_perform_work {
                break;
            }
        }
        self.schedule.is_flushing_work = false;
    }

    fn perform_sync_work_on_root(&mut self, root_id: RootId, lanes: Lanes) {
        // Passive effects may schedule more sync work; the outer loop
        // picks it up on the next pass.
        if self.flush_passive_effects() {
            return;
        }
        self.perform_work_on_root(root_id, lanes, true);
    }

    /// Entry point for a `Task::PerformWork` host task.
    pub(crate) fn perform_work_via_task(
        &mut self,
        root_id: RootId,
        handle: TaskHandle,
        did_timeout: bool,
    ) -> TaskStatus {
        if self.flush_passive_effects()
            && self.roots.get(root_id).and_then(|r| r.callback_node) != Some(handle)
        {
            return TaskStatus::Complete;
        }
        let Some(root) = self.roots.get(root_id) else {
            return TaskStatus::Complete;
        };
        if root.callback_node != Some(handle) {
            return TaskStatus::Complete;
        }

        let wip_lanes = if self.work.root == Some(root_id) {
            self.work.lanes
        } else {
            Lanes::NONE
        };
        let lanes = root.lanes.next_lanes(wip_lanes);
        if lanes.is_empty() {
            return TaskStatus::Complete;
        }

        self.perform_work_on_root(root_id, lanes, did_timeout);

        let now = self.scheduler.now();
        self.schedule_task_for_root(root_id, now);
        match self.roots.get(root_id) {
            Some(root) if root.callback_node == Some(handle) => TaskStatus::Continue,
            _ => TaskStatus::Complete,
        }
    }
}
