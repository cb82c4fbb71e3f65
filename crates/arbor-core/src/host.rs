#![forbid(unsafe_code)]

//! Host adapter and host scheduler interfaces.
//!
//! The reconciler never touches a real tree or a real event loop. It calls
//! into a [`HostConfig`] to create and mutate host instances, and into a
//! [`HostScheduler`] to queue tasks, read the clock, and decide when to
//! yield.
//!
//! Tasks are plain data ([`Task`]); the host stores them and hands each one
//! back to `Reconciler::run_task` when it is due. A task that reports
//! [`TaskStatus::Continue`] must be run again later under the same handle.

use std::fmt;
use std::time::Duration;

use crate::element::Props;
use crate::id::{RootId, TaskHandle};
use crate::lane::{EventPriority, SchedulerPriority};

/// Commit sub-phase boundaries reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    BeforeMutation,
    Mutation,
    /// The finished tree just became current.
    CurrentSwapped,
    Layout,
    Passive,
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeMutation => "before-mutation",
            Self::Mutation => "mutation",
            Self::CurrentSwapped => "current-swapped",
            Self::Layout => "layout",
            Self::Passive => "passive",
        })
    }
}

/// Creates and mutates host instances.
///
/// Instances are handles; cloning one must not clone the underlying host
/// node.
pub trait HostConfig {
    type Instance: Clone + fmt::Debug;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Self::Instance;

    fn create_text_instance(&mut self, text: &str) -> Self::Instance;

    /// Append a child to a parent that is not attached to the container yet.
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    );

    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Whether a props change needs a `commit_update`.
    fn prepare_update(
        &mut self,
        _instance: &Self::Instance,
        _tag: &str,
        old: &Props,
        new: &Props,
    ) -> bool {
        old.attrs != new.attrs
    }

    fn commit_update(&mut self, instance: &Self::Instance, tag: &str, old: &Props, new: &Props);

    fn commit_text_update(&mut self, instance: &Self::Instance, old: &str, new: &str);

    /// Called before the first mutation of a commit.
    fn prepare_for_commit(&mut self, _container: &Self::Instance) {}

    /// Called after the last mutation of a commit.
    fn reset_after_commit(&mut self, _container: &Self::Instance) {}

    /// A host instance left the tree for good.
    fn detach_deleted_instance(&mut self, _instance: &Self::Instance) {}

    fn on_commit_phase(&mut self, _phase: CommitPhase) {}

    /// Priority of the event currently being dispatched by the host.
    fn current_event_priority(&self) -> EventPriority {
        EventPriority::Default
    }
}

/// Work the reconciler asks the host to run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Render (and possibly commit) pending lanes on a root.
    PerformWork(RootId),
    /// Commit a suspended render whose throttle window elapsed.
    CommitSuspended(RootId),
    /// Run passive effects from the last commit.
    FlushPassiveEffects,
}

/// Outcome of running a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Complete,
    /// Work yielded; run the same task again under the same handle.
    Continue,
}

/// Host task queue, clock, and yield signal.
pub trait HostScheduler {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// True when the current time slice is used up.
    fn should_yield(&mut self) -> bool;

    fn schedule_task(&mut self, priority: SchedulerPriority, task: Task) -> TaskHandle;

    /// Queue a task that becomes runnable after `delay`.
    fn schedule_timeout(&mut self, delay: Duration, task: Task) -> TaskHandle;

    /// Withdraw a queued task. Unknown or already-run handles are ignored.
    fn cancel_task(&mut self, handle: TaskHandle);

    /// Request a call to `Reconciler::process_root_schedule` at the end of
    /// the current turn.
    fn schedule_microtask(&mut self);
}
