#![forbid(unsafe_code)]

//! Deterministic host scheduler.
//!
//! [`TestScheduler`] is a virtual clock plus a task queue. Nothing runs on
//! its own: the driver pops ready tasks and runs them, and time only moves
//! when the driver advances it.
//!
//! Tasks run in priority order, then in the order they were scheduled.
//! Timeouts become ready once the clock reaches their start time. A task is
//! reported as timed out when it waited longer than its priority's budget:
//!
//! | Priority | Budget |
//! |----------|--------|
//! | Immediate | none (always timed out) |
//! | UserBlocking | 250 ms |
//! | Normal | 5 s |
//! | Idle | never |

use std::time::Duration;

use arbor_core::{HostScheduler, SchedulerPriority, Task, TaskHandle};

/// How long a task at `priority` may wait before it counts as timed out.
pub fn priority_timeout(priority: SchedulerPriority) -> Option<Duration> {
    match priority {
        SchedulerPriority::Immediate => Some(Duration::ZERO),
        SchedulerPriority::UserBlocking => Some(Duration::from_millis(250)),
        SchedulerPriority::Normal => Some(Duration::from_secs(5)),
        SchedulerPriority::Idle => None,
    }
}

/// A queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub handle: TaskHandle,
    pub priority: SchedulerPriority,
    pub task: Task,
    /// Earliest time the task may run.
    pub start: Duration,
    pub enqueued_at: Duration,
}

impl ScheduledTask {
    pub fn did_timeout(&self, now: Duration) -> bool {
        priority_timeout(self.priority)
            .is_some_and(|budget| now.saturating_sub(self.start) >= budget)
    }
}

/// Virtual-clock scheduler for tests.
#[derive(Debug, Default)]
pub struct TestScheduler {
    now: Duration,
    next_handle: u64,
    queue: Vec<ScheduledTask>,
    microtasks: usize,
    /// Yield after this many `should_yield` checks in one slice.
    yield_every: Option<usize>,
    checks_this_slice: usize,
    cancelled: Vec<TaskHandle>,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `should_yield` return true after `n` checks per slice. `None`
    /// never yields.
    pub fn set_yield_every(&mut self, n: Option<usize>) {
        self.yield_every = n;
    }

    /// Start a new time slice.
    pub fn begin_slice(&mut self) {
        self.checks_this_slice = 0;
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Consume one pending microtask request.
    pub fn take_microtask(&mut self) -> bool {
        if self.microtasks == 0 {
            return false;
        }
        self.microtasks -= 1;
        true
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks
    }

    /// Remove and return the next task that may run now.
    pub fn pop_ready(&mut self) -> Option<ScheduledTask> {
        let now = self.now;
        let index = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.start <= now)
            .min_by_key(|(_, t)| (t.priority, t.start, t.handle))
            .map(|(i, _)| i)?;
        Some(self.queue.remove(index))
    }

    /// Put a task that asked to continue back in the queue under the same
    /// handle.
    pub fn requeue(&mut self, task: ScheduledTask) {
        self.queue.push(task);
    }

    /// Start time of the earliest timeout still in the future.
    pub fn next_timer(&self) -> Option<Duration> {
        self.queue
            .iter()
            .map(|t| t.start)
            .filter(|&start| start > self.now)
            .min()
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.queue
    }

    /// Handles cancelled so far, oldest first.
    pub fn cancelled(&self) -> &[TaskHandle] {
        &self.cancelled
    }

    fn push(&mut self, priority: SchedulerPriority, task: Task, start: Duration) -> TaskHandle {
        self.next_handle += 1;
        let handle = TaskHandle(self.next_handle);
        self.queue.push(ScheduledTask {
            handle,
            priority,
            task,
            start,
            enqueued_at: self.now,
        });
        handle
    }
}

impl HostScheduler for TestScheduler {
    fn now(&self) -> Duration {
        self.now
    }

    fn should_yield(&mut self) -> bool {
        let Some(limit) = self.yield_every else {
            return false;
        };
        if self.checks_this_slice >= limit {
            return true;
        }
        self.checks_this_slice += 1;
        false
    }

    fn schedule_task(&mut self, priority: SchedulerPriority, task: Task) -> TaskHandle {
        let start = self.now;
        self.push(priority, task, start)
    }

    fn schedule_timeout(&mut self, delay: Duration, task: Task) -> TaskHandle {
        let start = self.now + delay;
        self.push(SchedulerPriority::Normal, task, start)
    }

    fn cancel_task(&mut self, handle: TaskHandle) {
        let before = self.queue.len();
        self.queue.retain(|t| t.handle != handle);
        if self.queue.len() != before {
            self.cancelled.push(handle);
        }
    }

    fn schedule_microtask(&mut self) {
        self.microtasks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::RootId;

    #[test]
    fn runs_by_priority_then_fifo() {
        let mut s = TestScheduler::new();
        let a = s.schedule_task(SchedulerPriority::Normal, Task::FlushPassiveEffects);
        let b = s.schedule_task(SchedulerPriority::Immediate, Task::FlushPassiveEffects);
        let c = s.schedule_task(SchedulerPriority::Normal, Task::FlushPassiveEffects);
        let order: Vec<_> = std::iter::from_fn(|| s.pop_ready().map(|t| t.handle)).collect();
        assert_eq!(order, vec![b, a, c]);
    }

    #[test]
    fn timeouts_wait_for_the_clock() {
        let mut s = TestScheduler::new();
        s.schedule_timeout(
            Duration::from_millis(100),
            Task::CommitSuspended(RootId::default()),
        );
        assert!(s.pop_ready().is_none());
        assert_eq!(s.next_timer(), Some(Duration::from_millis(100)));
        s.advance(Duration::from_millis(100));
        assert!(s.pop_ready().is_some());
    }

    #[test]
    fn cancel_removes_and_records() {
        let mut s = TestScheduler::new();
        let a = s.schedule_task(SchedulerPriority::Normal, Task::FlushPassiveEffects);
        s.cancel_task(a);
        s.cancel_task(a);
        assert!(s.tasks().is_empty());
        assert_eq!(s.cancelled(), &[a]);
    }

    #[test]
    fn yields_after_budget() {
        let mut s = TestScheduler::new();
        s.set_yield_every(Some(2));
        assert!(!s.should_yield());
        assert!(!s.should_yield());
        assert!(s.should_yield());
        s.begin_slice();
        assert!(!s.should_yield());
    }

    #[test]
    fn timeout_budget_by_priority() {
        let task = ScheduledTask {
            handle: TaskHandle(1),
            priority: SchedulerPriority::UserBlocking,
            task: Task::FlushPassiveEffects,
            start: Duration::ZERO,
            enqueued_at: Duration::ZERO,
        };
        assert!(!task.did_timeout(Duration::from_millis(249)));
        assert!(task.did_timeout(Duration::from_millis(250)));
        let idle = ScheduledTask {
            priority: SchedulerPriority::Idle,
            ..task
        };
        assert!(!idle.did_timeout(Duration::from_secs(3600)));
    }
}
