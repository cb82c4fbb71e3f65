#![forbid(unsafe_code)]

//! Test driver: one root on a [`RecordingHost`] with a [`TestScheduler`].
//!
//! [`TestRenderer`] plays the host event loop by hand. Updates only schedule
//! work; nothing renders until the test flushes microtasks or runs tasks,
//! which makes interleavings (yield, interrupt, ping mid-render) easy to set
//! up.
//!
//! # Example
//!
//! ```ignore
//! let mut r = TestRenderer::new();
//! r.render(host("div").child("hi").build());
//! assert_eq!(r.snapshot(), "<div>hi</div>");
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use arbor_core::{
    EventPriority, FiberArena, HostScheduler, Lane, Node, RootId, RootLanes, TaskStatus, Thrown,
    Wakeable,
};
use arbor_reconciler::{Reconciler, ReconcilerConfig, RenderTrace};

use crate::host::{EventLog, HostId, HostOp, RecordingHost};
use crate::scheduler::TestScheduler;

/// Upper bound on tasks run by one [`TestRenderer::flush_all`].
pub const MAX_FLUSH_STEPS: usize = 10_000;

/// The reconciler type the harness drives.
pub type TestReconciler = Reconciler<RecordingHost, TestScheduler>;

/// Single-root driver over the recording host and virtual scheduler.
#[derive(Debug)]
pub struct TestRenderer {
    reconciler: TestReconciler,
    root: RootId,
    container: HostId,
}

impl Default for TestRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRenderer {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        Self::build(RecordingHost::new(), config)
    }

    /// Mirror host calls into `log`, interleaved with whatever effects push.
    pub fn with_log(log: EventLog) -> Self {
        Self::build(RecordingHost::new().with_log(log), ReconcilerConfig::default())
    }

    pub fn build(mut host: RecordingHost, config: ReconcilerConfig) -> Self {
        let container = host.create_container();
        let mut reconciler = Reconciler::with_config(host, TestScheduler::new(), config);
        let root = reconciler.create_container(container);
        Self {
            reconciler,
            root,
            container,
        }
    }

    /// Add another root on the same reconciler.
    pub fn create_root(&mut self) -> (RootId, HostId) {
        let container = self.reconciler.host_mut().create_container();
        let root = self.reconciler.create_container(container);
        (root, container)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Schedule new content without running anything.
    pub fn update(&mut self, node: Node) -> Lane {
        match self.reconciler.update_container(self.root, node) {
            Ok(lane) => lane,
            Err(err) => panic!("update_container failed: {err}"),
        }
    }

    /// Schedule new content and run until idle.
    pub fn render(&mut self, node: Node) {
        self.update(node);
        self.flush_all();
    }

    /// Schedule new content at `priority` without running anything.
    pub fn update_at(&mut self, priority: EventPriority, node: Node) -> Lane {
        let root = self.root;
        match self
            .reconciler
            .with_event_priority(priority, |r| r.update_container(root, node))
        {
            Ok(lane) => lane,
            Err(err) => panic!("update_container failed: {err}"),
        }
    }

    /// Schedule new content as a transition without running anything.
    pub fn update_in_transition(&mut self, node: Node) -> Lane {
        let root = self.root;
        match self
            .reconciler
            .start_transition(|r| r.update_container(root, node))
        {
            Ok(lane) => lane,
            Err(err) => panic!("update_container failed: {err}"),
        }
    }

    /// Mark `wakeable` resolved and let the reconciler react.
    pub fn resolve(&mut self, wakeable: Wakeable) {
        self.reconciler.ping(wakeable);
    }

    // =========================================================================
    // Running work
    // =========================================================================

    /// Run every pending microtask (root schedule processing).
    pub fn flush_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while self.reconciler.scheduler_mut().take_microtask() {
            self.reconciler.process_root_schedule();
            ran += 1;
        }
        ran
    }

    /// Run the next ready task as one time slice. Returns false when no task
    /// is ready.
    pub fn run_next_task(&mut self) -> bool {
        self.flush_microtasks();
        let scheduler = self.reconciler.scheduler_mut();
        let Some(task) = scheduler.pop_ready() else {
            return false;
        };
        scheduler.begin_slice();
        let did_timeout = task.did_timeout(scheduler.now());

        let status = self.reconciler.run_task(task.handle, task.task, did_timeout);
        if status == TaskStatus::Continue {
            self.reconciler.scheduler_mut().requeue(task);
        }
        self.flush_microtasks();
        true
    }

    /// Run microtasks and ready tasks until nothing is ready. Timers in the
    /// future are left alone. Returns the number of tasks run.
    pub fn flush_all(&mut self) -> usize {
        self.flush_microtasks();
        let mut steps = 0;
        while steps < MAX_FLUSH_STEPS && self.run_next_task() {
            steps += 1;
        }
        if steps == MAX_FLUSH_STEPS {
            tracing::warn!(steps, "flush_all stopped at the step limit");
        }
        steps
    }

    /// Advance the clock, then flush.
    pub fn advance_time(&mut self, by: Duration) -> usize {
        self.reconciler.scheduler_mut().advance(by);
        self.flush_all()
    }

    /// Jump to each pending timer in turn and flush, until none are left.
    pub fn flush_timers(&mut self) -> usize {
        let mut steps = self.flush_all();
        while let Some(at) = self.reconciler.scheduler().next_timer() {
            let now = self.reconciler.scheduler().now();
            steps += self.advance_time(at.saturating_sub(now));
        }
        steps
    }

    /// Yield after `n` units of work per task. `None` never yields.
    pub fn set_yield_every(&mut self, n: Option<usize>) {
        self.reconciler.scheduler_mut().set_yield_every(n);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn container(&self) -> HostId {
        self.container
    }

    /// Committed host tree as markup.
    pub fn snapshot(&self) -> String {
        self.reconciler.host().snapshot(self.container)
    }

    pub fn ops(&self) -> &[HostOp] {
        self.reconciler.host().ops()
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        self.reconciler.host_mut().take_ops()
    }

    /// Host ops that changed the attached tree since the last `take_ops`.
    pub fn take_mutations(&mut self) -> Vec<HostOp> {
        self.take_ops()
            .into_iter()
            .filter(HostOp::is_mutation)
            .collect()
    }

    pub fn host(&self) -> &RecordingHost {
        self.reconciler.host()
    }

    pub fn scheduler(&self) -> &TestScheduler {
        self.reconciler.scheduler()
    }

    pub fn arena(&self) -> &FiberArena<HostId> {
        match self.reconciler.arena(self.root) {
            Some(arena) => arena,
            None => panic!("root {:?} was unmounted", self.root),
        }
    }

    pub fn root_lanes(&self) -> &RootLanes {
        match self.reconciler.root_lanes(self.root) {
            Some(lanes) => lanes,
            None => panic!("root {:?} was unmounted", self.root),
        }
    }

    pub fn trace(&self) -> &RenderTrace {
        self.reconciler.trace()
    }

    pub fn reconciler(&self) -> &TestReconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut TestReconciler {
        &mut self.reconciler
    }
}

/// A value that is not ready until the test says so. Components call
/// [`Resource::read`] and suspend on the resource's wakeable until
/// [`Resource::resolve`] is called.
#[derive(Debug, Clone)]
pub struct Resource {
    wakeable: Wakeable,
    ready: Rc<Cell<bool>>,
}

impl Resource {
    pub fn new(id: u64) -> Self {
        Self {
            wakeable: Wakeable::new(id),
            ready: Rc::new(Cell::new(false)),
        }
    }

    pub fn wakeable(&self) -> Wakeable {
        self.wakeable
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Succeed if ready, otherwise suspend.
    pub fn read(&self) -> Result<(), Thrown> {
        if self.ready.get() {
            Ok(())
        } else {
            Err(Thrown::Suspend(self.wakeable))
        }
    }

    /// Mark ready and ping the reconciler.
    pub fn resolve(&self, renderer: &mut TestRenderer) {
        self.ready.set(true);
        renderer.resolve(self.wakeable);
    }
}
