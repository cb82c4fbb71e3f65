#![forbid(unsafe_code)]

//! Commit pipeline.
//!
//! A commit applies a finished tree to the host in fixed phases:
//!
//! ```text
//!   flush leftover passive effects
//!   before-mutation   snapshot effects read pre-commit host state
//!   mutation          deletions, then children, then own placement/update
//!   ── finished tree becomes current ──
//!   layout            layout effects, bottom-up
//!   (later task)      passive effects
//! ```
//!
//! Each phase walks only the subtrees whose `subtree_flags` intersect the
//! phase mask and clears the flags it consumed. Effect failures do not abort
//! a phase; they are collected and routed to the nearest error boundary
//! afterwards, as a sync update.
//!
//! # Invariants
//!
//! - All host mutations happen before the tree swap; all layout effects run
//!   after it.
//! - Inside a subtree, deletions come before child work and child work
//!   before the parent's own placement.
//! - Deleting a subtree removes only its top-most host nodes from the host
//!   parent, but detaches every host node and runs every unmount effect in
//!   it.

use std::rc::Rc;

use arbor_core::{
    CapturedError, CommitPhase, EffectKind, FiberId, FiberKind, Flags, HostConfig, HostScheduler,
    Lanes, Node, PositionKey, RenderError, RootId, SchedulerPriority, Task, Update, Wakeable,
};

use crate::root::FiberRoot;
use crate::trace::TraceEvent;
use crate::reconciler::{ExecutionContext, PendingPassive, Reconciler};

/// An effect failure and where to start looking for a boundary.
pub(crate) struct CommitError {
    pub(crate) search_from: Option<FiberId>,
    pub(crate) error: RenderError,
}

/// Borrowed view used by the commit phases.
pub(crate) struct CommitPass<'a, H: HostConfig> {
    host: &'a mut H,
    root: &'a mut FiberRoot<H::Instance>,
    now: std::time::Duration,
    pub(crate) errors: Vec<CommitError>,
    /// Suspense boundaries that must retry when a wakeable resolves.
    pub(crate) retries: Vec<(PositionKey, Wakeable)>,
}

impl<'a, H: HostConfig> CommitPass<'a, H> {
    pub(crate) fn new(
        host: &'a mut H,
        root: &'a mut FiberRoot<H::Instance>,
        now: std::time::Duration,
    ) -> Self {
        Self {
            host,
            root,
            now,
            errors: Vec::new(),
            retries: Vec::new(),
        }
    }

    fn run_effects(&mut self, fiber: FiberId, kind: EffectKind, search_from: Option<FiberId>) {
        let effects: Vec<_> = self.root.arena[fiber]
            .effects
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        for effect in effects {
            if let Err(error) = effect.run() {
                tracing::debug!(%error, ?kind, "effect failed");
                self.errors.push(CommitError { search_from, error });
            }
        }
    }

    // =========================================================================
    // Before mutation
    // =========================================================================

    pub(crate) fn commit_before_mutation(&mut self, fiber: FiberId) {
        if self.root.arena[fiber]
            .subtree_flags
            .intersects(Flags::BEFORE_MUTATION_MASK)
        {
            let mut child = self.root.arena[fiber].child;
            while let Some(c) = child {
                self.commit_before_mutation(c);
                child = self.root.arena[c].sibling;
            }
        }
        if self.root.arena[fiber].flags.contains(Flags::SNAPSHOT) {
            let from = self.root.arena[fiber].return_fiber;
            self.run_effects(fiber, EffectKind::Snapshot, from);
        }
        let node = &mut self.root.arena[fiber];
        node.flags.remove(Flags::SNAPSHOT);
        node.subtree_flags.remove(Flags::BEFORE_MUTATION_MASK);
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    pub(crate) fn commit_mutation(&mut self, fiber: FiberId) {
        let deletions = std::mem::take(&mut self.root.arena[fiber].deletions);
        for deleted in deletions {
            self.commit_deletion(fiber, deleted);
        }

        if self.root.arena[fiber]
            .subtree_flags
            .intersects(Flags::MUTATION_MASK)
        {
            let mut child = self.root.arena[fiber].child;
            while let Some(c) = child {
                self.commit_mutation(c);
                child = self.root.arena[c].sibling;
            }
        }

        let flags = self.root.arena[fiber].flags;
        if flags.contains(Flags::PLACEMENT) {
            self.commit_placement(fiber);
        }
        if flags.contains(Flags::UPDATE) {
            self.commit_update(fiber);
        }
        if matches!(self.root.arena.kind(fiber), FiberKind::Suspense) {
            if flags.contains(Flags::VISIBILITY) && self.root.arena[fiber].showing_fallback {
                self.root.most_recent_fallback_time = Some(self.now);
            }
            if flags.contains(Flags::RETRY) {
                let queue = std::mem::take(&mut self.root.arena[fiber].retry_queue);
                self.retries
                    .extend(queue.into_iter().map(|w| (fiber.position, w)));
            }
        }

        let node = &mut self.root.arena[fiber];
        node.flags.remove(Flags::MUTATION_MASK);
        node.subtree_flags.remove(Flags::MUTATION_MASK);
    }

    fn commit_update(&mut self, fiber: FiberId) {
        let arena = &self.root.arena;
        let Some(instance) = arena.state_node(fiber) else {
            return;
        };
        let old = arena.alternate(fiber).map(|c| &arena[c].memoized_props);
        let new = &arena[fiber].memoized_props;
        match arena.kind(fiber) {
            FiberKind::HostComponent(tag) => {
                let (Some(old), Some(new)) = (old.and_then(|p| p.as_element()), new.as_element())
                else {
                    return;
                };
                self.host.commit_update(instance, tag, old, new);
            }
            FiberKind::HostText => {
                let old = old.and_then(|p| p.as_text()).unwrap_or_default();
                let new = new.as_text().unwrap_or_default();
                self.host.commit_text_update(instance, old, new);
            }
            _ => {}
        }
    }

    /// Nearest ancestor whose instance can parent host nodes.
    fn host_parent_fiber(&self, fiber: FiberId) -> Option<FiberId> {
        let mut node = self.root.arena[fiber].return_fiber;
        while let Some(id) = node {
            if self.root.arena.kind(id).is_host_parent() {
                return Some(id);
            }
            node = self.root.arena[id].return_fiber;
        }
        None
    }

    fn commit_placement(&mut self, fiber: FiberId) {
        let Some(parent_fiber) = self.host_parent_fiber(fiber) else {
            return;
        };
        let Some(parent) = self.root.host_parent_instance(parent_fiber).cloned() else {
            return;
        };
        let before = self.host_sibling(fiber);
        self.insert_or_append(fiber, before.as_ref(), &parent);
    }

    /// The host node `fiber`'s host nodes must be inserted before, if any:
    /// the first following host node that is already in place.
    fn host_sibling(&mut self, fiber: FiberId) -> Option<H::Instance> {
        let arena = &mut self.root.arena;
        let mut node = fiber;
        'siblings: loop {
            while arena[node].sibling.is_none() {
                match arena[node].return_fiber {
                    Some(parent) if !arena.kind(parent).is_host_parent() => node = parent,
                    _ => return None,
                }
            }
            let parent = arena[node].return_fiber;
            let Some(sibling) = arena[node].sibling else {
                return None;
            };
            arena[sibling].return_fiber = parent;
            node = sibling;

            while !arena.kind(node).is_host() {
                if arena[node].flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                let Some(child) = arena[node].child else {
                    continue 'siblings;
                };
                arena[child].return_fiber = Some(node);
                node = child;
            }
            if !arena[node].flags.contains(Flags::PLACEMENT) {
                return arena.state_node(node).cloned();
            }
        }
    }

    fn insert_or_append(
        &mut self,
        fiber: FiberId,
        before: Option<&H::Instance>,
        parent: &H::Instance,
    ) {
        if self.root.arena.kind(fiber).is_host() {
            let Some(instance) = self.root.arena.state_node(fiber) else {
                return;
            };
            match before {
                Some(before) => self.host.insert_before(parent, instance, before),
                None => self.host.append_child(parent, instance),
            }
            return;
        }
        let mut child = self.root.arena[fiber].child;
        while let Some(c) = child {
            self.insert_or_append(c, before, parent);
            child = self.root.arena[c].sibling;
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    fn commit_deletion(&mut self, parent_fiber: FiberId, deleted: FiberId) {
        let mut host_parent = None;
        let mut node = Some(parent_fiber);
        while let Some(id) = node {
            if let Some(instance) = self.root.host_parent_instance(id) {
                host_parent = Some(instance.clone());
                break;
            }
            node = self.root.arena[id].return_fiber;
        }
        self.commit_deletion_effects(parent_fiber, deleted, host_parent.as_ref());
    }

    /// Remove and detach a deleted subtree. Only nodes that are direct host
    /// children of `host_parent` are removed from it.
    fn commit_deletion_effects(
        &mut self,
        nearest_mounted: FiberId,
        fiber: FiberId,
        host_parent: Option<&H::Instance>,
    ) {
        let kind = self.root.arena.kind(fiber).clone();
        if kind.is_host() {
            let mut child = self.root.arena[fiber].child;
            while let Some(c) = child {
                self.commit_deletion_effects(nearest_mounted, c, None);
                child = self.root.arena[c].sibling;
            }
            if let Some(instance) = self.root.arena.state_node(fiber) {
                if let Some(parent) = host_parent {
                    self.host.remove_child(parent, instance);
                }
                self.host.detach_deleted_instance(instance);
            }
            return;
        }

        if matches!(kind, FiberKind::FunctionComponent(_))
            && self.root.arena[fiber].flags.contains(Flags::UNMOUNT_STATIC)
        {
            self.run_effects(fiber, EffectKind::Unmount, Some(nearest_mounted));
        }
        let mut child = self.root.arena[fiber].child;
        while let Some(c) = child {
            self.commit_deletion_effects(nearest_mounted, c, host_parent);
            child = self.root.arena[c].sibling;
        }
    }

    // =========================================================================
    // Layout and passive
    // =========================================================================

    pub(crate) fn commit_layout(&mut self, fiber: FiberId) {
        if self.root.arena[fiber]
            .subtree_flags
            .intersects(Flags::LAYOUT_MASK)
        {
            let mut child = self.root.arena[fiber].child;
            while let Some(c) = child {
                self.commit_layout(c);
                child = self.root.arena[c].sibling;
            }
        }
        if self.root.arena[fiber].flags.contains(Flags::CALLBACK) {
            let from = self.root.arena[fiber].return_fiber;
            self.run_effects(fiber, EffectKind::Layout, from);
        }
        let node = &mut self.root.arena[fiber];
        node.flags.remove(Flags::LAYOUT_MASK);
        node.subtree_flags.remove(Flags::LAYOUT_MASK);
    }

    pub(crate) fn commit_passive(&mut self, fiber: FiberId) {
        if self.root.arena[fiber]
            .subtree_flags
            .intersects(Flags::PASSIVE_MASK)
        {
            let mut child = self.root.arena[fiber].child;
            while let Some(c) = child {
                self.commit_passive(c);
                child = self.root.arena[c].sibling;
            }
        }
        if self.root.arena[fiber].flags.contains(Flags::PASSIVE) {
            let from = self.root.arena[fiber].return_fiber;
            self.run_effects(fiber, EffectKind::Passive, from);
        }
        let node = &mut self.root.arena[fiber];
        node.flags.remove(Flags::PASSIVE_MASK);
        node.subtree_flags.remove(Flags::PASSIVE_MASK);
    }
}

impl<H: HostConfig, S: HostScheduler> Reconciler<H, S> {
    /// Apply a finished tree to the host and make it current.
    pub(crate) fn commit_root(
        &mut self,
        root_id: RootId,
        finished: FiberId,
        lanes: Lanes,
        uncaught: Vec<RenderError>,
    ) {
        let previous = self.execution;
        self.execution |= ExecutionContext::COMMIT;
        while self.flush_passive_effects() {}

        self.record(TraceEvent::CommitStarted {
            root: root_id,
            lanes,
        });
        let _span = tracing::debug_span!("commit", root = ?root_id, %lanes).entered();

        // Updates queued after the render ended are still pending.
        let queued: Lanes = self
            .concurrent_updates
            .iter()
            .filter(|u| u.root == root_id)
            .fold(Lanes::NONE, |acc, u| acc | u.lane);
        let now = self.scheduler.now();

        let Some(root) = self.roots.get_mut(root_id) else {
            self.execution = previous;
            return;
        };
        if !root.arena.contains(finished) {
            tracing::warn!(root = ?root_id, "finished tree was reclaimed before commit");
            self.execution = previous;
            return;
        }

        root.callback_node = None;
        root.callback_priority = Lanes::NONE;
        let remaining = root.arena[finished].lanes | root.arena[finished].child_lanes | queued;
        root.lanes.mark_finished(remaining);

        let container = root.container.clone();
        let (errors, retries) = {
            let mut pass = CommitPass::new(&mut self.host, root, now);
            pass.host.on_commit_phase(CommitPhase::BeforeMutation);
            pass.host.prepare_for_commit(&container);
            pass.commit_before_mutation(finished);

            pass.host.on_commit_phase(CommitPhase::Mutation);
            pass.commit_mutation(finished);
            pass.host.reset_after_commit(&container);

            pass.root.current = finished;
            pass.host.on_commit_phase(CommitPhase::CurrentSwapped);

            pass.host.on_commit_phase(CommitPhase::Layout);
            pass.commit_layout(finished);
            (pass.errors, pass.retries)
        };

        let Some(root) = self.roots.get_mut(root_id) else {
            self.execution = previous;
            return;
        };
        let has_passive = (root.arena[finished].flags | root.arena[finished].subtree_flags)
            .intersects(Flags::PASSIVE_MASK);
        let reclaimed = root.arena.sweep([finished]);
        root.prune_wakeables();
        tracing::trace!(reclaimed, "swept arena after commit");

        if has_passive {
            self.pending_passive = Some(PendingPassive {
                root: root_id,
                finished,
            });
            if self.passive_task.is_none() {
                self.passive_task = Some(
                    self.scheduler
                        .schedule_task(SchedulerPriority::Normal, Task::FlushPassiveEffects),
                );
            }
        }

        self.execution = previous;
        self.record(TraceEvent::CommitFinished { root: root_id });

        for error in uncaught {
            tracing::error!(%error, "uncaught render error");
            self.uncaught_errors.push(error);
        }
        for (position, wakeable) in retries {
            self.attach_retry(root_id, position, wakeable);
        }
        self.release_resolved(root_id);
        self.capture_commit_errors(root_id, errors);

        self.ensure_root_is_scheduled(root_id);
        self.flush_sync_work_on_all_roots();
    }

    /// Run passive effects of the last commit now instead of waiting for
    /// their task. Returns whether there were any.
    pub fn flush_passive_effects(&mut self) -> bool {
        let Some(pending) = self.pending_passive.take() else {
            return false;
        };
        if let Some(handle) = self.passive_task.take() {
            self.scheduler.cancel_task(handle);
        }
        let now = self.scheduler.now();
        let Some(root) = self.roots.get_mut(pending.root) else {
            return true;
        };
        if !root.arena.contains(pending.finished) {
            return true;
        }

        let previous = self.execution;
        self.execution |= ExecutionContext::COMMIT;
        let errors = {
            let mut pass = CommitPass::new(&mut self.host, root, now);
            pass.host.on_commit_phase(CommitPhase::Passive);
            pass.commit_passive(pending.finished);
            pass.errors
        };
        self.execution = previous;

        self.record(TraceEvent::PassiveEffectsFlushed { root: pending.root });
        self.capture_commit_errors(pending.root, errors);
        self.flush_sync_work_on_all_roots();
        true
    }

    /// Retry `boundary` when `wakeable` resolves, or now if it already has.
    fn attach_retry(&mut self, root_id: RootId, boundary: PositionKey, wakeable: Wakeable) {
        let resolved = self
            .roots
            .get(root_id)
            .is_some_and(|r| r.resolved.contains(&wakeable));
        if resolved {
            self.retry_boundary(root_id, boundary);
            return;
        }
        if let Some(root) = self.roots.get_mut(root_id) {
            let boundaries = root.retry_cache.entry(wakeable).or_default();
            if !boundaries.contains(&boundary) {
                boundaries.push(boundary);
            }
        }
    }

    /// Route effect failures to the nearest error boundary, or reset the
    /// root and report them as uncaught.
    fn capture_commit_errors(&mut self, root_id: RootId, errors: Vec<CommitError>) {
        for CommitError { search_from, error } in errors {
            let Some(root) = self.roots.get(root_id) else {
                return;
            };
            match root.find_error_boundary(search_from) {
                Some(boundary) => {
                    let update = Update::replace(Lanes::SYNC, Rc::new(CapturedError(error)));
                    self.schedule_update(root_id, boundary.position, Some(update), Lanes::SYNC);
                }
                None => {
                    tracing::error!(%error, "uncaught commit error");
                    self.uncaught_errors.push(error);
                    let position = root.current.position;
                    let update = Update::replace(Lanes::SYNC, Rc::new(Node::Empty));
                    self.schedule_update(root_id, position, Some(update), Lanes::SYNC);
                }
            }
        }
    }
}
