//! # Suspense Tests
//!
//! Components read [`Resource`]s that suspend until the test resolves them.
//! Covers fallback commit, retry after resolution, the fallback throttle,
//! and suspension with no boundary.

use std::time::Duration;

use arbor_core::{ComponentType, Node, component, host, suspense, text};
use arbor_harness::{Resource, TestRenderer};
use arbor_reconciler::{TraceEvent, WorkPhase};

/// A component that renders `label` once `resource` is ready.
fn reader(name: &str, resource: &Resource, label: &str) -> ComponentType {
    let resource = resource.clone();
    let label = label.to_string();
    ComponentType::new(name, move |_, _| {
        resource.read()?;
        Ok(text(&label))
    })
}

fn boundary(children: impl IntoIterator<Item = Node>) -> Node {
    suspense()
        .fallback("loading")
        .children(children)
        .build()
}

// =============================================================================
// Fallback and retry
// =============================================================================

#[test]
fn fallback_then_content_after_resolve() {
    let data = Resource::new(1);
    let view = reader("View", &data, "loaded");

    let mut r = TestRenderer::new();
    r.render(boundary([component(&view).build()]));
    assert_eq!(r.snapshot(), "loading");

    data.resolve(&mut r);
    assert_eq!(r.trace().count("retry_scheduled"), 1);
    r.flush_all();
    assert_eq!(r.snapshot(), "loaded");
    assert!(r.root_lanes().pending.is_empty());
}

/// A root holds a wakeable only while a boundary waits on it; the retry
/// commit releases it.
#[test]
fn retry_commit_releases_wakeable() {
    let data = Resource::new(3);
    let view = reader("View", &data, "loaded");

    let mut r = TestRenderer::new();
    let root = r.root();
    r.render(boundary([component(&view).build()]));
    assert_eq!(r.reconciler().tracked_wakeables(root), 1);

    data.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.snapshot(), "loaded");
    assert_eq!(r.reconciler().tracked_wakeables(root), 0);
}

/// Deleting a waiting boundary drops its wakeable, so a later resolution
/// has nothing to retry.
#[test]
fn deleted_boundary_releases_wakeable() {
    let data = Resource::new(4);
    let view = reader("View", &data, "never");

    let mut r = TestRenderer::new();
    let root = r.root();
    r.render(boundary([component(&view).build()]));
    assert_eq!(r.reconciler().tracked_wakeables(root), 1);

    r.render(text("gone"));
    assert_eq!(r.reconciler().tracked_wakeables(root), 0);

    data.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.trace().count("retry_scheduled"), 0);
    assert_eq!(r.reconciler().tracked_wakeables(root), 0);
    assert_eq!(r.snapshot(), "gone");

    r.reconciler_mut()
        .unmount_container(root)
        .expect("root exists");
    assert_eq!(r.reconciler().tracked_wakeables(root), 0);
}

/// Content outside the boundary commits while the boundary shows its
/// fallback.
#[test]
fn siblings_outside_boundary_commit() {
    let data = Resource::new(2);
    let view = reader("View", &data, "body");

    let mut r = TestRenderer::new();
    r.render(
        host("main")
            .child(host("h1").child("title"))
            .child(boundary([component(&view).build()]))
            .build(),
    );
    assert_eq!(r.snapshot(), "<main><h1>title</h1>loading</main>");

    data.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.snapshot(), "<main><h1>title</h1>body</main>");
}

/// A wakeable that resolves while the render that suspended on it is
/// paused gets its retry scheduled at commit instead of waiting for
/// another ping.
#[test]
fn resolved_before_commit_retries_immediately() {
    let data = Resource::new(3);
    let view = reader("View", &data, "done");

    let mut r = TestRenderer::new();
    // Root, boundary, primary fragment, then the suspending view.
    r.set_yield_every(Some(4));
    r.update_in_transition(boundary([component(&view).build()]));
    assert!(r.run_next_task());
    assert!(matches!(
        r.reconciler().work_phase(),
        WorkPhase::Rendering { .. }
    ));

    data.resolve(&mut r);
    assert_eq!(r.trace().count("retry_scheduled"), 0);
    r.flush_all();
    assert_eq!(r.trace().count("retry_scheduled"), 1);
    assert_eq!(r.snapshot(), "done");
}

// =============================================================================
// Throttle
// =============================================================================

/// A retry that suspends again soon after the fallback appeared is held
/// back until the fallback has been visible for the throttle window.
#[test]
fn retry_commit_is_throttled() {
    let a = Resource::new(10);
    let b = Resource::new(11);
    let view_a = reader("A", &a, "A");
    let view_b = reader("B", &b, "B");

    let mut r = TestRenderer::new();
    r.render(boundary([
        component(&view_a).build(),
        component(&view_b).build(),
    ]));
    assert_eq!(r.snapshot(), "loading");
    let commits = r.trace().count("commit_finished");

    a.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.trace().count("commit_throttled"), 1);
    let delay = r.trace().events().find_map(|e| match e {
        TraceEvent::CommitThrottled { delay, .. } => Some(*delay),
        _ => None,
    });
    assert_eq!(delay, Some(Duration::from_millis(300)));
    assert!(matches!(
        r.reconciler().work_phase(),
        WorkPhase::CommitThrottled { .. }
    ));
    assert_eq!(r.trace().count("commit_finished"), commits);

    r.advance_time(Duration::from_millis(300));
    assert_eq!(r.trace().count("commit_finished"), commits + 1);
    assert_eq!(r.snapshot(), "loading");

    b.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.snapshot(), "AB");
}

// =============================================================================
// No boundary
// =============================================================================

/// Suspending with no boundary commits nothing and parks the lanes until
/// the wakeable resolves.
#[test]
fn shell_suspension_waits_for_ping() {
    let data = Resource::new(20);
    let view = reader("View", &data, "ready");

    let mut r = TestRenderer::new();
    r.render(component(&view).build());
    assert_eq!(r.snapshot(), "");
    assert_eq!(r.trace().count("commit_started"), 0);
    assert!(!r.root_lanes().suspended.is_empty());
    assert!(r.scheduler().tasks().is_empty(), "parked lanes get no task");

    data.resolve(&mut r);
    assert_eq!(r.trace().count("pinged"), 1);
    r.flush_all();
    assert_eq!(r.snapshot(), "ready");
}

/// A transition that would replace visible content with a fallback is not
/// committed; the old content stays until the data arrives.
#[test]
fn transition_keeps_visible_content() {
    let data = Resource::new(30);
    let view = reader("View", &data, "new");

    let mut r = TestRenderer::new();
    r.render(boundary([text("old")]));
    assert_eq!(r.snapshot(), "old");

    r.update_in_transition(boundary([component(&view).build()]));
    r.flush_all();
    assert_eq!(r.snapshot(), "old");
    assert!(r.trace().events().any(|e| matches!(
        e,
        TraceEvent::RenderFinished { status, .. }
            if *status == arbor_reconciler::RootExitStatus::SuspendedWithDelay
    )));

    data.resolve(&mut r);
    r.flush_all();
    assert_eq!(r.snapshot(), "new");
}
