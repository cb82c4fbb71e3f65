//! # Commit Pipeline Tests
//!
//! Phase ordering, effect timing, and unmount cleanup, observed through a
//! shared [`EventLog`] that both the recording host and component effects
//! write to.

use arbor_core::{ComponentType, PropValue, RenderError, component, host, text};
use arbor_harness::{EventLog, TestRenderer};

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry:?} not in log: {log:#?}"))
}

/// A component that logs each of its effects, tagged with its `label`
/// attribute.
fn logged(log: &EventLog) -> ComponentType {
    let log = log.clone();
    ComponentType::new("Logged", move |props, cx| {
        let label = match props.attr("label") {
            Some(PropValue::Str(s)) => s.to_string(),
            _ => String::from("?"),
        };
        let effect = |kind: &str| {
            let log = log.clone();
            let entry = format!("{kind} {label}");
            move || -> Result<(), RenderError> {
                log.push(entry.clone());
                Ok(())
            }
        };
        cx.snapshot_effect(effect("snapshot"));
        cx.layout_effect(effect("layout"));
        cx.passive_effect(effect("passive"));
        cx.on_unmount(effect("unmount"));
        Ok(host("div").child(text(&label)).build())
    })
}

// =============================================================================
// Phase order
// =============================================================================

#[test]
fn phases_run_in_order() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::with_log(log.clone());
    r.render(component(&ty).attr("label", "a").build());

    let entries = log.take();
    let before = position(&entries, "phase before-mutation");
    let snapshot = position(&entries, "snapshot a");
    let mutation = position(&entries, "phase mutation");
    let swapped = position(&entries, "phase current-swapped");
    let layout_phase = position(&entries, "phase layout");
    let layout = position(&entries, "layout a");
    let passive_phase = position(&entries, "phase passive");
    let passive = position(&entries, "passive a");

    assert!(before < snapshot && snapshot < mutation);
    assert!(mutation < swapped && swapped < layout_phase);
    assert!(layout_phase < layout && layout < passive_phase);
    assert!(passive_phase < passive);

    // Host nodes are built during render, children first, before the
    // commit starts. The container is #0.
    assert!(position(&entries, "create #1 \"a\"") < position(&entries, "create #2 <div>"));
    assert!(position(&entries, "append_initial #2 #1") < before);
    let attach = position(&entries, "append #0 #2");
    assert!(mutation < attach && attach < swapped);
}

// =============================================================================
// Effect timing
// =============================================================================

/// Passive effects wait for their own task.
#[test]
fn passive_effects_are_deferred() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::new();
    r.update(component(&ty).attr("label", "a").build());
    r.flush_microtasks();

    assert!(r.run_next_task(), "render task");
    assert_eq!(r.snapshot(), "<div>a</div>");
    assert!(log.entries().contains(&"layout a".to_string()));
    assert!(!log.entries().contains(&"passive a".to_string()));
    assert!(r.reconciler().has_pending_passive_effects());

    assert!(r.run_next_task(), "passive task");
    assert!(log.entries().contains(&"passive a".to_string()));
    assert!(!r.reconciler().has_pending_passive_effects());
    assert_eq!(r.trace().count("passive_effects_flushed"), 1);
}

/// Pending passive effects of one commit run before the next commit
/// starts.
#[test]
fn pending_passive_effects_flush_before_next_commit() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::new();
    let root = r.root();
    r.update(component(&ty).attr("label", "a").build());
    r.flush_microtasks();
    r.run_next_task();
    assert!(r.reconciler().has_pending_passive_effects());
    log.take();

    let next = component(&ty).attr("label", "b").build();
    r.reconciler_mut()
        .flush_sync(|rec| rec.update_container(root, next))
        .expect("root exists");
    let entries = log.take();
    assert!(position(&entries, "passive a") < position(&entries, "layout b"));
    assert_eq!(r.snapshot(), "<div>b</div>");
}

/// `flush_passive_effects` runs them on demand and reports whether there
/// were any.
#[test]
fn explicit_passive_flush() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::new();
    r.update(component(&ty).attr("label", "a").build());
    r.flush_microtasks();
    r.run_next_task();

    assert!(r.reconciler_mut().flush_passive_effects());
    assert!(!r.reconciler_mut().flush_passive_effects());
    assert!(log.entries().contains(&"passive a".to_string()));
    assert_eq!(r.scheduler().cancelled().len(), 1, "passive task cancelled");
}

// =============================================================================
// Unmount
// =============================================================================

#[test]
fn deletion_runs_unmount_effects() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::new();
    r.render(
        host("section")
            .child(component(&ty).key("x").attr("label", "x"))
            .child(component(&ty).key("y").attr("label", "y"))
            .build(),
    );
    log.take();

    r.render(
        host("section")
            .child(component(&ty).key("y").attr("label", "y"))
            .build(),
    );
    let entries = log.take();
    assert!(entries.contains(&"unmount x".to_string()));
    assert!(!entries.contains(&"unmount y".to_string()));
    assert_eq!(r.snapshot(), "<section><div>y</div></section>");
}

#[test]
fn unmount_container_cleans_up_everything() {
    let log = EventLog::new();
    let ty = logged(&log);
    let mut r = TestRenderer::new();
    let root = r.root();
    r.render(
        host("main")
            .child(component(&ty).key("x").attr("label", "x"))
            .child(component(&ty).key("y").attr("label", "y"))
            .build(),
    );
    log.take();

    r.reconciler_mut()
        .unmount_container(root)
        .expect("root exists");
    let entries = log.take();
    assert!(entries.contains(&"unmount x".to_string()));
    assert!(entries.contains(&"unmount y".to_string()));
    assert_eq!(r.snapshot(), "");
    assert_eq!(r.reconciler().roots().count(), 0);
}

/// Roots are independent: unmounting one leaves the other rendered.
#[test]
fn roots_are_independent() {
    let mut r = TestRenderer::new();
    let (other, other_container) = r.create_root();
    r.render(text("first"));
    r.reconciler_mut()
        .update_container(other, text("second"))
        .expect("root exists");
    r.flush_all();

    assert_eq!(r.host().snapshot(other_container), "second");
    r.reconciler_mut()
        .unmount_container(other)
        .expect("root exists");
    assert_eq!(r.snapshot(), "first");
    assert_eq!(r.host().snapshot(other_container), "");
}
