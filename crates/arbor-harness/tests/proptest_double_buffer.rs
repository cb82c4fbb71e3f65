//! Property-based tests over whole render/commit cycles.
//!
//! Verifies:
//! - every tree position holds at most two buffers, whatever the history
//! - positions of deleted subtrees are reclaimed after commit
//! - the committed host tree always matches the last rendered list
//! - a render interrupted at any point still commits the right result

use arbor_core::{Lanes, Node, host};
use arbor_harness::TestRenderer;
use proptest::prelude::*;

const KEYS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn key_list() -> impl Strategy<Value = Vec<&'static str>> {
    proptest::sample::subsequence(KEYS.to_vec(), 0..=KEYS.len()).prop_shuffle()
}

fn render_list(keys: &[&str]) -> Node {
    host("ul")
        .children(keys.iter().map(|k| host("li").key(*k).child(*k).build()))
        .build()
}

fn expected_markup(keys: &[&str]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

/// Positions: root, `ul`, and one `li` plus one text per key.
fn expected_positions(keys: &[&str]) -> usize {
    2 + 2 * keys.len()
}

// ═════════════════════════════════════════════════════════════════════════
// Buffers
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn positions_hold_at_most_two_buffers(history in prop::collection::vec(key_list(), 1..8)) {
        init_logging();
        let mut r = TestRenderer::new();
        for keys in &history {
            r.render(render_list(keys));

            let arena = r.arena();
            for (_, position) in arena.positions() {
                prop_assert!(position.buffer_count() <= 2);
            }
            prop_assert_eq!(arena.len(), expected_positions(keys));
            prop_assert_eq!(r.snapshot(), expected_markup(keys));
        }
    }

    #[test]
    fn interrupted_render_commits_latest(
        first in key_list(),
        second in key_list(),
        urgent in key_list(),
        slice in 1usize..6,
    ) {
        let mut r = TestRenderer::new();
        r.render(render_list(&first));

        r.set_yield_every(Some(slice));
        r.update_in_transition(render_list(&second));
        r.run_next_task();
        r.update_at(arbor_core::EventPriority::Discrete, render_list(&urgent));
        r.flush_all();

        prop_assert_eq!(r.snapshot(), expected_markup(&urgent));
        prop_assert_eq!(r.root_lanes().pending, Lanes::NONE);
        for (_, position) in r.arena().positions() {
            prop_assert!(position.buffer_count() <= 2);
        }
    }
}
