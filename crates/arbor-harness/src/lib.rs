#![forbid(unsafe_code)]

//! Deterministic test tooling for the arbor reconciler.
//!
//! - **Recording host**: an in-memory host tree that logs every call and
//!   renders itself as compact markup for snapshot assertions.
//! - **Test scheduler**: a virtual clock with a priority task queue, timers,
//!   microtask requests, and a configurable yield budget.
//! - **Test renderer**: drives one root through both, one microtask or task
//!   at a time.
//!
//! # Quick Start
//!
//! ```ignore
//! use arbor_core::host;
//! use arbor_harness::TestRenderer;
//!
//! #[test]
//! fn renders_a_div() {
//!     let mut r = TestRenderer::new();
//!     r.render(host("div").attr("id", "a").child("hi").build());
//!     assert_eq!(r.snapshot(), r#"<div id="a">hi</div>"#);
//! }
//! ```

pub mod host;
pub mod renderer;
pub mod scheduler;

pub use host::{EventLog, HostId, HostOp, RecordingHost};
pub use renderer::{MAX_FLUSH_STEPS, Resource, TestReconciler, TestRenderer};
pub use scheduler::{ScheduledTask, TestScheduler};

