#![forbid(unsafe_code)]

//! Arbor Reconciler
//!
//! Turns declarative element trees into host mutations, cooperatively and
//! by priority.
//!
//! # Key Components
//!
//! - [`Reconciler`] - Roots, update entry points, host task dispatch
//! - [`ReconcilerConfig`] - Timeouts, throttles, time-slicing policy
//! - [`RenderTrace`] - Bounded log of scheduling, render, and commit events
//! - [`ReconcilerError`] - API misuse
//!
//! # How it fits in the system
//! `arbor-core` defines the data model: lanes, the fiber arena, elements,
//! and the host traits. This crate drives it. Updates are assigned lanes and
//! queued; the root scheduler asks the host for tasks; the work loop renders
//! a work-in-progress tree one fiber at a time, yielding when the host says
//! so; the commit pipeline applies the finished tree and makes it current.
//!
//! ```text
//!   update ──► lanes ──► root schedule ──► host task
//!                                             │
//!                         ┌───────────────────┘
//!                         ▼
//!   begin ─► reconcile children ─► complete ─► ... ─► commit ─► current
//!     ▲                                │
//!     └──── unwind to boundary ◄── thrown
//! ```

mod begin_work;
mod child_reconciler;
mod commit;
mod complete_work;
pub mod config;
pub mod error;
mod reconciler;
mod root;
mod root_scheduler;
pub mod trace;
mod unwind;
mod work_loop;

pub use config::ReconcilerConfig;
pub use error::{ReconcilerError, ReconcilerResult};
pub use reconciler::{Reconciler, WorkPhase};
pub use trace::{RenderTrace, TraceEntry, TraceEvent};
pub use work_loop::RootExitStatus;
