#![forbid(unsafe_code)]

//! Core data model for the arbor reconciler.
//!
//! - [`lane`]: priority lanes and their algebra.
//! - [`root_lanes`]: per-root pending/suspended/expired bookkeeping.
//! - [`fiber`]: the double-buffered fiber arena.
//! - [`element`]: the declarative element model.
//! - [`update_queue`]: lane-aware state update queues.
//! - [`host`]: host adapter and host scheduler traits.

pub mod cx;
pub mod element;
pub mod error;
pub mod fiber;
pub mod flags;
pub mod host;
pub mod id;
pub mod lane;
pub mod root_lanes;
pub mod update_queue;
pub mod wakeable;

pub use cx::{Effect, EffectKind, RenderCx};
pub use element::{
    BoundaryType, ComponentType, Element, ElementBuilder, ElementType, Key, Node, PropValue,
    Props, component, error_boundary, fragment, host, list, suspense, text,
};
pub use error::{RenderError, Thrown};
pub use fiber::{Fiber, FiberArena, FiberId, FiberKind, FiberProps, Slot};
pub use flags::Flags;
pub use host::{CommitPhase, HostConfig, HostScheduler, Task, TaskStatus};
pub use id::{FiberHandle, PositionKey, RootId, TaskHandle};
pub use lane::{EventPriority, Lane, LaneConfig, LaneCursor, Lanes, SchedulerPriority};
pub use root_lanes::RootLanes;
pub use update_queue::{CapturedError, StateValue, Update, UpdateQueue};
pub use wakeable::Wakeable;
