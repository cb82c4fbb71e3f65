#![forbid(unsafe_code)]

//! State update queues with lane-aware rebasing.
//!
//! Each fiber buffer keeps a *base state* and a list of *base updates*:
//! the updates that still have to be applied on top of that base state.
//! Processing applies every update whose lane is being rendered. The first
//! skipped update freezes the new base state, and every update after it is
//! kept (even ones that were applied) so that a later render at the skipped
//! lane replays them in their original order.
//!
//! # Invariants
//!
//! - Processing the same queue twice at the same lanes yields the same
//!   state.
//! - Update order is preserved across skips.
//! - An update kept only for replay carries [`Lanes::NONE`], so every later
//!   render applies it.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::RenderError;
use crate::lane::{Lane, Lanes};

/// Opaque state stored on a fiber.
pub type StateValue = Rc<dyn Any>;

/// Computes the next state from the previous one.
pub type Reducer = Rc<dyn Fn(Option<&StateValue>) -> StateValue>;

/// State held by an error boundary after it captured a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError(pub RenderError);

#[derive(Clone)]
pub enum UpdatePayload {
    Replace(StateValue),
    Reduce(Reducer),
}

/// One queued state change.
#[derive(Clone)]
pub struct Update {
    pub lane: Lane,
    pub payload: UpdatePayload,
}

impl Update {
    pub fn replace(lane: Lane, value: StateValue) -> Self {
        Self {
            lane,
            payload: UpdatePayload::Replace(value),
        }
    }

    pub fn reduce(lane: Lane, reducer: Reducer) -> Self {
        Self {
            lane,
            payload: UpdatePayload::Reduce(reducer),
        }
    }

    fn apply(&self, prev: Option<&StateValue>) -> StateValue {
        match &self.payload {
            UpdatePayload::Replace(value) => value.clone(),
            UpdatePayload::Reduce(reducer) => reducer(prev),
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.payload {
            UpdatePayload::Replace(_) => "replace",
            UpdatePayload::Reduce(_) => "reduce",
        };
        write!(f, "Update({kind} @ {})", self.lane)
    }
}

/// Result of processing a queue.
#[derive(Debug, Clone)]
pub struct Processed {
    pub state: Option<StateValue>,
    /// Lanes of updates that were skipped and must be rendered later.
    pub skipped: Lanes,
}

/// Base state plus updates not yet folded into it.
#[derive(Clone, Default)]
pub struct UpdateQueue {
    pub base_state: Option<StateValue>,
    pub base_updates: Vec<Update>,
}

impl UpdateQueue {
    pub fn with_state(state: StateValue) -> Self {
        Self {
            base_state: Some(state),
            base_updates: Vec::new(),
        }
    }

    pub fn push(&mut self, update: Update) {
        self.base_updates.push(update);
    }

    pub fn is_empty(&self) -> bool {
        self.base_updates.is_empty()
    }

    /// Fold the updates included in `render_lanes` into the state and
    /// rebase the queue past them.
    pub fn process(&mut self, render_lanes: Lanes) -> Processed {
        let mut state = self.base_state.clone();
        let mut new_base_state: Option<Option<StateValue>> = None;
        let mut new_base_updates = Vec::new();
        let mut skipped = Lanes::NONE;

        for update in &self.base_updates {
            let included = update.lane.is_empty() || update.lane.is_subset_of(render_lanes);
            if !included {
                if new_base_updates.is_empty() {
                    new_base_state = Some(state.clone());
                }
                new_base_updates.push(update.clone());
                skipped |= update.lane;
                continue;
            }

            if !new_base_updates.is_empty() {
                new_base_updates.push(Update {
                    lane: Lanes::NONE,
                    payload: update.payload.clone(),
                });
            }
            state = Some(update.apply(state.as_ref()));
        }

        self.base_state = match new_base_state {
            Some(frozen) => frozen,
            None => state.clone(),
        };
        self.base_updates = new_base_updates;

        Processed { state, skipped }
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("has_base_state", &self.base_state.is_some())
            .field("base_updates", &self.base_updates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(state: &Option<StateValue>) -> i64 {
        state
            .as_ref()
            .and_then(|s| s.downcast_ref::<i64>())
            .copied()
            .unwrap_or(0)
    }

    fn add(lane: Lane, n: i64) -> Update {
        Update::reduce(
            lane,
            Rc::new(move |prev: Option<&StateValue>| {
                let base = prev.and_then(|p| p.downcast_ref::<i64>()).copied().unwrap_or(0);
                Rc::new(base + n) as StateValue
            }),
        )
    }

    #[test]
    fn applies_included_updates_in_order() {
        let mut q = UpdateQueue::default();
        q.push(add(Lanes::DEFAULT, 1));
        q.push(Update::replace(Lanes::DEFAULT, Rc::new(10i64)));
        q.push(add(Lanes::DEFAULT, 5));
        let out = q.process(Lanes::DEFAULT);
        assert_eq!(val(&out.state), 15);
        assert_eq!(out.skipped, Lanes::NONE);
        assert!(q.is_empty());
    }

    #[test]
    fn skipped_update_freezes_base_and_replays() {
        let mut q = UpdateQueue::with_state(Rc::new(0i64));
        q.push(add(Lanes::SYNC, 1));
        q.push(add(Lanes::TRANSITION_1, 10));
        q.push(add(Lanes::SYNC, 100));

        let first = q.process(Lanes::SYNC);
        assert_eq!(val(&first.state), 101);
        assert_eq!(first.skipped, Lanes::TRANSITION_1);
        assert_eq!(val(&q.base_state), 1);
        assert_eq!(q.base_updates.len(), 2);

        let second = q.process(Lanes::TRANSITION_1);
        assert_eq!(val(&second.state), 111);
        assert_eq!(second.skipped, Lanes::NONE);
        assert!(q.is_empty());
    }

    #[test]
    fn reprocessing_is_idempotent() {
        let mut q = UpdateQueue::with_state(Rc::new(0i64));
        q.push(add(Lanes::TRANSITION_1, 10));
        q.push(add(Lanes::DEFAULT, 1));

        let mut copy = q.clone();
        let a = q.process(Lanes::DEFAULT);
        let b = copy.process(Lanes::DEFAULT);
        assert_eq!(val(&a.state), val(&b.state));

        let again = q.clone().process(Lanes::DEFAULT);
        assert_eq!(val(&again.state), 1);
    }
}
