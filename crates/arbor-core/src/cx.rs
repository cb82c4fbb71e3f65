#![forbid(unsafe_code)]

//! Render context handed to function components.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::RenderError;
use crate::id::FiberHandle;
use crate::lane::Lanes;
use crate::update_queue::StateValue;

/// When an effect runs relative to the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// Before any host mutation, reading pre-commit host state.
    Snapshot,
    /// After mutation, once the new tree is current.
    Layout,
    /// In a later task after the commit.
    Passive,
    /// When the fiber is deleted.
    Unmount,
}

type EffectFn = dyn Fn() -> Result<(), RenderError>;

/// A commit-phase callback registered during render.
#[derive(Clone)]
pub struct Effect {
    pub kind: EffectKind,
    callback: Rc<EffectFn>,
}

impl Effect {
    pub fn new<F>(kind: EffectKind, callback: F) -> Self
    where
        F: Fn() -> Result<(), RenderError> + 'static,
    {
        Self {
            kind,
            callback: Rc::new(callback),
        }
    }

    pub fn run(&self) -> Result<(), RenderError> {
        (self.callback)()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect({:?})", self.kind)
    }
}

/// Per-render view of a component fiber.
pub struct RenderCx<'a> {
    handle: FiberHandle,
    state: Option<&'a StateValue>,
    lanes: Lanes,
    effects: Vec<Effect>,
}

impl<'a> RenderCx<'a> {
    pub fn new(handle: FiberHandle, state: Option<&'a StateValue>, lanes: Lanes) -> Self {
        Self {
            handle,
            state,
            lanes,
            effects: Vec::new(),
        }
    }

    /// Handle for enqueueing updates to this component later.
    pub fn handle(&self) -> FiberHandle {
        self.handle
    }

    /// Lanes being rendered.
    pub fn render_lanes(&self) -> Lanes {
        self.lanes
    }

    /// Current state, if it has been set and has type `T`.
    pub fn state<T: Any>(&self) -> Option<&'a T> {
        self.state.and_then(|s| (**s).downcast_ref::<T>())
    }

    pub fn snapshot_effect<F>(&mut self, f: F)
    where
        F: Fn() -> Result<(), RenderError> + 'static,
    {
        self.effects.push(Effect::new(EffectKind::Snapshot, f));
    }

    pub fn layout_effect<F>(&mut self, f: F)
    where
        F: Fn() -> Result<(), RenderError> + 'static,
    {
        self.effects.push(Effect::new(EffectKind::Layout, f));
    }

    pub fn passive_effect<F>(&mut self, f: F)
    where
        F: Fn() -> Result<(), RenderError> + 'static,
    {
        self.effects.push(Effect::new(EffectKind::Passive, f));
    }

    pub fn on_unmount<F>(&mut self, f: F)
    where
        F: Fn() -> Result<(), RenderError> + 'static,
    {
        self.effects.push(Effect::new(EffectKind::Unmount, f));
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}
