#![forbid(unsafe_code)]

//! Error types for render and commit failures.

use std::fmt;
use std::rc::Rc;

use crate::wakeable::Wakeable;

/// A failure raised by a component render or a commit-phase effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    message: Rc<str>,
    component: Option<Rc<str>>,
}

impl RenderError {
    pub fn new(message: impl Into<Rc<str>>) -> Self {
        Self {
            message: message.into(),
            component: None,
        }
    }

    /// Attach the name of the component that raised the error.
    #[must_use]
    pub fn in_component(mut self, name: impl Into<Rc<str>>) -> Self {
        self.component = Some(name.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RenderError {}

/// What a render step produces instead of children.
///
/// Suspension is not an error: it unwinds to the nearest suspense boundary
/// and never reaches an error boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thrown {
    /// The render depends on a value that is not ready yet.
    Suspend(Wakeable),
    /// The render failed.
    Error(RenderError),
}

impl From<RenderError> for Thrown {
    fn from(err: RenderError) -> Self {
        Self::Error(err)
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspend(w) => write!(f, "suspended on {w:?}"),
            Self::Error(e) => write!(f, "render error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_component() {
        let err = RenderError::new("boom").in_component("Widget");
        assert_eq!(err.to_string(), "Widget: boom");
        assert_eq!(RenderError::new("plain").to_string(), "plain");
    }

    #[test]
    fn question_mark_converts_to_thrown() {
        fn inner() -> Result<(), Thrown> {
            Err(RenderError::new("nope"))?;
            Ok(())
        }
        assert_eq!(inner(), Err(Thrown::Error(RenderError::new("nope"))));
    }
}
