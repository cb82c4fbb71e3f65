#![forbid(unsafe_code)]

//! Declarative element model.
//!
//! A [`Node`] is an immutable description of desired children. Elements are
//! reference counted so that "nothing changed" can be detected with a
//! pointer comparison: a parent that re-renders with the same `Rc<Element>`
//! lets the child bail out without diffing its props.
//!
//! ```text
//! Node ─┬─ Empty
//!       ├─ Text("hello")
//!       ├─ Element ── ElementType + key + Rc<Props>
//!       └─ List [Node, Node, ...]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::cx::RenderCx;
use crate::error::{RenderError, Thrown};

// =============================================================================
// Keys and props
// =============================================================================

/// Identity of a child within its sibling list.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Rc::from(s))
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Self(Rc::from(n.to_string()))
    }
}

/// A host attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Element props: host attributes, children, and an optional fallback used
/// by suspense boundaries.
#[derive(Debug, Clone, Default)]
pub struct Props {
    pub attrs: BTreeMap<Rc<str>, PropValue>,
    pub children: Node,
    pub fallback: Option<Node>,
}

impl Props {
    pub fn attr(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }
}

// =============================================================================
// Element types
// =============================================================================

type RenderFn = dyn Fn(&Props, &mut RenderCx<'_>) -> Result<Node, Thrown>;

/// A function component. Identity is the `Rc` allocation: two clones of the
/// same `ComponentType` are the same type, two separately built ones are not.
#[derive(Clone)]
pub struct ComponentType {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl ComponentType {
    pub fn new<F>(name: &str, render: F) -> Self
    where
        F: Fn(&Props, &mut RenderCx<'_>) -> Result<Node, Thrown> + 'static,
    {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, props: &Props, cx: &mut RenderCx<'_>) -> Result<Node, Thrown> {
        (self.render)(props, cx).map_err(|thrown| match thrown {
            Thrown::Error(err) if err.component().is_none() => {
                Thrown::Error(err.in_component(self.name.clone()))
            }
            other => other,
        })
    }

    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

type FallbackFn = dyn Fn(&RenderError) -> Node;

/// An error boundary: renders its children until a descendant fails, then
/// renders the fallback built from the captured error.
#[derive(Clone)]
pub struct BoundaryType {
    name: Rc<str>,
    fallback: Rc<FallbackFn>,
}

impl BoundaryType {
    pub fn new<F>(name: &str, fallback: F) -> Self
    where
        F: Fn(&RenderError) -> Node + 'static,
    {
        Self {
            name: Rc::from(name),
            fallback: Rc::new(fallback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fallback(&self, error: &RenderError) -> Node {
        (self.fallback)(error)
    }

    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.fallback, &other.fallback)
    }
}

impl fmt::Debug for BoundaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorBoundary({})", self.name)
    }
}

/// What kind of element this is.
#[derive(Debug, Clone)]
pub enum ElementType {
    /// A host node such as `"div"`.
    Host(Rc<str>),
    Component(ComponentType),
    /// Groups children without a host node.
    Fragment,
    /// Shows `Props::fallback` while a descendant is suspended.
    Suspense,
    ErrorBoundary(BoundaryType),
}

/// One element of a declarative tree.
#[derive(Debug, Clone)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Key>,
    pub props: Rc<Props>,
}

// =============================================================================
// Nodes
// =============================================================================

/// A declarative child description.
#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Rc<Element>),
    List(Rc<[Node]>),
}

impl Node {
    /// Referential equality: same variant and same allocation.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Text(a), Node::Text(b)) => Rc::ptr_eq(a, b),
            (Node::Element(a), Node::Element(b)) => Rc::ptr_eq(a, b),
            (Node::List(a), Node::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            Node::Element(el) => el.key.as_ref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => f.write_str("Empty"),
            Node::Text(t) => write!(f, "Text({:?})", &**t),
            Node::Element(el) => {
                let mut d = f.debug_struct("Element");
                d.field("ty", &el.ty);
                if let Some(key) = &el.key {
                    d.field("key", key);
                }
                d.finish()
            }
            Node::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Text(Rc::from(s))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Text(Rc::from(s))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::List(Rc::from(items))
    }
}

impl From<Element> for Node {
    fn from(el: Element) -> Self {
        Node::Element(Rc::new(el))
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Fluent builder for [`Element`] nodes.
#[derive(Debug, Clone)]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    props: Props,
    children: Vec<Node>,
    as_list: bool,
}

impl ElementBuilder {
    fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            props: Props::default(),
            children: Vec::new(),
            as_list: false,
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.attrs.insert(Rc::from(name), value.into());
        self
    }

    /// Append one child. A single child stays a single node; more than one
    /// becomes a list.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Set the children as an explicit list, even if it has one item.
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self.as_list = true;
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: impl Into<Node>) -> Self {
        self.props.fallback = Some(fallback.into());
        self
    }

    pub fn build(self) -> Node {
        let Self {
            ty,
            key,
            mut props,
            mut children,
            as_list,
        } = self;
        props.children = match children.len() {
            0 if !as_list => Node::Empty,
            1 if !as_list => children.pop().unwrap_or_default(),
            _ => Node::List(Rc::from(children)),
        };
        Node::Element(Rc::new(Element {
            ty,
            key,
            props: Rc::new(props),
        }))
    }
}

impl From<ElementBuilder> for Node {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

/// A host element.
pub fn host(tag: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(Rc::from(tag)))
}

/// An element rendering a function component.
pub fn component(ty: &ComponentType) -> ElementBuilder {
    ElementBuilder::new(ElementType::Component(ty.clone()))
}

pub fn fragment() -> ElementBuilder {
    ElementBuilder::new(ElementType::Fragment)
}

pub fn suspense() -> ElementBuilder {
    ElementBuilder::new(ElementType::Suspense)
}

pub fn error_boundary(ty: &BoundaryType) -> ElementBuilder {
    ElementBuilder::new(ElementType::ErrorBoundary(ty.clone()))
}

pub fn text(s: &str) -> Node {
    Node::from(s)
}

pub fn list(items: impl IntoIterator<Item = Node>) -> Node {
    Node::List(items.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_child_is_not_wrapped() {
        let node = host("div").child(text("hi")).build();
        let Node::Element(el) = node else {
            panic!("expected element");
        };
        assert!(matches!(el.props.children, Node::Text(_)));
    }

    #[test]
    fn explicit_children_always_list() {
        let node = host("ul").children([text("a")]).build();
        let Node::Element(el) = node else {
            panic!("expected element");
        };
        assert!(matches!(&el.props.children, Node::List(items) if items.len() == 1));
    }

    #[test]
    fn same_is_pointer_identity() {
        let a = host("div").attr("id", "x").build();
        let b = host("div").attr("id", "x").build();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(Node::Empty.same(&Node::Empty));
    }

    #[test]
    fn component_identity_follows_rc() {
        let a = ComponentType::new("A", |_, _| Ok(Node::Empty));
        let b = ComponentType::new("A", |_, _| Ok(Node::Empty));
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn key_from_number() {
        let node = host("li").key(7u64).build();
        assert_eq!(node.key().map(Key::as_str), Some("7"));
    }
}
