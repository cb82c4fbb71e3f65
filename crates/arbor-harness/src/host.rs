#![forbid(unsafe_code)]

//! Recording host adapter.
//!
//! [`RecordingHost`] keeps an in-memory host tree and logs every call the
//! reconciler makes, so tests can assert both on the final tree (as text)
//! and on the exact mutation sequence.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as FmtWrite;
use std::rc::Rc;

use arbor_core::{CommitPhase, EventPriority, HostConfig, Props};

/// Handle to a node in the recording host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Create { id: HostId, tag: String },
    CreateText { id: HostId, text: String },
    AppendInitial { parent: HostId, child: HostId },
    Append { parent: HostId, child: HostId },
    InsertBefore { parent: HostId, child: HostId, before: HostId },
    Remove { parent: HostId, child: HostId },
    Update { id: HostId },
    TextUpdate { id: HostId, text: String },
    Detach { id: HostId },
    PrepareForCommit,
    ResetAfterCommit,
    Phase(CommitPhase),
}

impl HostOp {
    /// True for calls that change the attached host tree.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Append { .. }
                | Self::InsertBefore { .. }
                | Self::Remove { .. }
                | Self::Update { .. }
                | Self::TextUpdate { .. }
        )
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { id, tag } => write!(f, "create {id} <{tag}>"),
            Self::CreateText { id, text } => write!(f, "create {id} {text:?}"),
            Self::AppendInitial { parent, child } => write!(f, "append_initial {parent} {child}"),
            Self::Append { parent, child } => write!(f, "append {parent} {child}"),
            Self::InsertBefore {
                parent,
                child,
                before,
            } => write!(f, "insert {parent} {child} before {before}"),
            Self::Remove { parent, child } => write!(f, "remove {parent} {child}"),
            Self::Update { id } => write!(f, "update {id}"),
            Self::TextUpdate { id, text } => write!(f, "text {id} {text:?}"),
            Self::Detach { id } => write!(f, "detach {id}"),
            Self::PrepareForCommit => f.write_str("prepare_for_commit"),
            Self::ResetAfterCommit => f.write_str("reset_after_commit"),
            Self::Phase(phase) => write!(f, "phase {phase}"),
        }
    }
}

/// Shared, ordered log of strings. Clones write to the same log, so effect
/// closures and the host can interleave entries.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// Drain and return every entry.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[derive(Debug, Clone)]
enum HostNodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct HostNode {
    kind: HostNodeKind,
    parent: Option<HostId>,
    children: Vec<HostId>,
    detached: bool,
}

/// In-memory host tree that records every call.
#[derive(Debug)]
pub struct RecordingHost {
    nodes: HashMap<HostId, HostNode>,
    next_id: u32,
    ops: Vec<HostOp>,
    log: Option<EventLog>,
    event_priority: EventPriority,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

fn render_attrs(props: &Props) -> BTreeMap<String, String> {
    props
        .attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
            ops: Vec::new(),
            log: None,
            event_priority: EventPriority::Default,
        }
    }

    /// Mirror every host call into `log` as text.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Create a detached container node.
    pub fn create_container(&mut self) -> HostId {
        self.alloc(HostNodeKind::Element {
            tag: "root".to_string(),
            attrs: BTreeMap::new(),
        })
    }

    /// Priority reported for the event being dispatched.
    pub fn set_event_priority(&mut self, priority: EventPriority) {
        self.event_priority = priority;
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of host nodes ever created.
    pub fn created(&self) -> usize {
        self.next_id as usize
    }

    pub fn children(&self, id: HostId) -> &[HostId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_detached(&self, id: HostId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.detached)
    }

    pub fn attr(&self, id: HostId, name: &str) -> Option<&str> {
        match &self.nodes.get(&id)?.kind {
            HostNodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            HostNodeKind::Text(_) => None,
        }
    }

    /// Render the children of `container` as compact markup, e.g.
    /// `<ul><li key="a">A</li></ul>`.
    pub fn snapshot(&self, container: HostId) -> String {
        let mut out = String::new();
        for &child in self.children(container) {
            self.write_node(&mut out, child);
        }
        out
    }

    fn write_node(&self, out: &mut String, id: HostId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            HostNodeKind::Text(text) => out.push_str(text),
            HostNodeKind::Element { tag, attrs } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(out, child);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn alloc(&mut self, kind: HostNodeKind) -> HostId {
        let id = HostId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            HostNode {
                kind,
                parent: None,
                children: Vec::new(),
                detached: false,
            },
        );
        id
    }

    fn record(&mut self, op: HostOp) {
        tracing::trace!(%op, "host op");
        if let Some(log) = &self.log {
            log.push(op.to_string());
        }
        self.ops.push(op);
    }

    fn detach_from_parent(&mut self, child: HostId) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|&c| c != child);
        }
    }

    fn attach(&mut self, parent: HostId, child: HostId, before: Option<HostId>) {
        self.detach_from_parent(child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        let Some(p) = self.nodes.get_mut(&parent) else {
            return;
        };
        let index = before
            .and_then(|b| p.children.iter().position(|&c| c == b))
            .unwrap_or(p.children.len());
        p.children.insert(index, child);
    }
}

impl HostConfig for RecordingHost {
    type Instance = HostId;

    fn create_instance(&mut self, tag: &str, props: &Props) -> HostId {
        let id = self.alloc(HostNodeKind::Element {
            tag: tag.to_string(),
            attrs: render_attrs(props),
        });
        self.record(HostOp::Create {
            id,
            tag: tag.to_string(),
        });
        id
    }

    fn create_text_instance(&mut self, text: &str) -> HostId {
        let id = self.alloc(HostNodeKind::Text(text.to_string()));
        self.record(HostOp::CreateText {
            id,
            text: text.to_string(),
        });
        id
    }

    fn append_initial_child(&mut self, parent: &HostId, child: &HostId) {
        self.attach(*parent, *child, None);
        self.record(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
    }

    fn append_child(&mut self, parent: &HostId, child: &HostId) {
        self.attach(*parent, *child, None);
        self.record(HostOp::Append {
            parent: *parent,
            child: *child,
        });
    }

    fn insert_before(&mut self, parent: &HostId, child: &HostId, before: &HostId) {
        self.attach(*parent, *child, Some(*before));
        self.record(HostOp::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
    }

    fn remove_child(&mut self, parent: &HostId, child: &HostId) {
        self.detach_from_parent(*child);
        self.record(HostOp::Remove {
            parent: *parent,
            child: *child,
        });
    }

    fn commit_update(&mut self, instance: &HostId, _tag: &str, _old: &Props, new: &Props) {
        if let Some(HostNode {
            kind: HostNodeKind::Element { attrs, .. },
            ..
        }) = self.nodes.get_mut(instance)
        {
            *attrs = render_attrs(new);
        }
        self.record(HostOp::Update { id: *instance });
    }

    fn commit_text_update(&mut self, instance: &HostId, _old: &str, new: &str) {
        if let Some(HostNode {
            kind: HostNodeKind::Text(text),
            ..
        }) = self.nodes.get_mut(instance)
        {
            *text = new.to_string();
        }
        self.record(HostOp::TextUpdate {
            id: *instance,
            text: new.to_string(),
        });
    }

    fn prepare_for_commit(&mut self, _container: &HostId) {
        self.record(HostOp::PrepareForCommit);
    }

    fn reset_after_commit(&mut self, _container: &HostId) {
        self.record(HostOp::ResetAfterCommit);
    }

    fn detach_deleted_instance(&mut self, instance: &HostId) {
        if let Some(node) = self.nodes.get_mut(instance) {
            node.detached = true;
        }
        self.record(HostOp::Detach { id: *instance });
    }

    fn on_commit_phase(&mut self, phase: CommitPhase) {
        self.record(HostOp::Phase(phase));
    }

    fn current_event_priority(&self) -> EventPriority {
        self.event_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Node, host};

    fn props_of(node: &Node) -> Rc<Props> {
        match node {
            Node::Element(el) => el.props.clone(),
            _ => Rc::new(Props::default()),
        }
    }

    #[test]
    fn snapshot_renders_nested_markup() {
        let mut h = RecordingHost::new();
        let root = h.create_container();
        let div = h.create_instance("div", &props_of(&host("div").attr("id", "a").build()));
        let t = h.create_text_instance("hi");
        h.append_initial_child(&div, &t);
        h.append_child(&root, &div);
        assert_eq!(h.snapshot(root), r#"<div id="a">hi</div>"#);
    }

    #[test]
    fn insert_before_moves_existing_child() {
        let mut h = RecordingHost::new();
        let root = h.create_container();
        let a = h.create_text_instance("a");
        let b = h.create_text_instance("b");
        h.append_child(&root, &a);
        h.append_child(&root, &b);
        h.insert_before(&root, &b, &a);
        assert_eq!(h.snapshot(root), "ba");
        assert_eq!(h.children(root), &[b, a]);
    }

    #[test]
    fn remove_and_detach() {
        let mut h = RecordingHost::new();
        let root = h.create_container();
        let a = h.create_text_instance("a");
        h.append_child(&root, &a);
        h.remove_child(&root, &a);
        h.detach_deleted_instance(&a);
        assert_eq!(h.snapshot(root), "");
        assert!(h.is_detached(a));
    }

    #[test]
    fn log_mirrors_ops() {
        let log = EventLog::new();
        let mut h = RecordingHost::new().with_log(log.clone());
        let root = h.create_container();
        let t = h.create_text_instance("x");
        h.append_child(&root, &t);
        h.on_commit_phase(CommitPhase::Layout);
        assert_eq!(
            log.take(),
            vec![
                r#"create #1 "x""#.to_string(),
                "append #0 #1".to_string(),
                "phase layout".to_string(),
            ]
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn ops_are_traced() {
        let mut h = RecordingHost::new();
        let root = h.create_container();
        let div = h.create_instance("div", &Props::default());
        h.append_child(&root, &div);
        assert!(logs_contain("host op"));
        assert!(logs_contain("append #0 #1"));
    }
}
