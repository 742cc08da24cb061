use crate::host::HostBinding;
use crate::rendering::NodeId;
use crate::widget::WidgetCapability;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Text,
    Element { tag: String },
    Fragment,
    Widget { name: String },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Text => "text",
            NodeKind::Element { .. } => "element",
            NodeKind::Fragment => "fragment",
            NodeKind::Widget { .. } => "widget",
        }
    }
}

/// Local mirror of one remote node.
pub struct Node<H: HostBinding> {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` only for fragments.
    pub host: Option<H::Node>,
    pub children: SmallVec<[NodeId; 4]>,
    /// Attribute name to the listener bound for it.
    pub handlers: FxHashMap<String, H::Listener>,
    pub widget: Option<Arc<dyn WidgetCapability<H>>>,
}

impl<H: HostBinding> Node<H> {
    pub fn new(id: NodeId, kind: NodeKind, host: Option<H::Node>) -> Self {
        Self {
            id,
            kind,
            host,
            children: SmallVec::new(),
            handlers: FxHashMap::default(),
            widget: None,
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, NodeKind::Fragment)
    }
}

/// Node table plus the child-to-parent index.
pub struct NodeTable<H: HostBinding> {
    nodes: FxHashMap<NodeId, Node<H>>,
    parents: FxHashMap<NodeId, NodeId>,
}

impl<H: HostBinding> Default for NodeTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostBinding> NodeTable<H> {
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            parents: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, node: Node<H>, parent: Option<NodeId>) {
        if let Some(parent) = parent {
            self.parents.insert(node.id.clone(), parent);
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node<H>> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node<H>> {
        self.nodes.get_mut(id)
    }

    /// Drops the node and its parent entry. Children are left alone.
    pub fn remove(&mut self, id: &NodeId) -> Option<Node<H>> {
        self.parents.remove(id);
        self.nodes.remove(id)
    }

    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    pub fn set_parent(&mut self, id: &NodeId, parent: NodeId) {
        self.parents.insert(id.clone(), parent);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_entries(&self) -> usize {
        self.parents.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub(crate) fn into_nodes(self) -> impl Iterator<Item = Node<H>> {
        self.nodes.into_values()
    }
}
