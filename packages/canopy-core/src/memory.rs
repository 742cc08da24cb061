//! Headless host that keeps its nodes in a slotmap arena.
//!
//! Every primitive is recorded as a [`HostMutation`] so callers can assert
//! what actually reached the surface. It is meant for tests and tooling:
//! nodes are only freed when `replace_children` drops them or on an
//! explicit [`MemoryHost::prune_detached`].

use crate::host::{EventCallback, HostBinding};
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::Value;
use slotmap::{SlotMap, new_key_type};
use std::collections::BTreeMap;

new_key_type! {
    pub struct HostNodeId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HostMutation {
    CreateElement {
        id: HostNodeId,
        tag: String,
    },
    CreateTextNode {
        id: HostNodeId,
        value: String,
    },
    SetAttribute {
        id: HostNodeId,
        name: String,
        value: String,
    },
    RemoveAttribute {
        id: HostNodeId,
        name: String,
    },
    SetStyle {
        id: HostNodeId,
        property: String,
        value: String,
    },
    NewEventListener {
        id: HostNodeId,
        event: String,
    },
    RemoveEventListener {
        id: HostNodeId,
        event: String,
    },
    InsertBefore {
        parent: HostNodeId,
        child: HostNodeId,
        reference: Option<HostNodeId>,
    },
    InsertAfter {
        parent: HostNodeId,
        child: HostNodeId,
        reference: HostNodeId,
    },
    RemoveChild {
        parent: HostNodeId,
        child: HostNodeId,
    },
    ReplaceWith {
        parent: HostNodeId,
        old: HostNodeId,
        new: HostNodeId,
    },
    ReplaceChildren {
        parent: HostNodeId,
        children: Vec<HostNodeId>,
    },
}

impl HostMutation {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            HostMutation::CreateElement { .. } | HostMutation::CreateTextNode { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostNodeData {
    Surface,
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        styles: BTreeMap<String, String>,
    },
    Text(String),
}

struct BoundListener {
    id: ListenerId,
    event: String,
    callback: EventCallback,
}

struct HostNode {
    data: HostNodeData,
    parent: Option<HostNodeId>,
    children: Vec<HostNodeId>,
    listeners: Vec<BoundListener>,
}

impl HostNode {
    fn new(data: HostNodeData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

pub struct MemoryHost {
    nodes: SlotMap<HostNodeId, HostNode>,
    surface: HostNodeId,
    next_listener: u64,
    mutations: Vec<HostMutation>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let surface = nodes.insert(HostNode::new(HostNodeData::Surface));
        Self {
            nodes,
            surface,
            next_listener: 0,
            mutations: Vec::new(),
        }
    }

    pub fn surface(&self) -> HostNodeId {
        self.surface
    }

    pub fn mutations(&self) -> &[HostMutation] {
        &self.mutations
    }

    pub fn take_mutations(&mut self) -> Vec<HostMutation> {
        std::mem::take(&mut self.mutations)
    }

    /// Nodes alive in the arena, surface included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Frees every node that cannot be reached from the surface and returns
    /// how many were freed. Keys of detached nodes the caller still holds
    /// become dangling.
    pub fn prune_detached(&mut self) -> usize {
        let mut reachable = FxHashSet::default();
        let mut stack = vec![self.surface];
        while let Some(node) = stack.pop() {
            if reachable.insert(node) {
                stack.extend_from_slice(self.children(node));
            }
        }
        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(&id));
        before - self.nodes.len()
    }

    pub fn data(&self, node: HostNodeId) -> Option<&HostNodeData> {
        self.nodes.get(node).map(|n| &n.data)
    }

    pub fn children(&self, node: HostNodeId) -> &[HostNodeId] {
        self.nodes
            .get(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, node: HostNodeId) -> Option<HostNodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn tag(&self, node: HostNodeId) -> Option<&str> {
        match self.data(node)? {
            HostNodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn text(&self, node: HostNodeId) -> Option<&str> {
        match self.data(node)? {
            HostNodeData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn attribute(&self, node: HostNodeId, name: &str) -> Option<&str> {
        match self.data(node)? {
            HostNodeData::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn style(&self, node: HostNodeId, property: &str) -> Option<&str> {
        match self.data(node)? {
            HostNodeData::Element { styles, .. } => styles.get(property).map(String::as_str),
            _ => None,
        }
    }

    pub fn listener_count(&self, node: HostNodeId) -> usize {
        self.nodes.get(node).map_or(0, |n| n.listeners.len())
    }

    /// Fires every listener bound for `event` on `node`. Returns how many ran.
    pub fn dispatch_event(&self, node: HostNodeId, event: &str, params: Value) -> usize {
        let Some(host_node) = self.nodes.get(node) else {
            return 0;
        };
        let callbacks: Vec<EventCallback> = host_node
            .listeners
            .iter()
            .filter(|l| l.event == event)
            .map(|l| l.callback.clone())
            .collect();
        for callback in &callbacks {
            callback(params.clone());
        }
        callbacks.len()
    }

    /// Serializes the subtree under `node`. The surface itself renders as its children.
    pub fn to_html(&self, node: HostNodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: HostNodeId, out: &mut String) {
        let Some(host_node) = self.nodes.get(node) else {
            return;
        };
        match &host_node.data {
            HostNodeData::Text(text) => out.push_str(&escape_html(text)),
            HostNodeData::Surface => {
                for &child in &host_node.children {
                    self.write_html(child, out);
                }
            }
            HostNodeData::Element {
                tag,
                attributes,
                styles,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                }
                if !styles.is_empty() {
                    let style: String = styles
                        .iter()
                        .map(|(property, value)| format!("{}:{};", property, value))
                        .collect();
                    out.push_str(&format!(" style=\"{}\"", escape_html(&style)));
                }
                out.push('>');
                for &child in &host_node.children {
                    self.write_html(child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    fn detach(&mut self, child: HostNodeId) {
        let Some(parent) = self.nodes.get_mut(child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.retain(|&c| c != child);
        }
    }

    fn attach(&mut self, parent: HostNodeId, child: HostNodeId, index: Option<usize>) {
        if parent == child || !self.nodes.contains_key(child) {
            tracing::warn!(?parent, ?child, "refusing invalid host insertion");
            return;
        }
        self.detach(child);
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            tracing::warn!(?parent, "insertion into unknown host node");
            return;
        };
        match index {
            Some(index) if index <= parent_node.children.len() => {
                parent_node.children.insert(index, child)
            }
            _ => parent_node.children.push(child),
        }
        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = Some(parent);
        }
    }

    fn free_subtree(&mut self, node: HostNodeId) {
        if let Some(removed) = self.nodes.remove(node) {
            for child in removed.children {
                self.free_subtree(child);
            }
        }
    }

    fn position(&self, parent: HostNodeId, child: HostNodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }
}

impl HostBinding for MemoryHost {
    type Node = HostNodeId;
    type Listener = ListenerId;

    fn mount(&mut self) -> HostNodeId {
        self.surface
    }

    fn create_element(&mut self, tag: &str) -> HostNodeId {
        let id = self.nodes.insert(HostNode::new(HostNodeData::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            styles: BTreeMap::new(),
        }));
        self.mutations.push(HostMutation::CreateElement {
            id,
            tag: tag.to_string(),
        });
        id
    }

    fn create_text(&mut self, value: &str) -> HostNodeId {
        let id = self
            .nodes
            .insert(HostNode::new(HostNodeData::Text(value.to_string())));
        self.mutations.push(HostMutation::CreateTextNode {
            id,
            value: value.to_string(),
        });
        id
    }

    fn set_attribute(&mut self, node: &HostNodeId, name: &str, value: &str) {
        if let Some(HostNodeData::Element { attributes, .. }) =
            self.nodes.get_mut(*node).map(|n| &mut n.data)
        {
            attributes.insert(name.to_string(), value.to_string());
        }
        self.mutations.push(HostMutation::SetAttribute {
            id: *node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn remove_attribute(&mut self, node: &HostNodeId, name: &str) {
        if let Some(HostNodeData::Element {
            attributes, styles, ..
        }) = self.nodes.get_mut(*node).map(|n| &mut n.data)
        {
            attributes.remove(name);
            if name == "style" {
                styles.clear();
            }
        }
        self.mutations.push(HostMutation::RemoveAttribute {
            id: *node,
            name: name.to_string(),
        });
    }

    fn set_style(&mut self, node: &HostNodeId, property: &str, value: &str) {
        if let Some(HostNodeData::Element { styles, .. }) =
            self.nodes.get_mut(*node).map(|n| &mut n.data)
        {
            styles.insert(property.to_string(), value.to_string());
        }
        self.mutations.push(HostMutation::SetStyle {
            id: *node,
            property: property.to_string(),
            value: value.to_string(),
        });
    }

    fn add_event_listener(
        &mut self,
        node: &HostNodeId,
        event: &str,
        callback: EventCallback,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        if let Some(host_node) = self.nodes.get_mut(*node) {
            host_node.listeners.push(BoundListener {
                id,
                event: event.to_string(),
                callback,
            });
        }
        self.mutations.push(HostMutation::NewEventListener {
            id: *node,
            event: event.to_string(),
        });
        id
    }

    fn remove_event_listener(&mut self, node: &HostNodeId, listener: ListenerId) {
        let Some(host_node) = self.nodes.get_mut(*node) else {
            return;
        };
        if let Some(index) = host_node.listeners.iter().position(|l| l.id == listener) {
            let removed = host_node.listeners.remove(index);
            self.mutations.push(HostMutation::RemoveEventListener {
                id: *node,
                event: removed.event,
            });
        }
    }

    fn child_count(&self, parent: &HostNodeId) -> usize {
        self.children(*parent).len()
    }

    fn child_at(&self, parent: &HostNodeId, index: usize) -> Option<HostNodeId> {
        self.children(*parent).get(index).copied()
    }

    fn insert_before(
        &mut self,
        parent: &HostNodeId,
        child: &HostNodeId,
        reference: Option<&HostNodeId>,
    ) {
        self.mutations.push(HostMutation::InsertBefore {
            parent: *parent,
            child: *child,
            reference: reference.copied(),
        });
        if reference == Some(child) {
            return;
        }
        self.detach(*child);
        let index = reference.and_then(|r| self.position(*parent, *r));
        self.attach(*parent, *child, index);
    }

    fn insert_after(&mut self, parent: &HostNodeId, child: &HostNodeId, reference: &HostNodeId) {
        self.mutations.push(HostMutation::InsertAfter {
            parent: *parent,
            child: *child,
            reference: *reference,
        });
        if reference == child {
            return;
        }
        self.detach(*child);
        let index = self.position(*parent, *reference).map(|i| i + 1);
        self.attach(*parent, *child, index);
    }

    fn remove_child(&mut self, parent: &HostNodeId, child: &HostNodeId) {
        self.mutations.push(HostMutation::RemoveChild {
            parent: *parent,
            child: *child,
        });
        if self.parent(*child) == Some(*parent) {
            self.detach(*child);
        }
    }

    fn replace_node(&mut self, parent: &HostNodeId, old: &HostNodeId, new: &HostNodeId) {
        self.mutations.push(HostMutation::ReplaceWith {
            parent: *parent,
            old: *old,
            new: *new,
        });
        if old == new {
            return;
        }
        self.detach(*new);
        let index = self.position(*parent, *old);
        self.detach(*old);
        self.attach(*parent, *new, index);
    }

    fn replace_children(&mut self, parent: &HostNodeId, children: &[HostNodeId]) {
        self.mutations.push(HostMutation::ReplaceChildren {
            parent: *parent,
            children: children.to_vec(),
        });
        let previous = self.children(*parent).to_vec();
        for &old in &previous {
            self.detach(old);
        }
        for &child in children {
            self.attach(*parent, child, None);
        }
        // Dropped children are not reachable by anyone any more.
        for old in previous {
            if self.parent(old).is_none() {
                self.free_subtree(old);
            }
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            _ => output.push(c),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_insert_before_moves_attached_child() {
        let mut host = MemoryHost::new();
        let root = host.mount();
        let a = host.create_text("a");
        let b = host.create_text("b");
        let c = host.create_text("c");
        host.replace_children(&root, &[a, b, c]);

        host.insert_before(&root, &c, Some(&a));
        assert_eq!(host.children(root), &[c, a, b]);

        host.insert_before(&root, &c, None);
        assert_eq!(host.children(root), &[a, b, c]);
    }

    #[test]
    fn test_to_html_escapes() {
        let mut host = MemoryHost::new();
        let root = host.mount();
        let div = host.create_element("div");
        host.set_attribute(&div, "title", "a \"b\"");
        host.set_style(&div, "color", "red");
        let text = host.create_text("1 < 2 & 3");
        host.insert_before(&div, &text, None);
        host.insert_before(&root, &div, None);

        assert_eq!(
            host.to_html(root),
            "<div title=\"a &quot;b&quot;\" style=\"color:red;\">1 &lt; 2 &amp; 3</div>"
        );
    }

    #[test]
    fn test_dispatch_reaches_only_matching_listeners() {
        let mut host = MemoryHost::new();
        let button = host.create_element("button");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = host.add_event_listener(
            &button,
            "click",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(host.dispatch_event(button, "click", Value::Null), 1);
        assert_eq!(host.dispatch_event(button, "input", Value::Null), 0);

        host.remove_event_listener(&button, listener);
        assert_eq!(host.dispatch_event(button, "click", Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_children_frees_dropped_subtrees() {
        let mut host = MemoryHost::new();
        let root = host.mount();
        let div = host.create_element("div");
        let text = host.create_text("inner");
        host.insert_before(&div, &text, None);
        let kept = host.create_text("kept");
        host.replace_children(&root, &[div, kept]);
        assert_eq!(host.node_count(), 4);

        let fresh = host.create_text("fresh");
        host.replace_children(&root, &[kept, fresh]);
        assert_eq!(host.node_count(), 3, "div and its text should be freed");
        assert!(host.data(div).is_none());
        assert!(host.data(text).is_none());
        assert_eq!(host.to_html(root), "keptfresh");
    }

    #[test]
    fn test_prune_detached() {
        let mut host = MemoryHost::new();
        let root = host.mount();
        let attached = host.create_text("a");
        host.insert_before(&root, &attached, None);
        let loose = host.create_element("span");
        let loose_child = host.create_text("b");
        host.insert_before(&loose, &loose_child, None);

        assert_eq!(host.prune_detached(), 2);
        assert_eq!(host.node_count(), 2);
        assert_eq!(host.text(attached), Some("a"));
    }

    #[test]
    fn test_replace_node_keeps_position() {
        let mut host = MemoryHost::new();
        let root = host.mount();
        let a = host.create_text("a");
        let b = host.create_text("b");
        let c = host.create_text("c");
        host.replace_children(&root, &[a, b]);

        host.replace_node(&root, &a, &c);
        assert_eq!(host.children(root), &[c, b]);
        assert_eq!(host.parent(a), None);
    }
}
