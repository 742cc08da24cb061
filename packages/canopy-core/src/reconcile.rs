//! Applies renderings and patches to the node table and the host surface.

use crate::error::{ConsistencyError, ProtocolError, ReconcileError};
use crate::host::{EventCallback, EventSender, HostBinding, HostEvent, event_name};
use crate::patch::{InsertionSource, Patch};
use crate::rendering::{AttrValue, NodeId, Rendering, RootRendering};
use crate::tree::{Node, NodeKind, NodeTable};
use crate::widget::WidgetRegistry;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Reconciler<H: HostBinding> {
    host: H,
    mount: H::Node,
    table: NodeTable<H>,
    root: Option<NodeId>,
    widgets: WidgetRegistry<H>,
    events: EventSender,
}

impl<H: HostBinding> Reconciler<H> {
    pub fn new(mut host: H, widgets: WidgetRegistry<H>, events: EventSender) -> Self {
        let mount = host.mount();
        Self {
            host,
            mount,
            table: NodeTable::new(),
            root: None,
            widgets,
            events,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn root_id(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node<H>> {
        self.table.get(id)
    }

    pub fn children(&self, id: &NodeId) -> Option<&[NodeId]> {
        self.table.get(id).map(|n| n.children.as_slice())
    }

    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.table.parent(id)
    }

    pub fn host_node(&self, id: &NodeId) -> Option<&H::Node> {
        self.table.get(id).and_then(|n| n.host.as_ref())
    }

    /// Number of mirrored nodes, root included.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn parent_entries(&self) -> usize {
        self.table.parent_entries()
    }

    /// Builds the subtree for `rendering` under `parent`.
    ///
    /// The node and its host subtree are created and indexed, but the new id
    /// is not added to the parent's child list and its host nodes are not
    /// attached; callers place them.
    pub fn create(&mut self, rendering: &Rendering, parent: &NodeId) -> Result<NodeId, ReconcileError> {
        if !self.table.contains(parent) {
            return Err(ConsistencyError::MissingNode(parent.clone()).into());
        }
        self.build(rendering, parent)?;
        Ok(rendering.id().clone())
    }

    // On error nothing built for `rendering` stays in the table.
    fn build(&mut self, rendering: &Rendering, parent: &NodeId) -> Result<(), ReconcileError> {
        let id = rendering.id().clone();
        if self.table.contains(&id) {
            return Err(ConsistencyError::DuplicateNode(id).into());
        }

        match rendering {
            Rendering::Text { value, .. } => {
                let host_node = self.host.create_text(value);
                self.table
                    .insert(Node::new(id, NodeKind::Text, Some(host_node)), Some(parent.clone()));
            }
            Rendering::Element {
                tag,
                attrs,
                children,
                ..
            } => {
                let host_node = self.host.create_element(tag);
                self.table.insert(
                    Node::new(id.clone(), NodeKind::Element { tag: tag.clone() }, Some(host_node.clone())),
                    Some(parent.clone()),
                );
                if let Err(err) = self.populate_element(&id, &host_node, attrs, children) {
                    self.dispose(&id);
                    return Err(err);
                }
            }
            Rendering::Fragment { children, .. } => {
                self.table
                    .insert(Node::new(id.clone(), NodeKind::Fragment, None), Some(parent.clone()));
                for child in children {
                    if let Err(err) = self.build(child, &id) {
                        self.dispose(&id);
                        return Err(err);
                    }
                    self.push_child(&id, child.id().clone());
                }
            }
            Rendering::Widget { name, props, .. } => {
                let widget = self
                    .widgets
                    .get(name)
                    .ok_or_else(|| ProtocolError::UnknownWidget(name.clone()))?;
                let host_node =
                    widget
                        .create(&mut self.host, &id, props)
                        .map_err(|source| ProtocolError::Widget {
                            name: name.clone(),
                            source,
                        })?;
                let mut node = Node::new(id, NodeKind::Widget { name: name.clone() }, Some(host_node));
                node.widget = Some(widget);
                self.table.insert(node, Some(parent.clone()));
            }
        }
        Ok(())
    }

    fn populate_element(
        &mut self,
        id: &NodeId,
        host_node: &H::Node,
        attrs: &BTreeMap<String, AttrValue>,
        children: &[Rendering],
    ) -> Result<(), ReconcileError> {
        for (name, value) in attrs {
            self.bind_attribute(id, host_node, name, value)?;
        }
        for child in children {
            self.build(child, id)?;
            self.push_child(id, child.id().clone());
            for child_host in self.host_nodes(child.id()) {
                self.host.insert_before(host_node, &child_host, None);
            }
        }
        Ok(())
    }

    fn push_child(&mut self, parent: &NodeId, child: NodeId) {
        if let Some(node) = self.table.get_mut(parent) {
            node.children.push(child);
        }
    }

    fn bind_attribute(
        &mut self,
        id: &NodeId,
        host_node: &H::Node,
        name: &str,
        value: &AttrValue,
    ) -> Result<(), ReconcileError> {
        let handler_id = match value {
            AttrValue::Handler(handler) => handler.handler_id.clone(),
            AttrValue::Unknown(value) => {
                return Err(ProtocolError::UnknownAttribute {
                    node: id.clone(),
                    name: name.to_string(),
                    value: value.to_string(),
                }
                .into());
            }
            AttrValue::Text(text) => {
                self.release_listener(id, host_node, name);
                self.host.set_attribute(host_node, name, text);
                return Ok(());
            }
            AttrValue::Style(style) => {
                self.release_listener(id, host_node, name);
                for (property, value) in style {
                    self.host.set_style(host_node, property, value);
                }
                return Ok(());
            }
        };

        let event = event_name(name);
        let callback: EventCallback = {
            let events = self.events.clone();
            let element_id = id.clone();
            let event = event.clone();
            Arc::new(move |params: Value| {
                let host_event = HostEvent {
                    element_id: element_id.clone(),
                    handler_id: handler_id.clone(),
                    name: event.clone(),
                    params,
                };
                if events.unbounded_send(host_event).is_err() {
                    tracing::debug!(element = %element_id, "event channel closed, dropping event");
                }
            })
        };
        let listener = self.host.add_event_listener(host_node, &event, callback);
        let node = self
            .table
            .get_mut(id)
            .ok_or_else(|| ConsistencyError::MissingNode(id.clone()))?;
        if let Some(previous) = node.handlers.insert(name.to_string(), listener) {
            self.host.remove_event_listener(host_node, previous);
        }
        Ok(())
    }

    fn release_listener(&mut self, id: &NodeId, host_node: &H::Node, name: &str) -> bool {
        let listener = self.table.get_mut(id).and_then(|n| n.handlers.remove(name));
        match listener {
            Some(listener) => {
                self.host.remove_event_listener(host_node, listener);
                true
            }
            None => false,
        }
    }

    fn unbind_attribute(&mut self, id: &NodeId, host_node: &H::Node, name: &str) {
        if !self.release_listener(id, host_node, name) {
            self.host.remove_attribute(host_node, name);
        }
    }

    /// Forgets `id` and its descendants. Host nodes stay where they are and
    /// the parent's child list is left untouched.
    pub fn remove(&mut self, id: &NodeId) -> Result<(), ReconcileError> {
        if !self.table.contains(id) {
            return Err(ConsistencyError::MissingNode(id.clone()).into());
        }
        self.dispose(id);
        if self.root.as_ref() == Some(id) {
            self.root = None;
        }
        Ok(())
    }

    fn dispose(&mut self, id: &NodeId) {
        let Some(node) = self.table.remove(id) else {
            tracing::warn!(node = %id, "disposing a node that is not mirrored");
            return;
        };
        let children = node.children.clone();
        self.release(node);
        for child in &children {
            self.dispose(child);
        }
    }

    fn release(&mut self, mut node: Node<H>) {
        let Some(host_node) = node.host.take() else {
            return;
        };
        for (_, listener) in node.handlers.drain() {
            self.host.remove_event_listener(&host_node, listener);
        }
        if let Some(widget) = node.widget.take() {
            widget.dispose(&mut self.host, &host_node);
        }
    }

    /// Host nodes occupied by `id` in order; fragments contribute their children's.
    pub fn host_nodes(&self, id: &NodeId) -> Vec<H::Node> {
        let mut out = Vec::new();
        self.collect_host_nodes(id, &mut out);
        out
    }

    fn collect_host_nodes(&self, id: &NodeId, out: &mut Vec<H::Node>) {
        let Some(node) = self.table.get(id) else {
            return;
        };
        match &node.host {
            Some(host_node) => out.push(host_node.clone()),
            None => {
                for child in &node.children {
                    self.collect_host_nodes(child, out);
                }
            }
        }
    }

    fn host_width(&self, id: &NodeId) -> usize {
        match self.table.get(id) {
            Some(node) if node.host.is_some() => 1,
            Some(node) => node.children.iter().map(|c| self.host_width(c)).sum(),
            None => 0,
        }
    }

    /// Host node of the nearest ancestor-or-self that is not a fragment.
    pub fn fragment_element_parent(&self, id: &NodeId) -> Result<H::Node, ReconcileError> {
        let mut current = id.clone();
        loop {
            let node = self
                .table
                .get(&current)
                .ok_or_else(|| ConsistencyError::MissingNode(current.clone()))?;
            if !node.is_fragment() {
                return node
                    .host
                    .clone()
                    .ok_or_else(|| ConsistencyError::MissingHostNode(current.clone()).into());
            }
            current = self
                .table
                .parent(&current)
                .cloned()
                .ok_or_else(|| ConsistencyError::MissingParent(current.clone()))?;
        }
    }

    /// Offset of a fragment's first host node inside its host parent. Zero
    /// for anything that owns a host node.
    pub fn fragment_index(&self, id: &NodeId) -> Result<usize, ReconcileError> {
        let node = self
            .table
            .get(id)
            .ok_or_else(|| ConsistencyError::MissingNode(id.clone()))?;
        if !node.is_fragment() {
            return Ok(0);
        }
        let parent_id = self
            .table
            .parent(id)
            .ok_or_else(|| ConsistencyError::MissingParent(id.clone()))?;
        let parent = self
            .table
            .get(parent_id)
            .ok_or_else(|| ConsistencyError::MissingNode(parent_id.clone()))?;
        let position = parent
            .children
            .iter()
            .position(|c| c == id)
            .ok_or_else(|| ConsistencyError::NotAmongSiblings {
                parent: parent_id.clone(),
                child: id.clone(),
            })?;
        let preceding: usize = parent.children[..position]
            .iter()
            .map(|sibling| self.host_width(sibling))
            .sum();
        Ok(self.fragment_index(parent_id)? + preceding)
    }

    /// Discards the current tree and mounts `root` in its place.
    ///
    /// The new tree is built into a fresh table. If any child fails, the
    /// partial build is released and the previous mirror, its listeners and
    /// the surface are left as they were.
    pub fn replace_root(&mut self, root: &RootRendering) -> Result<NodeId, ReconcileError> {
        let previous = std::mem::take(&mut self.table);
        let previous_root = self.root.take();

        let root_id = root.id.clone();
        self.table.insert(
            Node::new(root_id.clone(), NodeKind::Root, Some(self.mount.clone())),
            None,
        );
        for child in &root.children {
            if let Err(err) = self.build(child, &root_id) {
                let partial = std::mem::replace(&mut self.table, previous);
                self.root = previous_root;
                for node in partial.into_nodes() {
                    self.release(node);
                }
                tracing::warn!(root = %root_id, error = %err, "root build failed, keeping the previous tree");
                return Err(err);
            }
            self.push_child(&root_id, child.id().clone());
        }
        self.root = Some(root_id.clone());

        for node in previous.into_nodes() {
            self.release(node);
        }

        let host_children = self.host_nodes_of_children(&root_id);
        self.host.replace_children(&self.mount, &host_children);
        tracing::debug!(root = %root_id, nodes = self.table.len(), "root replaced");
        Ok(root_id)
    }

    fn host_nodes_of_children(&self, id: &NodeId) -> Vec<H::Node> {
        let Some(node) = self.table.get(id) else {
            return Vec::new();
        };
        node.children
            .iter()
            .flat_map(|child| self.host_nodes(child))
            .collect()
    }

    pub fn replace_element(&mut self, element_id: &NodeId, new_element: &Rendering) -> Result<(), ReconcileError> {
        let old = self
            .table
            .get(element_id)
            .ok_or_else(|| ConsistencyError::MissingNode(element_id.clone()))?;
        if !matches!(old.kind, NodeKind::Element { .. }) {
            return Err(ProtocolError::InvalidKind {
                node: element_id.clone(),
                expected: "element",
                actual: old.kind.name(),
            }
            .into());
        }
        let old_host = old
            .host
            .clone()
            .ok_or_else(|| ConsistencyError::MissingHostNode(element_id.clone()))?;
        let parent_id = self
            .table
            .parent(element_id)
            .cloned()
            .ok_or_else(|| ConsistencyError::MissingParent(element_id.clone()))?;
        let position = self.position_in_parent(&parent_id, element_id)?;
        let host_parent = self.fragment_element_parent(&parent_id)?;

        self.dispose(element_id);
        if let Some(parent) = self.table.get_mut(&parent_id) {
            parent.children.remove(position);
        }

        if let Err(err) = self.build(new_element, &parent_id) {
            self.host.remove_child(&host_parent, &old_host);
            return Err(err);
        }

        let new_hosts = self.host_nodes(new_element.id());
        match new_hosts.as_slice() {
            [single] => self.host.replace_node(&host_parent, &old_host, single),
            many => {
                for host_node in many {
                    self.host.insert_before(&host_parent, host_node, Some(&old_host));
                }
                self.host.remove_child(&host_parent, &old_host);
            }
        }

        if let Some(parent) = self.table.get_mut(&parent_id) {
            parent.children.insert(position, new_element.id().clone());
        }
        Ok(())
    }

    fn position_in_parent(&self, parent_id: &NodeId, child: &NodeId) -> Result<usize, ReconcileError> {
        let parent = self
            .table
            .get(parent_id)
            .ok_or_else(|| ConsistencyError::MissingNode(parent_id.clone()))?;
        parent
            .children
            .iter()
            .position(|c| c == child)
            .ok_or_else(|| {
                ConsistencyError::NotAmongSiblings {
                    parent: parent_id.clone(),
                    child: child.clone(),
                }
                .into()
            })
    }

    /// Removes `remove` then applies `add`. Only elements carry attributes.
    pub fn modify_attributes(
        &mut self,
        element_id: &NodeId,
        add: &BTreeMap<String, AttrValue>,
        remove: &[String],
    ) -> Result<(), ReconcileError> {
        let node = self
            .table
            .get(element_id)
            .ok_or_else(|| ConsistencyError::MissingNode(element_id.clone()))?;
        if !matches!(node.kind, NodeKind::Element { .. }) {
            return Err(ProtocolError::InvalidKind {
                node: element_id.clone(),
                expected: "element",
                actual: node.kind.name(),
            }
            .into());
        }
        let host_node = node
            .host
            .clone()
            .ok_or_else(|| ConsistencyError::MissingHostNode(element_id.clone()))?;

        if let Some((name, AttrValue::Unknown(value))) =
            add.iter().find(|(_, v)| matches!(v, AttrValue::Unknown(_)))
        {
            return Err(ProtocolError::UnknownAttribute {
                node: element_id.clone(),
                name: name.clone(),
                value: value.to_string(),
            }
            .into());
        }

        for name in remove {
            self.unbind_attribute(element_id, &host_node, name);
        }
        for (name, value) in add {
            self.bind_attribute(element_id, &host_node, name, value)?;
        }
        Ok(())
    }

    /// Rewrites the child list of `element_id`.
    ///
    /// Removals are applied in ascending position order against the current
    /// children. Insertion positions index the resulting list and are applied
    /// in descending order.
    pub fn modify_children(
        &mut self,
        element_id: &NodeId,
        children_length_start: usize,
        remove_these: &BTreeMap<usize, Option<String>>,
        then_insert_these: &BTreeMap<usize, InsertionSource>,
    ) -> Result<(), ReconcileError> {
        let node = self
            .table
            .get(element_id)
            .ok_or_else(|| ConsistencyError::MissingNode(element_id.clone()))?;
        if matches!(node.kind, NodeKind::Text | NodeKind::Widget { .. }) {
            return Err(ProtocolError::InvalidKind {
                node: element_id.clone(),
                expected: "element",
                actual: node.kind.name(),
            }
            .into());
        }
        let is_fragment = node.is_fragment();
        let children: Vec<NodeId> = node.children.to_vec();

        let host_parent = self.fragment_element_parent(element_id)?;
        let offset = self.fragment_index(element_id)?;

        let observed = if is_fragment {
            self.host_width(element_id)
        } else {
            self.host.child_count(&host_parent)
        };
        if observed != children_length_start {
            tracing::warn!(
                node = %element_id,
                expected = children_length_start,
                observed,
                "child count differs from what the patch assumes"
            );
        }

        if let Some(&position) = remove_these.keys().find(|&&p| p >= children.len()) {
            return Err(ConsistencyError::PositionOutOfRange {
                node: element_id.clone(),
                position,
                len: children.len(),
            }
            .into());
        }
        let final_len = children.len() - remove_these.len() + then_insert_these.len();
        if let Some(&position) = then_insert_these.keys().find(|&&p| p >= final_len) {
            return Err(ConsistencyError::PositionOutOfRange {
                node: element_id.clone(),
                position,
                len: final_len,
            }
            .into());
        }
        let mut tags: FxHashSet<&str> = FxHashSet::default();
        for tag in remove_these.values().flatten() {
            if !tags.insert(tag.as_str()) {
                return Err(ProtocolError::DuplicateMoveTag(tag.clone()).into());
            }
        }
        let mut moved: FxHashSet<&str> = FxHashSet::default();
        for source in then_insert_these.values() {
            if let InsertionSource::Move(tag) = source {
                if !moved.insert(tag.as_str()) {
                    return Err(ProtocolError::DuplicateMoveTag(tag.clone()).into());
                }
                if !tags.contains(tag.as_str()) {
                    return Err(ConsistencyError::UnknownMoveTag(tag.clone()).into());
                }
            }
        }

        let mut stash: FxHashMap<String, NodeId> = FxHashMap::default();
        for (&position, tag) in remove_these {
            let child = &children[position];
            for host_node in self.host_nodes(child) {
                self.host.remove_child(&host_parent, &host_node);
            }
            match tag {
                Some(tag) => {
                    stash.insert(tag.clone(), child.clone());
                }
                None => self.dispose(child),
            }
        }

        let mut list: SmallVec<[NodeId; 4]> = children
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !remove_these.contains_key(i))
            .map(|(_, c)| c)
            .collect();

        let positions: Vec<usize> = then_insert_these.keys().copied().collect();
        for (rank, &position) in positions.iter().enumerate().rev() {
            // `rank` smaller insertions are still missing from `list`.
            let index = (position - rank).min(list.len());
            let child_id = match &then_insert_these[&position] {
                InsertionSource::Move(tag) => {
                    let moved = stash
                        .remove(tag)
                        .ok_or_else(|| ConsistencyError::UnknownMoveTag(tag.clone()));
                    let moved = match moved {
                        Ok(moved) => moved,
                        Err(err) => {
                            self.store_children(element_id, list);
                            self.dispose_stash(stash);
                            return Err(err.into());
                        }
                    };
                    self.table.set_parent(&moved, element_id.clone());
                    moved
                }
                InsertionSource::Create(rendering) => {
                    if let Err(err) = self.build(rendering, element_id) {
                        self.store_children(element_id, list);
                        self.dispose_stash(stash);
                        return Err(err);
                    }
                    rendering.id().clone()
                }
            };

            let before = offset + list[..index].iter().map(|c| self.host_width(c)).sum::<usize>();
            let reference = self.host.child_at(&host_parent, before);
            for host_node in self.host_nodes(&child_id) {
                self.host.insert_before(&host_parent, &host_node, reference.as_ref());
            }
            list.insert(index, child_id);
        }

        self.store_children(element_id, list);
        if !stash.is_empty() {
            tracing::warn!(
                node = %element_id,
                count = stash.len(),
                "moved children were never reinserted"
            );
            self.dispose_stash(stash);
        }
        Ok(())
    }

    fn store_children(&mut self, id: &NodeId, list: SmallVec<[NodeId; 4]>) {
        if let Some(node) = self.table.get_mut(id) {
            node.children = list;
        }
    }

    fn dispose_stash(&mut self, stash: FxHashMap<String, NodeId>) {
        for (_, id) in stash {
            self.dispose(&id);
        }
    }

    /// Forwards new props to a live widget.
    pub fn reconcile_widget(&mut self, id: &NodeId, props: &Value) -> Result<(), ReconcileError> {
        let node = self
            .table
            .get(id)
            .ok_or_else(|| ConsistencyError::MissingNode(id.clone()))?;
        let NodeKind::Widget { name } = &node.kind else {
            return Err(ProtocolError::InvalidKind {
                node: id.clone(),
                expected: "widget",
                actual: node.kind.name(),
            }
            .into());
        };
        let name = name.clone();
        let host_node = node
            .host
            .clone()
            .ok_or_else(|| ConsistencyError::MissingHostNode(id.clone()))?;
        let widget = node
            .widget
            .clone()
            .ok_or_else(|| ProtocolError::UnknownWidget(name.clone()))?;
        widget
            .reconcile(&mut self.host, &host_node, props)
            .map_err(|source| ProtocolError::Widget { name, source }.into())
    }

    pub fn apply_patch(&mut self, patch: &Patch) -> Result<(), ReconcileError> {
        tracing::debug!(kind = patch.kind(), "applying patch");
        match patch {
            Patch::ModifyChildren(p) => self.modify_children(
                &p.element_id,
                p.children_length_start,
                &p.remove_these,
                &p.then_insert_these,
            ),
            Patch::ModifyAttributes(p) => self.modify_attributes(&p.element_id, &p.add, &p.remove),
            Patch::ReplaceElement(p) => self.replace_element(&p.element_id, &p.new_element),
            Patch::ReplaceRoot(p) => self.replace_root(&p.root).map(|_| ()),
            Patch::Invalidate => {
                tracing::warn!("invalidate reached the reconciler, skipping");
                Ok(())
            }
        }
    }

    /// Applies `patches` in order.
    ///
    /// A protocol error stops the batch. Consistency errors are logged and
    /// the batch continues; the first one is returned once it is done.
    pub fn apply_patches(&mut self, patches: &[Patch]) -> Result<(), ReconcileError> {
        let mut first_inconsistency = None;
        for (index, patch) in patches.iter().enumerate() {
            match self.apply_patch(patch) {
                Ok(()) => {}
                Err(err) if err.is_consistency() => {
                    tracing::warn!(index, kind = patch.kind(), error = %err, "patch does not match the mirror");
                    first_inconsistency.get_or_insert(err);
                }
                Err(err) => {
                    tracing::error!(index, kind = patch.kind(), error = %err, "patch rejected");
                    return Err(err);
                }
            }
        }
        match first_inconsistency {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Checks that every mirrored node is reachable from the root exactly
    /// once and that the parent index agrees with the child lists.
    pub fn verify_integrity(&self) -> Result<(), ConsistencyError> {
        let Some(root) = &self.root else {
            return if self.table.is_empty() {
                Ok(())
            } else {
                Err(ConsistencyError::NoRoot)
            };
        };
        let mut visited = FxHashSet::default();
        self.walk_verify(root, &mut visited)?;
        match self.table.ids().find(|id| !visited.contains(*id)) {
            Some(orphan) => Err(ConsistencyError::MissingParent(orphan.clone())),
            None => Ok(()),
        }
    }

    fn walk_verify<'a>(&'a self, id: &'a NodeId, visited: &mut FxHashSet<&'a NodeId>) -> Result<(), ConsistencyError> {
        let node = self
            .table
            .get(id)
            .ok_or_else(|| ConsistencyError::MissingNode(id.clone()))?;
        if !visited.insert(id) {
            return Err(ConsistencyError::DuplicateNode(id.clone()));
        }
        if node.host.is_none() && !node.is_fragment() {
            return Err(ConsistencyError::MissingHostNode(id.clone()));
        }
        for child in &node.children {
            if self.table.parent(child) != Some(id) {
                return Err(ConsistencyError::NotAmongSiblings {
                    parent: id.clone(),
                    child: child.clone(),
                });
            }
            self.walk_verify(child, visited)?;
        }
        Ok(())
    }
}
