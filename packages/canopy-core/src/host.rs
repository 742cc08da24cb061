//! The rendering surface the reconciler drives.

use crate::rendering::NodeId;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Invoked by the host when a bound event fires, with the event's parameters.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Primitive operations of a rendering host.
///
/// `Node` is a cheap handle to a host node; `Listener` is whatever the host
/// needs to detach an event listener later. Implementations are expected to
/// be infallible for well-formed calls: the reconciler only issues
/// operations on nodes it created and still tracks.
pub trait HostBinding: Send + 'static {
    type Node: Clone + PartialEq + Debug + Send;
    type Listener: Send;

    /// The surface the root's children are attached to.
    fn mount(&mut self) -> Self::Node;

    fn create_element(&mut self, tag: &str) -> Self::Node;
    fn create_text(&mut self, value: &str) -> Self::Node;

    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);
    fn remove_attribute(&mut self, node: &Self::Node, name: &str);
    fn set_style(&mut self, node: &Self::Node, property: &str, value: &str);

    fn add_event_listener(
        &mut self,
        node: &Self::Node,
        event: &str,
        callback: EventCallback,
    ) -> Self::Listener;
    fn remove_event_listener(&mut self, node: &Self::Node, listener: Self::Listener);

    fn child_count(&self, parent: &Self::Node) -> usize;
    fn child_at(&self, parent: &Self::Node, index: usize) -> Option<Self::Node>;

    /// Inserts `child` before `reference`, or appends when `reference` is `None`.
    /// A child already attached elsewhere is moved.
    fn insert_before(&mut self, parent: &Self::Node, child: &Self::Node, reference: Option<&Self::Node>);
    fn insert_after(&mut self, parent: &Self::Node, child: &Self::Node, reference: &Self::Node);
    fn remove_child(&mut self, parent: &Self::Node, child: &Self::Node);
    fn replace_node(&mut self, parent: &Self::Node, old: &Self::Node, new: &Self::Node);
    /// Swaps the full child set of `parent` in one step.
    fn replace_children(&mut self, parent: &Self::Node, children: &[Self::Node]);
}

/// A host event bound to a remote handler, ready to be forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub element_id: NodeId,
    pub handler_id: String,
    pub name: String,
    pub params: Value,
}

pub type EventSender = mpsc::UnboundedSender<HostEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HostEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded()
}

/// `onClick` becomes `click`; names without the prefix are only lowercased.
pub fn event_name(attribute: &str) -> String {
    attribute
        .strip_prefix("on")
        .unwrap_or(attribute)
        .to_lowercase()
}
