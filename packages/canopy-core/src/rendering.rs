//! Wire description of a UI tree as produced by the remote renderer.

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Id used for the root wrapper when the remote side sends a bare list of renderings.
pub const SYNTHETIC_ROOT_ID: &str = "root";

/// Remote-assigned node id. Unique within one session's tree.
///
/// The wire allows strings or integers; both are normalized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Str(String),
    Int(i64),
    Uint(u64),
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match WireId::deserialize(deserializer)? {
            WireId::Str(s) => NodeId(s),
            WireId::Int(i) => NodeId(i.to_string()),
            WireId::Uint(u) => NodeId(u.to_string()),
        })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Reference to a server-side event handler, `{"__handler__": id}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerRef {
    #[serde(rename = "__handler__")]
    pub handler_id: String,
}

/// Attribute value carried by an element rendering.
///
/// Anything that is not a string, a handler reference or a flat style map
/// lands in `Unknown` and is rejected when the element is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Handler(HandlerRef),
    Style(BTreeMap<String, String>),
    Unknown(Value),
}

impl AttrValue {
    pub fn handler(handler_id: impl Into<String>) -> Self {
        AttrValue::Handler(HandlerRef {
            handler_id: handler_id.into(),
        })
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Rendering {
    Text {
        id: NodeId,
        value: String,
    },
    Element {
        id: NodeId,
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, AttrValue>,
        #[serde(default)]
        children: Vec<Rendering>,
    },
    Fragment {
        id: NodeId,
        #[serde(default)]
        children: Vec<Rendering>,
    },
    Widget {
        id: NodeId,
        name: String,
        #[serde(default)]
        props: Value,
    },
}

impl Rendering {
    pub fn id(&self) -> &NodeId {
        match self {
            Rendering::Text { id, .. }
            | Rendering::Element { id, .. }
            | Rendering::Fragment { id, .. }
            | Rendering::Widget { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rendering::Text { .. } => "text",
            Rendering::Element { .. } => "element",
            Rendering::Fragment { .. } => "fragment",
            Rendering::Widget { .. } => "widget",
        }
    }

    pub fn children(&self) -> &[Rendering] {
        match self {
            Rendering::Element { children, .. } | Rendering::Fragment { children, .. } => children,
            _ => &[],
        }
    }

    /// Collects every id in this subtree, depth first.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id().clone());
        for child in self.children() {
            child.collect_ids(out);
        }
    }

    pub fn text(id: impl Into<NodeId>, value: impl Into<String>) -> Self {
        Rendering::Text {
            id: id.into(),
            value: value.into(),
        }
    }

    pub fn element(
        id: impl Into<NodeId>,
        tag: impl Into<String>,
        attrs: impl IntoIterator<Item = (String, AttrValue)>,
        children: Vec<Rendering>,
    ) -> Self {
        Rendering::Element {
            id: id.into(),
            tag: tag.into(),
            attrs: attrs.into_iter().collect(),
            children,
        }
    }

    pub fn fragment(id: impl Into<NodeId>, children: Vec<Rendering>) -> Self {
        Rendering::Fragment {
            id: id.into(),
            children,
        }
    }
}

/// The rendering anchored at the mount surface, `{"kind":"root", id, children}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RootRendering {
    pub id: NodeId,
    #[serde(default)]
    pub children: Vec<Rendering>,
}

impl RootRendering {
    pub fn new(id: impl Into<NodeId>, children: Vec<Rendering>) -> Self {
        Self {
            id: id.into(),
            children,
        }
    }

    /// Wraps a bare list of renderings under [`SYNTHETIC_ROOT_ID`].
    pub fn from_items(children: Vec<Rendering>) -> Self {
        Self::new(SYNTHETIC_ROOT_ID, children)
    }
}

impl Serialize for RootRendering {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RootRendering", 3)?;
        state.serialize_field("kind", "root")?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("children", &self.children)?;
        state.end()
    }
}

/// Result of a `render` call: the root wrapper, or a bare list of renderings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RenderResult {
    Root(RootRendering),
    Items(Vec<Rendering>),
}

impl RenderResult {
    pub fn into_root(self) -> RootRendering {
        match self {
            RenderResult::Root(root) => root,
            RenderResult::Items(items) => RootRendering::from_items(items),
        }
    }
}
