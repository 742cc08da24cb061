//! Structural edits to the mirrored tree.

use crate::rendering::{AttrValue, NodeId, Rendering, RootRendering};
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Patch {
    #[serde(rename = "modify-children")]
    ModifyChildren(ModifyChildren),
    #[serde(rename = "modify-attrs")]
    ModifyAttributes(ModifyAttributes),
    #[serde(rename = "replace-element")]
    ReplaceElement(ReplaceElement),
    #[serde(rename = "replace-root")]
    ReplaceRoot(ReplaceRoot),
    /// The mirror may have drifted from the remote tree; only a full resync fixes it.
    #[serde(rename = "invalidate")]
    Invalidate,
}

impl Patch {
    pub fn kind(&self) -> &'static str {
        match self {
            Patch::ModifyChildren(_) => "modify-children",
            Patch::ModifyAttributes(_) => "modify-attrs",
            Patch::ReplaceElement(_) => "replace-element",
            Patch::ReplaceRoot(_) => "replace-root",
            Patch::Invalidate => "invalidate",
        }
    }

    pub fn is_invalidate(&self) -> bool {
        matches!(self, Patch::Invalidate)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Patch::ModifyChildren(p) => p.remove_these.is_empty() && p.then_insert_these.is_empty(),
            Patch::ModifyAttributes(p) => p.add.is_empty() && p.remove.is_empty(),
            _ => false,
        }
    }
}

/// Reorders one node's child sequence.
///
/// Positions in `remove_these` index the children before the edit; positions
/// in `then_insert_these` index the children after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyChildren {
    pub element_id: NodeId,
    pub children_length_start: usize,
    /// `None` discards the child, `Some(tag)` keeps it aside for a later insertion.
    #[serde(default, deserialize_with = "positions")]
    pub remove_these: BTreeMap<usize, Option<String>>,
    #[serde(default, deserialize_with = "positions")]
    pub then_insert_these: BTreeMap<usize, InsertionSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyAttributes {
    pub element_id: NodeId,
    #[serde(default)]
    pub add: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceElement {
    pub element_id: NodeId,
    pub new_element: Rendering,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireReplaceRoot")]
pub struct ReplaceRoot {
    pub root: RootRendering,
}

// Older servers send the root's children as `items` instead of a root wrapper.
#[derive(Deserialize)]
struct WireReplaceRoot {
    root: Option<RootRendering>,
    items: Option<Vec<Rendering>>,
}

impl TryFrom<WireReplaceRoot> for ReplaceRoot {
    type Error = String;

    fn try_from(wire: WireReplaceRoot) -> Result<Self, Self::Error> {
        match (wire.root, wire.items) {
            (Some(root), _) => Ok(ReplaceRoot { root }),
            (None, Some(items)) => Ok(ReplaceRoot {
                root: RootRendering::from_items(items),
            }),
            (None, None) => Err("replace-root needs `root` or `items`".to_string()),
        }
    }
}

/// Where an inserted child comes from.
///
/// On the wire this is a two element array: `[0, tag]` reuses the child
/// removed under `tag`, `[1, rendering]` builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertionSource {
    Move(String),
    Create(Rendering),
}

impl Serialize for InsertionSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        match self {
            InsertionSource::Move(tag) => {
                tuple.serialize_element(&0u8)?;
                tuple.serialize_element(tag)?;
            }
            InsertionSource::Create(rendering) => {
                tuple.serialize_element(&1u8)?;
                tuple.serialize_element(rendering)?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for InsertionSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (side, value) = <(u8, Value)>::deserialize(deserializer)?;
        match side {
            0 => match value {
                Value::String(tag) => Ok(InsertionSource::Move(tag)),
                other => Err(D::Error::custom(format!("move tag must be a string, got {other}"))),
            },
            1 => serde_json::from_value(value)
                .map(InsertionSource::Create)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("unknown insertion side {other}"))),
        }
    }
}

// JSON object keys are strings; inside an internally tagged enum serde no
// longer coerces them to integers, so positions are parsed by hand.
fn positions<'de, D, V>(deserializer: D) -> Result<BTreeMap<usize, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = BTreeMap::<String, V>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            key.parse::<usize>()
                .map(|position| (position, value))
                .map_err(|_| D::Error::custom(format!("invalid child position `{key}`")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_modify_children() {
        let patch: Patch = serde_json::from_value(json!({
            "kind": "modify-children",
            "element_id": "list",
            "children_length_start": 3,
            "remove_these": {"0": null, "2": "m"},
            "then_insert_these": {
                "0": [0, "m"],
                "2": [1, {"kind": "text", "id": "t9", "value": "new"}]
            }
        }))
        .unwrap();

        let Patch::ModifyChildren(p) = patch else {
            panic!("expected modify-children");
        };
        assert_eq!(p.children_length_start, 3);
        assert_eq!(p.remove_these[&0], None);
        assert_eq!(p.remove_these[&2].as_deref(), Some("m"));
        assert_eq!(p.then_insert_these[&0], InsertionSource::Move("m".into()));
        assert!(matches!(
            p.then_insert_these[&2],
            InsertionSource::Create(Rendering::Text { .. })
        ));
    }

    #[test]
    fn test_decode_other_kinds() {
        let patches: Vec<Patch> = serde_json::from_value(json!([
            {"kind": "modify-attrs", "element_id": "e", "add": {"class": "x"}, "remove": ["title"]},
            {"kind": "replace-element", "element_id": "e",
             "new_element": {"kind": "element", "id": "f", "tag": "p", "attrs": {}, "children": []}},
            {"kind": "replace-root", "root": {"kind": "root", "id": "r", "children": []}},
            {"kind": "invalidate"}
        ]))
        .unwrap();

        let kinds: Vec<_> = patches.iter().map(Patch::kind).collect();
        assert_eq!(
            kinds,
            ["modify-attrs", "replace-element", "replace-root", "invalidate"]
        );
        assert!(patches[3].is_invalidate());
    }

    #[test]
    fn test_replace_root_accepts_items() {
        let patch: Patch = serde_json::from_value(json!({
            "kind": "replace-root",
            "items": [{"kind": "text", "id": "t", "value": "hello"}]
        }))
        .unwrap();
        let Patch::ReplaceRoot(p) = patch else {
            panic!("expected replace-root");
        };
        assert_eq!(p.root.children.len(), 1);
    }

    #[test]
    fn test_unknown_patch_kind_is_rejected() {
        let err = serde_json::from_value::<Patch>(json!({"kind": "teleport"}));
        assert!(err.is_err());
    }

    #[test]
    fn test_insertion_source_wire_shape() {
        let source = InsertionSource::Move("k".into());
        assert_eq!(serde_json::to_value(&source).unwrap(), json!([0, "k"]));
        assert!(serde_json::from_value::<InsertionSource>(json!([2, "k"])).is_err());
    }
}
