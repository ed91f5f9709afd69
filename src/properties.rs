//! Identifier and property building blocks for the content hypergraph.
//!
//! All structural relationships in the projection are resolved by id through
//! the hierarchy tables rather than by in-memory references: nodes are flat
//! records keyed by [`NodeAnchor`], aggregates are keyed by
//! [`NodeAggregateId`], and branches are keyed by [`ContentStreamId`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
pub use uuid::Uuid;

use crate::error::StratumError;

/// Cross-variant identity of a piece of content. All nodes that represent
/// "the same content" in different dimension space points share one
/// aggregate id.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Default,
)]
pub struct NodeAggregateId(Uuid);

impl NodeAggregateId {
    pub fn new() -> Self {
        NodeAggregateId(Uuid::new_v4())
    }
}

impl From<Uuid> for NodeAggregateId {
    fn from(id: Uuid) -> Self {
        NodeAggregateId(id)
    }
}

impl TryFrom<&str> for NodeAggregateId {
    type Error = StratumError;

    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Ok(NodeAggregateId(Uuid::parse_str(string)?))
    }
}

impl Display for NodeAggregateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

impl From<&NodeAggregateId> for String {
    fn from(val: &NodeAggregateId) -> Self {
        format!("{val}")
    }
}

/// Identifier of one isolated, branchable line of history over the graph.
/// Two content streams never share hierarchy rows.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Default,
)]
pub struct ContentStreamId(Uuid);

impl ContentStreamId {
    pub fn new() -> Self {
        ContentStreamId(Uuid::new_v4())
    }
}

impl From<Uuid> for ContentStreamId {
    fn from(id: Uuid) -> Self {
        ContentStreamId(id)
    }
}

impl TryFrom<&str> for ContentStreamId {
    type Error = StratumError;

    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Ok(ContentStreamId(Uuid::parse_str(string)?))
    }
}

impl Display for ContentStreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

impl From<&ContentStreamId> for String {
    fn from(val: &ContentStreamId) -> Self {
        format!("{val}")
    }
}

/// Internal storage key of one node row. Anchors never leave the storage
/// layer; callers address content by aggregate id and variant context.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Default,
)]
pub struct NodeAnchor(Uuid);

impl NodeAnchor {
    pub fn new() -> Self {
        NodeAnchor(Uuid::new_v4())
    }

    /// Sentinel parent anchor for root hyperedges, so root nodes are
    /// addressable through the same hierarchy table as everything else.
    pub fn root_sentinel() -> Self {
        NodeAnchor(Uuid::nil())
    }

    pub fn is_root_sentinel(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for NodeAnchor {
    fn from(id: Uuid) -> Self {
        NodeAnchor(id)
    }
}

impl TryFrom<&str> for NodeAnchor {
    type Error = StratumError;

    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Ok(NodeAnchor(Uuid::parse_str(string)?))
    }
}

impl Display for NodeAnchor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

impl From<&NodeAnchor> for String {
    fn from(val: &NodeAnchor) -> Self {
        format!("{val}")
    }
}

/// Name of a node type as declared by the type schema service.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeTypeName(String);

impl NodeTypeName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        NodeTypeName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeTypeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeTypeName {
    fn from(name: &str) -> Self {
        NodeTypeName(name.to_string())
    }
}

impl From<&NodeTypeName> for String {
    fn from(val: &NodeTypeName) -> Self {
        val.0.clone()
    }
}

/// Edge label for name-addressed children, notably tethered (auto-created)
/// ones. Names are non-empty and compared case-sensitively.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for NodeName {
    type Error = StratumError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        if name.is_empty() {
            Err(StratumError::Command("node name must not be empty".to_string()))
        } else {
            Ok(NodeName(name.to_string()))
        }
    }
}

impl Display for NodeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&NodeName> for String {
    fn from(val: &NodeName) -> Self {
        val.0.clone()
    }
}

/// Structural role of a node. Closed set; detectors match exhaustively.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NodeClassification {
    /// Top of a content stream's tree; no parent, no origin variance.
    Root,
    /// Ordinary user-created content.
    Regular,
    /// Auto-created, name-addressed child mandated by the parent's type.
    Tethered,
}

impl NodeClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeClassification::Root => "root",
            NodeClassification::Regular => "regular",
            NodeClassification::Tethered => "tethered",
        }
    }

    pub fn is_tethered(&self) -> bool {
        matches!(self, NodeClassification::Tethered)
    }
}

impl Display for NodeClassification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for NodeClassification {
    type Error = StratumError;

    fn try_from(src: &str) -> Result<NodeClassification, StratumError> {
        match src {
            "root" => Ok(NodeClassification::Root),
            "regular" => Ok(NodeClassification::Regular),
            "tethered" => Ok(NodeClassification::Tethered),
            _ => Err(StratumError::Serialization(format!(
                "Invalid node classification '{src}'. Valid options: root, regular, tethered"
            ))),
        }
    }
}

/// A node's serialized property bag: a JSON object mapping property name to
/// value. Values stay serialized until a caller asks for a typed view.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCollection(Map<String, Value>);

impl PropertyCollection {
    pub fn new() -> Self {
        PropertyCollection(Map::new())
    }

    /// Typed read of one property. `None` when the property is absent,
    /// a [`StratumError::Deserialization`] when it is present but does not
    /// decode as `T` — absence and corruption are distinct signals.
    pub fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StratumError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                StratumError::Deserialization(format!(
                    "property '{key}' failed to deserialize: {e}"
                ))
            }),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set<T: serde::Serialize>(&mut self, key: &str, value: T) -> Result<(), StratumError> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn set_raw(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).expect("JSON object maps serialize infallibly")
    }

    pub fn from_json(json: &str) -> Result<Self, StratumError> {
        let map: Map<String, Value> = serde_json::from_str(json).map_err(|e| {
            StratumError::Deserialization(format!("malformed property payload: {e}"))
        })?;
        Ok(PropertyCollection(map))
    }
}

impl FromIterator<(String, Value)> for PropertyCollection {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        PropertyCollection(iter.into_iter().collect())
    }
}
