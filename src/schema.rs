//! Node type schema registry.
//!
//! The projection consumes type schemas, it never defines them: a schema
//! names the properties a type declares (with optional defaults), the
//! tethered children it mandates in declaration order, and the allow-lists
//! that constrain what may hang below it. The structure adjustment service
//! audits the live projection against whatever this registry currently
//! holds.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::properties::{NodeName, NodeTypeName};

/// Declared value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Json,
}

/// One declared property: its type and an optional default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertyDeclaration {
    pub fn new(property_type: PropertyType) -> Self {
        PropertyDeclaration {
            property_type,
            default: None,
        }
    }

    pub fn with_default(property_type: PropertyType, default: Value) -> Self {
        PropertyDeclaration {
            property_type,
            default: Some(default),
        }
    }

    /// The default in its serialized (storable) form. Date-time defaults are
    /// stored as their text rendering, so a non-string default is
    /// stringified before it is written into a property bag.
    pub fn serialized_default(&self) -> Option<Value> {
        let default = self.default.as_ref()?;
        match self.property_type {
            PropertyType::DateTime => match default {
                Value::String(_) => Some(default.clone()),
                other => Some(Value::String(other.to_string())),
            },
            _ => Some(default.clone()),
        }
    }
}

/// A tethered (auto-created) child mandated by a type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TetheredChild {
    pub name: NodeName,
    pub node_type: NodeTypeName,
}

/// The full declaration of one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeSchema {
    pub name: NodeTypeName,
    /// Declared properties by name.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDeclaration>,
    /// Mandated auto-created children. Vec because declaration order is the
    /// required sibling order.
    #[serde(default)]
    pub tethered_children: Vec<TetheredChild>,
    /// Types allowed as direct (non-tethered) children.
    #[serde(default)]
    pub allowed_child_types: BTreeSet<NodeTypeName>,
    /// Per tethered-child-name allow-lists for grandchildren reached through
    /// that tethered child.
    #[serde(default)]
    pub tethered_child_constraints: BTreeMap<NodeName, BTreeSet<NodeTypeName>>,
}

impl NodeTypeSchema {
    pub fn new<S: Into<String>>(name: S) -> Self {
        NodeTypeSchema {
            name: NodeTypeName::new(name),
            properties: BTreeMap::new(),
            tethered_children: Vec::new(),
            allowed_child_types: BTreeSet::new(),
            tethered_child_constraints: BTreeMap::new(),
        }
    }

    pub fn with_property<S: Into<String>>(
        mut self,
        name: S,
        declaration: PropertyDeclaration,
    ) -> Self {
        self.properties.insert(name.into(), declaration);
        self
    }

    pub fn with_tethered_child(mut self, name: NodeName, node_type: NodeTypeName) -> Self {
        self.tethered_children.push(TetheredChild { name, node_type });
        self
    }

    pub fn allowing_child_types<I: IntoIterator<Item = NodeTypeName>>(mut self, types: I) -> Self {
        self.allowed_child_types.extend(types);
        self
    }

    pub fn allowing_grandchild_types<I: IntoIterator<Item = NodeTypeName>>(
        mut self,
        through: NodeName,
        types: I,
    ) -> Self {
        self.tethered_child_constraints
            .entry(through)
            .or_default()
            .extend(types);
        self
    }

    pub fn allows_child_type(&self, child_type: &NodeTypeName) -> bool {
        self.allowed_child_types.contains(child_type)
    }

    /// Whether a grandchild of `grandchild_type` is allowed underneath this
    /// type's tethered child named `through`.
    pub fn allows_grandchild_type(
        &self,
        through: &NodeName,
        grandchild_type: &NodeTypeName,
    ) -> bool {
        self.tethered_child_constraints
            .get(through)
            .map(|allowed| allowed.contains(grandchild_type))
            .unwrap_or(false)
    }

    pub fn tethered_child(&self, name: &NodeName) -> Option<&TetheredChild> {
        self.tethered_children.iter().find(|t| &t.name == name)
    }

    pub fn declares_tethered_child(&self, name: &NodeName) -> bool {
        self.tethered_child(name).is_some()
    }
}

/// Thread-safe registry of node type schemas.
///
/// A cheap cloneable handle; schemas are stored behind `Arc` so lookups
/// hand out shared references without copying declarations.
#[derive(Debug)]
pub struct NodeTypeRegistry(Arc<RwLock<HashMap<NodeTypeName, Arc<NodeTypeSchema>>>>);

impl Clone for NodeTypeRegistry {
    fn clone(&self) -> Self {
        NodeTypeRegistry(self.0.clone())
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        NodeTypeRegistry(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Register a schema. An existing schema of the same name is replaced
    /// and a log message emitted.
    pub fn register(&self, schema: NodeTypeSchema) {
        let mut writer = self.0.write();
        if writer.contains_key(&schema.name) {
            tracing::info!(
                "[NodeTypeRegistry::register] Overwriting existing node type: {}",
                schema.name
            );
        }
        writer.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Drop a schema, simulating a type removed from the schema service.
    pub fn unregister(&self, name: &NodeTypeName) {
        self.0.write().remove(name);
    }

    pub fn has_type(&self, name: &NodeTypeName) -> bool {
        self.0.read().contains_key(name)
    }

    pub fn get_type(&self, name: &NodeTypeName) -> Option<Arc<NodeTypeSchema>> {
        self.0.read().get(name).cloned()
    }

    pub fn list_types(&self) -> Vec<NodeTypeName> {
        self.0.read().keys().cloned().collect()
    }
}
