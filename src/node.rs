//! Node and aggregate materialization.
//!
//! Flat storage rows become in-memory [`Node`]s and [`NodeAggregate`]s here.
//! A `Node` is one concrete variant of content; a `NodeAggregate` is the
//! cross-variant view of every node sharing an aggregate id within one
//! content stream, with full coverage bookkeeping: which origin points are
//! occupied, which covered points each occupant is the effective content
//! for, and which covered points are soft-disabled.

use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::{
    dimension::{
        DimensionSpacePoint, DimensionSpacePointHash, DimensionSpacePointSet,
        OriginDimensionSpacePoint,
    },
    error::StratumError,
    properties::{
        ContentStreamId, NodeAggregateId, NodeAnchor, NodeClassification, NodeName, NodeTypeName,
        PropertyCollection,
    },
};

/// One raw row of the node table. Property payloads stay serialized; decoding
/// happens in [`Node::from_row`] so malformed payloads surface as a typed
/// error instead of failing the SQL fetch.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub anchor: NodeAnchor,
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub origin_dimension_space_point: String,
    pub origin_dimension_space_point_hash: DimensionSpacePointHash,
    pub node_type_name: NodeTypeName,
    pub classification: String,
    pub name: Option<String>,
    pub properties: String,
}

impl FromRow<'_, SqliteRow> for NodeRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let anchor_str: &str = row.try_get("anchor")?;
        let stream_str: &str = row.try_get("contentstreamid")?;
        let aggregate_str: &str = row.try_get("nodeaggregateid")?;
        let origin: String = row.try_get("origindimensionspacepoint")?;
        let origin_hash: String = row.try_get("origindimensionspacepointhash")?;
        let type_str: &str = row.try_get("nodetypename")?;
        let classification: String = row.try_get("classification")?;
        let name: Option<String> = row.try_get("name")?;
        let properties: String = row.try_get("properties")?;

        Ok(NodeRow {
            anchor: NodeAnchor::try_from(anchor_str).map_err(StratumError::from)?,
            content_stream_id: ContentStreamId::try_from(stream_str)
                .map_err(StratumError::from)?,
            node_aggregate_id: NodeAggregateId::try_from(aggregate_str)
                .map_err(StratumError::from)?,
            origin_dimension_space_point: origin,
            origin_dimension_space_point_hash: DimensionSpacePointHash::from_storage(origin_hash),
            node_type_name: NodeTypeName::from(type_str),
            classification,
            name,
            properties,
        })
    }
}

/// A node row joined with one hierarchy context it is linked into:
/// the covered dimension point and whether the aggregate is soft-disabled
/// there. Aggregate materialization consumes one of these per
/// (node, covered point) pair.
#[derive(Debug, Clone)]
pub struct NodeRowWithContext {
    pub row: NodeRow,
    pub dimension_space_point: String,
    pub dimension_space_point_hash: DimensionSpacePointHash,
    pub disabled: bool,
}

impl FromRow<'_, SqliteRow> for NodeRowWithContext {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let point: String = row.try_get("dimensionspacepoint")?;
        let point_hash: String = row.try_get("dimensionspacepointhash")?;
        let disabled: i64 = row.try_get("disabled")?;
        Ok(NodeRowWithContext {
            row: NodeRow::from_row(row)?,
            dimension_space_point: point,
            dimension_space_point_hash: DimensionSpacePointHash::from_storage(point_hash),
            disabled: disabled != 0,
        })
    }
}

/// One concrete variant of content.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) anchor: NodeAnchor,
    pub aggregate_id: NodeAggregateId,
    pub origin: OriginDimensionSpacePoint,
    pub node_type: NodeTypeName,
    pub classification: NodeClassification,
    pub name: Option<NodeName>,
    pub properties: PropertyCollection,
}

impl Node {
    /// Pure, deterministic row mapping. A malformed property payload raises
    /// [`StratumError::Deserialization`] — the signal the structure
    /// adjustment audit relies on — rather than dropping data.
    pub fn from_row(row: &NodeRow) -> Result<Node, StratumError> {
        let origin = DimensionSpacePoint::from_json(&row.origin_dimension_space_point)?;
        let classification = NodeClassification::try_from(&row.classification[..])?;
        let name = match row.name.as_deref() {
            None => None,
            Some(name) => Some(NodeName::try_from(name)?),
        };
        let properties = PropertyCollection::from_json(&row.properties)?;
        Ok(Node {
            anchor: row.anchor,
            aggregate_id: row.node_aggregate_id,
            origin: OriginDimensionSpacePoint::from(origin),
            node_type: row.node_type_name.clone(),
            classification,
            name,
            properties,
        })
    }

    pub fn is_tethered(&self) -> bool {
        self.classification.is_tethered()
    }
}

/// Cross-variant view of all nodes sharing one aggregate id within one
/// content stream.
#[derive(Debug, Clone)]
pub struct NodeAggregate {
    pub content_stream_id: ContentStreamId,
    pub aggregate_id: NodeAggregateId,
    pub node_type: NodeTypeName,
    pub classification: NodeClassification,
    pub name: Option<NodeName>,
    /// One node per occupied origin point.
    nodes_by_occupied: BTreeMap<DimensionSpacePointHash, Node>,
    occupied_points: BTreeMap<DimensionSpacePointHash, OriginDimensionSpacePoint>,
    /// Points each occupant is the effective content for.
    coverage_by_occupied: BTreeMap<DimensionSpacePointHash, DimensionSpacePointSet>,
    /// Reverse index: covered point -> occupying origin.
    occupation_by_covered: BTreeMap<DimensionSpacePointHash, DimensionSpacePointHash>,
    covered_points: DimensionSpacePointSet,
    disabled_points: DimensionSpacePointSet,
}

impl NodeAggregate {
    /// Build the full coverage bookkeeping in a single streaming pass over
    /// every (node, covered point) row of one aggregate. Returns `None` for
    /// empty input: the aggregate does not exist.
    pub fn from_rows<I>(rows: I) -> Result<Option<NodeAggregate>, StratumError>
    where
        I: IntoIterator<Item = NodeRowWithContext>,
    {
        let mut aggregate: Option<NodeAggregate> = None;
        for context_row in rows {
            let covered_point = DimensionSpacePoint::from_json(&context_row.dimension_space_point)?;
            let covered_hash = context_row.dimension_space_point_hash.clone();
            let origin_hash = context_row.row.origin_dimension_space_point_hash.clone();

            let entry = match aggregate.as_mut() {
                Some(existing) => {
                    if existing.aggregate_id != context_row.row.node_aggregate_id {
                        return Err(StratumError::Command(format!(
                            "rows for aggregate {} mixed into materialization of {}",
                            context_row.row.node_aggregate_id, existing.aggregate_id
                        )));
                    }
                    existing
                }
                None => {
                    let node = Node::from_row(&context_row.row)?;
                    aggregate = Some(NodeAggregate {
                        content_stream_id: context_row.row.content_stream_id,
                        aggregate_id: node.aggregate_id,
                        node_type: node.node_type.clone(),
                        classification: node.classification,
                        name: node.name.clone(),
                        nodes_by_occupied: BTreeMap::new(),
                        occupied_points: BTreeMap::new(),
                        coverage_by_occupied: BTreeMap::new(),
                        occupation_by_covered: BTreeMap::new(),
                        covered_points: DimensionSpacePointSet::empty(),
                        disabled_points: DimensionSpacePointSet::empty(),
                    });
                    aggregate.as_mut().expect("just inserted")
                }
            };

            if !entry.nodes_by_occupied.contains_key(&origin_hash) {
                let node = Node::from_row(&context_row.row)?;
                entry
                    .occupied_points
                    .insert(origin_hash.clone(), node.origin.clone());
                entry.nodes_by_occupied.insert(origin_hash.clone(), node);
            }
            entry
                .coverage_by_occupied
                .entry(origin_hash.clone())
                .or_default()
                .insert(covered_point.clone());
            entry
                .occupation_by_covered
                .insert(covered_hash.clone(), origin_hash);
            if context_row.disabled {
                entry.disabled_points.insert(covered_point.clone());
            }
            entry.covered_points.insert(covered_point);
        }
        Ok(aggregate)
    }

    /// Group rows by aggregate id and materialize one aggregate per group,
    /// preserving the encounter order of distinct aggregate ids.
    pub fn aggregates_from_rows<I>(rows: I) -> Result<Vec<NodeAggregate>, StratumError>
    where
        I: IntoIterator<Item = NodeRowWithContext>,
    {
        let mut order: Vec<NodeAggregateId> = Vec::new();
        let mut groups: BTreeMap<NodeAggregateId, Vec<NodeRowWithContext>> = BTreeMap::new();
        for row in rows {
            let id = row.row.node_aggregate_id;
            if !groups.contains_key(&id) {
                order.push(id);
            }
            groups.entry(id).or_default().push(row);
        }
        let mut aggregates = Vec::with_capacity(order.len());
        for id in order {
            let group = groups.remove(&id).expect("group recorded for every id");
            if let Some(aggregate) = NodeAggregate::from_rows(group)? {
                aggregates.push(aggregate);
            }
        }
        Ok(aggregates)
    }

    pub fn occupied_points(&self) -> impl Iterator<Item = &OriginDimensionSpacePoint> {
        self.occupied_points.values()
    }

    pub fn occupies(&self, origin: &OriginDimensionSpacePoint) -> bool {
        self.occupied_points.contains_key(&origin.hash())
    }

    pub fn covered_points(&self) -> &DimensionSpacePointSet {
        &self.covered_points
    }

    pub fn covers(&self, point: &DimensionSpacePoint) -> bool {
        self.covered_points.contains(point)
    }

    pub fn node_by_occupied(&self, origin: &OriginDimensionSpacePoint) -> Option<&Node> {
        self.nodes_by_occupied.get(&origin.hash())
    }

    /// The node whose variant is the effective content at `point`.
    pub fn node_by_covered(&self, point: &DimensionSpacePoint) -> Option<&Node> {
        self.occupation_by_covered
            .get(&point.hash())
            .and_then(|origin_hash| self.nodes_by_occupied.get(origin_hash))
    }

    /// The origin occupying `point`, if the aggregate covers it.
    pub fn occupation_of(&self, point: &DimensionSpacePoint) -> Option<&OriginDimensionSpacePoint> {
        self.occupation_by_covered
            .get(&point.hash())
            .and_then(|origin_hash| self.occupied_points.get(origin_hash))
    }

    /// Points the variant authored at `origin` is the effective content for.
    pub fn coverage_of(&self, origin: &OriginDimensionSpacePoint) -> DimensionSpacePointSet {
        self.coverage_by_occupied
            .get(&origin.hash())
            .cloned()
            .unwrap_or_default()
    }

    pub fn disabled_points(&self) -> &DimensionSpacePointSet {
        &self.disabled_points
    }

    pub fn disables(&self, point: &DimensionSpacePoint) -> bool {
        self.disabled_points.contains(point)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_by_occupied.values()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.classification, NodeClassification::Root)
    }

    pub fn is_tethered(&self) -> bool {
        self.classification.is_tethered()
    }
}
