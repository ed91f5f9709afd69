//! Domain events consumed by the projector.
//!
//! Events arrive already validated from the write side; the projector folds
//! them into the hypergraph tables. Corrective actions emitted by the
//! structure adjustment service are expressed as these same events and
//! re-enter through the normal write path — the projection is never patched
//! directly.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint},
    properties::{
        ContentStreamId, NodeAggregateId, NodeClassification, NodeName, NodeTypeName,
        PropertyCollection,
    },
};

/// One outgoing reference edge carried by [`GraphEvent::NodeReferencesSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReference {
    pub target: NodeAggregateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyCollection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// A root aggregate enters the stream, covering the whole configured
    /// dimension space with a single variant.
    RootNodeAggregateCreated {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        node_type: NodeTypeName,
        coverage: DimensionSpacePointSet,
    },
    /// A new aggregate with its first variant. `coverage` is the
    /// specialization set of `origin` minus points already occupied by
    /// other aggregates' claims — computed on the write side.
    NodeAggregateCreated {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        node_type: NodeTypeName,
        origin: OriginDimensionSpacePoint,
        coverage: DimensionSpacePointSet,
        parent_aggregate_id: NodeAggregateId,
        name: Option<NodeName>,
        classification: NodeClassification,
        initial_properties: PropertyCollection,
        /// Insert before this sibling; `None` appends at the end.
        succeeding_sibling: Option<NodeAggregateId>,
    },
    /// A new variant of an existing aggregate: a copy of the source
    /// variant's content authored at `target_origin`, taking over the
    /// listed coverage points.
    NodeVariantCreated {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        target_origin: OriginDimensionSpacePoint,
        coverage: DimensionSpacePointSet,
    },
    /// Property writes on one variant: `set` upserts, `unset` removes.
    NodePropertiesSet {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
        set: PropertyCollection,
        unset: Vec<String>,
    },
    /// Replace the named reference edge set of the source node in the given
    /// points. Order of `references` is the stored order.
    NodeReferencesSet {
        content_stream: ContentStreamId,
        source_aggregate_id: NodeAggregateId,
        affected_points: DimensionSpacePointSet,
        name: NodeName,
        references: Vec<NodeReference>,
    },
    /// Re-hang and/or re-order an aggregate in the listed points.
    /// `new_parent_aggregate_id = None` keeps the current parent.
    NodeAggregateMoved {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        new_parent_aggregate_id: Option<NodeAggregateId>,
        /// Re-insert before this sibling; `None` appends at the end.
        succeeding_sibling: Option<NodeAggregateId>,
        affected_points: DimensionSpacePointSet,
    },
    /// Remove the aggregate's coverage at the listed points, including the
    /// subtrees hanging below it there. A variant whose coverage drops to
    /// zero disappears from the stream.
    NodeAggregateRemoved {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        affected_covered_points: DimensionSpacePointSet,
    },
    /// Soft-hide the aggregate at the listed points.
    NodeAggregateDisabled {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        affected_points: DimensionSpacePointSet,
    },
    NodeAggregateEnabled {
        content_stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
        affected_points: DimensionSpacePointSet,
    },
    /// Dimension migration: every row keyed on `source` is re-keyed to
    /// `target`, origins included.
    DimensionSpacePointMoved {
        content_stream: ContentStreamId,
        source: DimensionSpacePoint,
        target: DimensionSpacePoint,
    },
    /// Copy-on-write branch: the target stream starts as a full copy of the
    /// source stream's rows.
    ContentStreamForked {
        source_content_stream: ContentStreamId,
        target_content_stream: ContentStreamId,
    },
    ContentStreamRemoved {
        content_stream: ContentStreamId,
    },
}

impl GraphEvent {
    /// The stream whose projection this event mutates. Forks report the
    /// target stream.
    pub fn content_stream(&self) -> ContentStreamId {
        match self {
            GraphEvent::RootNodeAggregateCreated { content_stream, .. } => *content_stream,
            GraphEvent::NodeAggregateCreated { content_stream, .. } => *content_stream,
            GraphEvent::NodeVariantCreated { content_stream, .. } => *content_stream,
            GraphEvent::NodePropertiesSet { content_stream, .. } => *content_stream,
            GraphEvent::NodeReferencesSet { content_stream, .. } => *content_stream,
            GraphEvent::NodeAggregateMoved { content_stream, .. } => *content_stream,
            GraphEvent::NodeAggregateRemoved { content_stream, .. } => *content_stream,
            GraphEvent::NodeAggregateDisabled { content_stream, .. } => *content_stream,
            GraphEvent::NodeAggregateEnabled { content_stream, .. } => *content_stream,
            GraphEvent::DimensionSpacePointMoved { content_stream, .. } => *content_stream,
            GraphEvent::ContentStreamForked {
                target_content_stream,
                ..
            } => *target_content_stream,
            GraphEvent::ContentStreamRemoved { content_stream } => *content_stream,
        }
    }
}

impl Display for GraphEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GraphEvent::RootNodeAggregateCreated { .. } => write!(f, "RootNodeAggregateCreated"),
            GraphEvent::NodeAggregateCreated { .. } => write!(f, "NodeAggregateCreated"),
            GraphEvent::NodeVariantCreated { .. } => write!(f, "NodeVariantCreated"),
            GraphEvent::NodePropertiesSet { .. } => write!(f, "NodePropertiesSet"),
            GraphEvent::NodeReferencesSet { .. } => write!(f, "NodeReferencesSet"),
            GraphEvent::NodeAggregateMoved { .. } => write!(f, "NodeAggregateMoved"),
            GraphEvent::NodeAggregateRemoved { .. } => write!(f, "NodeAggregateRemoved"),
            GraphEvent::NodeAggregateDisabled { .. } => write!(f, "NodeAggregateDisabled"),
            GraphEvent::NodeAggregateEnabled { .. } => write!(f, "NodeAggregateEnabled"),
            GraphEvent::DimensionSpacePointMoved { .. } => write!(f, "DimensionSpacePointMoved"),
            GraphEvent::ContentStreamForked { .. } => write!(f, "ContentStreamForked"),
            GraphEvent::ContentStreamRemoved { .. } => write!(f, "ContentStreamRemoved"),
        }
    }
}
