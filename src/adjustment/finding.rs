//! Adjustment findings and their repair commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

use crate::{
    dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint},
    properties::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName},
};

/// Machine-readable category of a structural drift finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentType {
    NodeTypeIsUnknown,
    DisallowedChildNode,
    TetheredNodeMissing,
    NodeIsNotTetheredButShouldBe,
    TetheredNodeTypeViolated,
    DisallowedTetheredNode,
    TetheredNodeWronglyOrdered,
    ObsoleteProperty,
    NonDeserializableProperty,
    MissingDefaultValue,
    NodeCoversGeneralizationOrPeer,
}

impl Display for AdjustmentType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The closed set of repair commands a finding may carry.
///
/// Commands are data, not closures: they can be logged, inspected, and
/// unit-tested independently of detection. The service translates an
/// accepted command into corrective [`crate::event::GraphEvent`]s after
/// re-checking its precondition against the live projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Remediation {
    /// Remove the aggregate from every point it covers.
    RemoveAggregate { aggregate_id: NodeAggregateId },
    /// Remove the aggregate's coverage at one dimension point only.
    RemoveCoverage {
        aggregate_id: NodeAggregateId,
        point: DimensionSpacePoint,
    },
    /// Synthesize the missing tethered child (and its own mandated
    /// descendants) underneath the parent.
    CreateTetheredNode {
        parent_aggregate_id: NodeAggregateId,
        name: NodeName,
        node_type: NodeTypeName,
    },
    /// Re-link the parent's tethered children into the declared order,
    /// working back-to-front through `order`.
    ReorderTetheredChildren {
        parent_aggregate_id: NodeAggregateId,
        order: Vec<NodeName>,
    },
    /// Drop one property from the variant authored at `origin`.
    UnsetProperty {
        aggregate_id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
        property: String,
    },
    /// Write the schema default for a property the variant lacks.
    SetPropertyDefault {
        aggregate_id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
        property: String,
        value: Value,
    },
}

/// One detected deviation between the live projection and the current type
/// schema or coverage invariant.
///
/// Findings without a [`Remediation`] are surfaced all the same; they
/// require a human-directed migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub adjustment_type: AdjustmentType,
    pub content_stream_id: ContentStreamId,
    pub aggregate_id: NodeAggregateId,
    /// The dimension points the finding applies to.
    pub points: DimensionSpacePointSet,
    pub explanation: String,
    pub remediation: Option<Remediation>,
}

impl Adjustment {
    pub fn is_auto_fixable(&self) -> bool {
        self.remediation.is_some()
    }
}

impl Display for Adjustment {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "[{}] aggregate {}: {}",
            self.adjustment_type, self.aggregate_id, self.explanation
        )
    }
}
