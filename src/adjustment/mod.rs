//! Structure adjustment service: a pull-based auditor over the live
//! projection.
//!
//! [`StructureAdjustmentService::find_all_adjustments`] walks every node
//! type name that occurs in the stream and runs each detector family over
//! it, yielding findings lazily — consumers can stop after the first
//! finding without paying for a full enumeration, and a failing detector is
//! isolated into the stream as an error item without stopping its siblings.
//!
//! Repairs are data ([`Remediation`]); [`StructureAdjustmentService::apply`]
//! re-checks the finding's precondition against the live projection, aborts
//! with [`StratumError::ConcurrencyConflict`] when it went stale, and
//! otherwise projects the corrective events atomically. `apply` returns
//! only after the projection reflects the correction, so repairs chain
//! safely; repairs touching the same aggregate must still be serialized by
//! the caller.

mod detectors;
mod finding;

pub use finding::{Adjustment, AdjustmentType, Remediation};

use std::{collections::VecDeque, sync::Arc};

use crate::{
    db::Projector,
    dimension::DimensionSpacePointSet,
    error::StratumError,
    event::GraphEvent,
    properties::{
        ContentStreamId, NodeAggregateId, NodeClassification, NodeName, NodeTypeName,
        PropertyCollection,
    },
    query::{ContentGraph, VisibilityConstraints},
    schema::NodeTypeRegistry,
    variation::InterDimensionalVariationGraph,
};

/// The detector families, run independently per node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorKind {
    UnknownType,
    DisallowedChild,
    TetheredConsistency,
    Properties,
    Coverage,
}

impl DetectorKind {
    const ALL: [DetectorKind; 5] = [
        DetectorKind::UnknownType,
        DetectorKind::DisallowedChild,
        DetectorKind::TetheredConsistency,
        DetectorKind::Properties,
        DetectorKind::Coverage,
    ];
}

/// Audits one content stream's projection against the current type schema
/// and the dimension coverage invariant.
#[derive(Clone)]
pub struct StructureAdjustmentService {
    pub(crate) graph: ContentGraph,
    pub(crate) projector: Projector,
    pub(crate) registry: NodeTypeRegistry,
    pub(crate) variation: Arc<InterDimensionalVariationGraph>,
    pub(crate) content_stream_id: ContentStreamId,
}

impl StructureAdjustmentService {
    pub fn new(
        projector: Projector,
        registry: NodeTypeRegistry,
        variation: Arc<InterDimensionalVariationGraph>,
        content_stream_id: ContentStreamId,
    ) -> Self {
        let graph = ContentGraph::new(projector.pool().clone(), registry.clone());
        StructureAdjustmentService {
            graph,
            projector,
            registry,
            variation,
            content_stream_id,
        }
    }

    /// Lazily audit every node type name used in the stream.
    pub fn find_all_adjustments(&self) -> AdjustmentStream {
        AdjustmentStream::new(self.clone(), None)
    }

    /// Lazily audit a single node type name.
    pub fn find_adjustments_for_node_type(&self, type_name: NodeTypeName) -> AdjustmentStream {
        AdjustmentStream::new(self.clone(), Some(vec![type_name]))
    }

    async fn run_detector(
        &self,
        type_name: &NodeTypeName,
        detector: DetectorKind,
    ) -> Result<Vec<Adjustment>, StratumError> {
        match detector {
            DetectorKind::UnknownType => self.detect_unknown_type(type_name).await,
            DetectorKind::DisallowedChild => self.detect_disallowed_children(type_name).await,
            DetectorKind::TetheredConsistency => {
                self.detect_tethered_consistency(type_name).await
            }
            DetectorKind::Properties => self.detect_property_issues(type_name).await,
            DetectorKind::Coverage => self.detect_coverage(type_name).await,
        }
    }

    /// Execute a finding's remediation. All corrective events of one finding
    /// commit atomically; a stale precondition aborts with
    /// [`StratumError::ConcurrencyConflict`] instead of applying an outdated
    /// correction.
    #[tracing::instrument(skip(self, adjustment), fields(kind = %adjustment.adjustment_type))]
    pub async fn apply(&self, adjustment: &Adjustment) -> Result<(), StratumError> {
        let Some(remediation) = &adjustment.remediation else {
            return Err(StratumError::Command(format!(
                "finding {} for aggregate {} is not auto-fixable",
                adjustment.adjustment_type, adjustment.aggregate_id
            )));
        };
        let events = self.corrective_events(remediation).await?;
        tracing::debug!(
            "[StructureAdjustmentService] applying {} corrective event(s) for {}",
            events.len(),
            adjustment.adjustment_type
        );
        self.projector.apply_batch(&events).await
    }

    async fn corrective_events(
        &self,
        remediation: &Remediation,
    ) -> Result<Vec<GraphEvent>, StratumError> {
        let stream = self.content_stream_id;
        match remediation {
            Remediation::RemoveAggregate { aggregate_id } => {
                let aggregate = self
                    .graph
                    .find_node_aggregate_by_id(stream, *aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "aggregate {aggregate_id} no longer exists"
                        ))
                    })?;
                Ok(vec![GraphEvent::NodeAggregateRemoved {
                    content_stream: stream,
                    aggregate_id: *aggregate_id,
                    affected_covered_points: aggregate.covered_points().clone(),
                }])
            }
            Remediation::RemoveCoverage {
                aggregate_id,
                point,
            } => {
                let aggregate = self
                    .graph
                    .find_node_aggregate_by_id(stream, *aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "aggregate {aggregate_id} no longer exists"
                        ))
                    })?;
                if !aggregate.covers(point) {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "aggregate {aggregate_id} no longer covers {point}"
                    )));
                }
                Ok(vec![GraphEvent::NodeAggregateRemoved {
                    content_stream: stream,
                    aggregate_id: *aggregate_id,
                    affected_covered_points: DimensionSpacePointSet::from(vec![point.clone()]),
                }])
            }
            Remediation::CreateTetheredNode {
                parent_aggregate_id,
                name,
                node_type,
            } => {
                let parent = self
                    .graph
                    .find_node_aggregate_by_id(stream, *parent_aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "parent aggregate {parent_aggregate_id} no longer exists"
                        ))
                    })?;
                let parent_schema =
                    self.registry.get_type(&parent.node_type).ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "type {} of parent {} is no longer defined",
                            parent.node_type, parent_aggregate_id
                        ))
                    })?;
                let declared = parent_schema.tethered_child(name).ok_or_else(|| {
                    StratumError::ConcurrencyConflict(format!(
                        "type {} no longer declares tethered child '{}'",
                        parent.node_type, name
                    ))
                })?;
                if &declared.node_type != node_type {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "tethered child '{}' is now declared as type {}, not {}",
                        name, declared.node_type, node_type
                    )));
                }
                let mut missing = DimensionSpacePointSet::empty();
                for point in parent.covered_points().iter() {
                    let subgraph = self.graph.subgraph(
                        stream,
                        point.clone(),
                        VisibilityConstraints::WithoutRestrictions,
                    );
                    if subgraph
                        .find_child_by_name(*parent_aggregate_id, name)
                        .await?
                        .is_none()
                    {
                        missing.insert(point.clone());
                    }
                }
                if missing.is_empty() {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "tethered child '{}' of {} already exists everywhere",
                        name, parent_aggregate_id
                    )));
                }
                Ok(self.tethered_creation_events(*parent_aggregate_id, name, node_type, &missing))
            }
            Remediation::ReorderTetheredChildren {
                parent_aggregate_id,
                order,
            } => {
                let parent = self
                    .graph
                    .find_node_aggregate_by_id(stream, *parent_aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "parent aggregate {parent_aggregate_id} no longer exists"
                        ))
                    })?;
                // Points where the present children deviate from the wanted
                // order, with the name -> aggregate resolution per point.
                let mut affected = DimensionSpacePointSet::empty();
                let mut resolved: Vec<(NodeName, NodeAggregateId)> = Vec::new();
                for point in parent.covered_points().iter() {
                    let subgraph = self.graph.subgraph(
                        stream,
                        point.clone(),
                        VisibilityConstraints::WithoutRestrictions,
                    );
                    let children = subgraph
                        .find_tethered_children(*parent_aggregate_id)
                        .await?;
                    let actual: Vec<&NodeName> = children
                        .iter()
                        .filter_map(|child| child.name.as_ref())
                        .filter(|name| order.contains(name))
                        .collect();
                    let desired: Vec<&NodeName> =
                        order.iter().filter(|name| actual.contains(name)).collect();
                    if actual != desired {
                        affected.insert(point.clone());
                        if resolved.is_empty() {
                            for child in children.iter() {
                                if let Some(name) = &child.name {
                                    if order.contains(name) {
                                        resolved.push((name.clone(), child.aggregate_id));
                                    }
                                }
                            }
                        }
                    }
                }
                if affected.is_empty() {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "tethered children of {} are already in the declared order",
                        parent_aggregate_id
                    )));
                }
                let ordered: Vec<NodeAggregateId> = order
                    .iter()
                    .filter_map(|name| {
                        resolved
                            .iter()
                            .find(|(resolved_name, _)| resolved_name == name)
                            .map(|(_, id)| *id)
                    })
                    .collect();
                // Back-to-front: the last child goes to the end, then each
                // earlier child is re-linked before its successor.
                let mut events = Vec::with_capacity(ordered.len());
                if let Some(last) = ordered.last() {
                    events.push(GraphEvent::NodeAggregateMoved {
                        content_stream: stream,
                        aggregate_id: *last,
                        new_parent_aggregate_id: None,
                        succeeding_sibling: None,
                        affected_points: affected.clone(),
                    });
                }
                for window in ordered.windows(2).rev() {
                    events.push(GraphEvent::NodeAggregateMoved {
                        content_stream: stream,
                        aggregate_id: window[0],
                        new_parent_aggregate_id: None,
                        succeeding_sibling: Some(window[1]),
                        affected_points: affected.clone(),
                    });
                }
                Ok(events)
            }
            Remediation::UnsetProperty {
                aggregate_id,
                origin,
                property,
            } => {
                let aggregate = self
                    .graph
                    .find_node_aggregate_by_id(stream, *aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "aggregate {aggregate_id} no longer exists"
                        ))
                    })?;
                let node = aggregate.node_by_occupied(origin).ok_or_else(|| {
                    StratumError::ConcurrencyConflict(format!(
                        "aggregate {aggregate_id} no longer occupies {origin}"
                    ))
                })?;
                if !node.properties.contains_key(property) {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "property '{property}' of {aggregate_id} at {origin} is already unset"
                    )));
                }
                Ok(vec![GraphEvent::NodePropertiesSet {
                    content_stream: stream,
                    aggregate_id: *aggregate_id,
                    origin: origin.clone(),
                    set: PropertyCollection::new(),
                    unset: vec![property.clone()],
                }])
            }
            Remediation::SetPropertyDefault {
                aggregate_id,
                origin,
                property,
                value,
            } => {
                let aggregate = self
                    .graph
                    .find_node_aggregate_by_id(stream, *aggregate_id)
                    .await?
                    .ok_or_else(|| {
                        StratumError::ConcurrencyConflict(format!(
                            "aggregate {aggregate_id} no longer exists"
                        ))
                    })?;
                let node = aggregate.node_by_occupied(origin).ok_or_else(|| {
                    StratumError::ConcurrencyConflict(format!(
                        "aggregate {aggregate_id} no longer occupies {origin}"
                    ))
                })?;
                if node.properties.contains_key(property) {
                    return Err(StratumError::ConcurrencyConflict(format!(
                        "property '{property}' of {aggregate_id} at {origin} is no longer missing"
                    )));
                }
                let mut set = PropertyCollection::new();
                set.set_raw(property, value.clone());
                Ok(vec![GraphEvent::NodePropertiesSet {
                    content_stream: stream,
                    aggregate_id: *aggregate_id,
                    origin: origin.clone(),
                    set,
                    unset: Vec::new(),
                }])
            }
        }
    }

    /// The creation event tree for one missing tethered child: a first
    /// variant at the generalization-most missing point, further variants
    /// for points the first cannot cover, then recursively the children the
    /// child's own type mandates.
    fn tethered_creation_events(
        &self,
        parent_aggregate_id: NodeAggregateId,
        name: &NodeName,
        node_type: &NodeTypeName,
        points: &DimensionSpacePointSet,
    ) -> Vec<GraphEvent> {
        let new_aggregate_id = NodeAggregateId::new();
        let mut initial_properties = PropertyCollection::new();
        if let Some(schema) = self.registry.get_type(node_type) {
            for (key, declaration) in schema.properties.iter() {
                if let Some(default) = declaration.serialized_default() {
                    initial_properties.set_raw(key, default);
                }
            }
        }

        let mut events = Vec::new();
        let mut remaining = points.clone();
        let mut first_origin = None;
        for point in points.iter() {
            if !remaining.contains(point) {
                continue;
            }
            let covered_here = self
                .variation
                .specialization_set(point, true, &DimensionSpacePointSet::empty())
                .intersection(&remaining);
            match &first_origin {
                None => {
                    let origin = crate::dimension::OriginDimensionSpacePoint::from(point.clone());
                    events.push(GraphEvent::NodeAggregateCreated {
                        content_stream: self.content_stream_id,
                        aggregate_id: new_aggregate_id,
                        node_type: node_type.clone(),
                        origin: origin.clone(),
                        coverage: covered_here.clone(),
                        parent_aggregate_id,
                        name: Some(name.clone()),
                        classification: NodeClassification::Tethered,
                        initial_properties: initial_properties.clone(),
                        succeeding_sibling: None,
                    });
                    first_origin = Some(origin);
                }
                Some(source_origin) => {
                    events.push(GraphEvent::NodeVariantCreated {
                        content_stream: self.content_stream_id,
                        aggregate_id: new_aggregate_id,
                        source_origin: source_origin.clone(),
                        target_origin: crate::dimension::OriginDimensionSpacePoint::from(
                            point.clone(),
                        ),
                        coverage: covered_here.clone(),
                    });
                }
            }
            remaining = remaining.difference(&covered_here);
        }

        if let Some(schema) = self.registry.get_type(node_type) {
            for declared in schema.tethered_children.iter() {
                events.extend(self.tethered_creation_events(
                    new_aggregate_id,
                    &declared.name,
                    &declared.node_type,
                    points,
                ));
            }
        }
        events
    }
}

/// Lazy, restartable sequence of audit findings.
///
/// Pull with [`AdjustmentStream::next`], or adapt into a
/// `futures_core::Stream` with [`AdjustmentStream::into_stream`]. Detector
/// failures surface as `Err` items; the stream continues with the remaining
/// detectors.
pub struct AdjustmentStream {
    service: StructureAdjustmentService,
    preset: Option<Vec<NodeTypeName>>,
    loaded: bool,
    types: VecDeque<NodeTypeName>,
    work: VecDeque<(NodeTypeName, DetectorKind)>,
    buffer: VecDeque<Result<Adjustment, StratumError>>,
}

impl AdjustmentStream {
    fn new(service: StructureAdjustmentService, preset: Option<Vec<NodeTypeName>>) -> Self {
        AdjustmentStream {
            service,
            preset,
            loaded: false,
            types: VecDeque::new(),
            work: VecDeque::new(),
            buffer: VecDeque::new(),
        }
    }

    pub async fn next(&mut self) -> Option<Result<Adjustment, StratumError>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if let Some((type_name, detector)) = self.work.pop_front() {
                match self.service.run_detector(&type_name, detector).await {
                    Ok(findings) => self.buffer.extend(findings.into_iter().map(Ok)),
                    Err(error) => {
                        tracing::warn!(
                            "[AdjustmentStream] detector {:?} failed for type {}: {}",
                            detector,
                            type_name,
                            error
                        );
                        self.buffer.push_back(Err(error));
                    }
                }
                continue;
            }
            if !self.loaded {
                self.loaded = true;
                match self.preset.take() {
                    Some(preset) => self.types = preset.into(),
                    None => match self
                        .service
                        .graph
                        .used_node_type_names(self.service.content_stream_id)
                        .await
                    {
                        Ok(names) => self.types = names.into(),
                        Err(error) => self.buffer.push_back(Err(error)),
                    },
                }
                continue;
            }
            match self.types.pop_front() {
                Some(type_name) => {
                    for detector in DetectorKind::ALL {
                        self.work.push_back((type_name.clone(), detector));
                    }
                }
                None => return None,
            }
        }
    }

    /// Drain the rest of the stream. Mostly for tests and small projections;
    /// production consumers should pull incrementally.
    pub async fn collect_remaining(mut self) -> Vec<Result<Adjustment, StratumError>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }

    pub fn into_stream(
        self,
    ) -> impl futures_core::Stream<Item = Result<Adjustment, StratumError>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }
}
