//! The detector families behind the structure adjustment audit.
//!
//! Each detector walks the projection for one node type and reports findings
//! independently of its siblings; a failing detector never stops the others.
//! Audits read with relaxed visibility so soft-disabled content is checked
//! like everything else, and they hold no locks: concurrent writes may cause
//! transient findings, which is why every remediation re-checks its
//! precondition before events are emitted.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    adjustment::{Adjustment, AdjustmentType, Remediation, StructureAdjustmentService},
    dimension::DimensionSpacePointSet,
    error::StratumError,
    node::NodeAggregate,
    properties::{NodeAggregateId, NodeName, NodeTypeName},
    query::{ContentSubgraph, VisibilityConstraints},
    schema::PropertyType,
    variation::VariantType,
};

fn value_matches_type(property_type: PropertyType, value: &Value) -> bool {
    match property_type {
        PropertyType::String => value.is_string(),
        PropertyType::Integer => value.is_i64() || value.is_u64(),
        PropertyType::Float => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::DateTime => value.is_string(),
        PropertyType::Json => true,
    }
}

impl StructureAdjustmentService {
    fn audit_subgraph(&self, point: &crate::dimension::DimensionSpacePoint) -> ContentSubgraph {
        self.graph.subgraph(
            self.content_stream_id,
            point.clone(),
            VisibilityConstraints::WithoutRestrictions,
        )
    }

    async fn aggregates_of(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<NodeAggregate>, StratumError> {
        self.graph
            .find_node_aggregates_by_type(self.content_stream_id, type_name)
            .await
    }

    /// The schema no longer defines this type: every node of it is flagged
    /// for removal.
    pub(crate) async fn detect_unknown_type(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<Adjustment>, StratumError> {
        if self.registry.has_type(type_name) {
            return Ok(Vec::new());
        }
        let mut findings = Vec::new();
        for aggregate in self.aggregates_of(type_name).await? {
            findings.push(Adjustment {
                adjustment_type: AdjustmentType::NodeTypeIsUnknown,
                content_stream_id: self.content_stream_id,
                aggregate_id: aggregate.aggregate_id,
                points: aggregate.covered_points().clone(),
                explanation: format!(
                    "node type {type_name} is no longer defined by the schema"
                ),
                remediation: Some(Remediation::RemoveAggregate {
                    aggregate_id: aggregate.aggregate_id,
                }),
            });
        }
        Ok(findings)
    }

    /// Per covered point: the parent's type must still allow this child, or
    /// — when the parent is itself tethered — the grandparent's type must
    /// allow this grandchild under the parent's name. Violations are
    /// point-scoped; the same aggregate may be fine in a sibling point.
    pub(crate) async fn detect_disallowed_children(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<Adjustment>, StratumError> {
        if !self.registry.has_type(type_name) {
            // Unknown types are wholly the unknown-type detector's finding.
            return Ok(Vec::new());
        }
        let mut findings = Vec::new();
        for aggregate in self.aggregates_of(type_name).await? {
            if aggregate.is_root() {
                continue;
            }
            for point in aggregate.covered_points().iter() {
                let subgraph = self.audit_subgraph(point);
                let Some(parent) = subgraph.find_parent(aggregate.aggregate_id).await? else {
                    continue;
                };
                let Some(parent_schema) = self.registry.get_type(&parent.node_type) else {
                    // Unknown parent types are the unknown-type detector's
                    // finding, not this one's.
                    continue;
                };
                let mut allowed = parent_schema.allows_child_type(type_name);
                if !allowed && aggregate.is_tethered() {
                    if let Some(name) = &aggregate.name {
                        allowed = parent_schema
                            .tethered_child(name)
                            .map(|declared| &declared.node_type == type_name)
                            .unwrap_or(false);
                    }
                }
                if !allowed && parent.is_tethered() {
                    if let Some(parent_name) = &parent.name {
                        if let Some(grandparent) = subgraph.find_parent(parent.aggregate_id).await?
                        {
                            if let Some(grandparent_schema) =
                                self.registry.get_type(&grandparent.node_type)
                            {
                                allowed = grandparent_schema
                                    .allows_grandchild_type(parent_name, type_name);
                            }
                        }
                    }
                }
                if !allowed {
                    findings.push(Adjustment {
                        adjustment_type: AdjustmentType::DisallowedChildNode,
                        content_stream_id: self.content_stream_id,
                        aggregate_id: aggregate.aggregate_id,
                        points: DimensionSpacePointSet::from(vec![point.clone()]),
                        explanation: format!(
                            "type {} of parent {} no longer allows child type {} at {}",
                            parent.node_type, parent.aggregate_id, type_name, point
                        ),
                        remediation: Some(Remediation::RemoveCoverage {
                            aggregate_id: aggregate.aggregate_id,
                            point: point.clone(),
                        }),
                    });
                }
            }
        }
        Ok(findings)
    }

    /// Tethered-child audit for parents of this type: every declared child
    /// must exist, be classified tethered, carry the declared type, and sit
    /// in declaration order; undeclared tethered children are extras.
    pub(crate) async fn detect_tethered_consistency(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<Adjustment>, StratumError> {
        let Some(schema) = self.registry.get_type(type_name) else {
            return Ok(Vec::new());
        };
        let mut findings = Vec::new();
        for parent in self.aggregates_of(type_name).await? {
            let mut missing: BTreeMap<NodeName, DimensionSpacePointSet> = BTreeMap::new();
            let mut not_tethered: BTreeMap<NodeAggregateId, (NodeName, DimensionSpacePointSet)> =
                BTreeMap::new();
            let mut type_violated: BTreeMap<
                NodeAggregateId,
                (NodeName, NodeTypeName, DimensionSpacePointSet),
            > = BTreeMap::new();
            let mut extras: BTreeMap<NodeAggregateId, (Option<NodeName>, DimensionSpacePointSet)> =
                BTreeMap::new();
            let mut wrongly_ordered = DimensionSpacePointSet::empty();

            for point in parent.covered_points().iter() {
                let subgraph = self.audit_subgraph(point);
                for declared in schema.tethered_children.iter() {
                    match subgraph
                        .find_child_by_name(parent.aggregate_id, &declared.name)
                        .await?
                    {
                        None => {
                            missing
                                .entry(declared.name.clone())
                                .or_default()
                                .insert(point.clone());
                        }
                        Some(child) if !child.is_tethered() => {
                            not_tethered
                                .entry(child.aggregate_id)
                                .or_insert_with(|| {
                                    (declared.name.clone(), DimensionSpacePointSet::empty())
                                })
                                .1
                                .insert(point.clone());
                        }
                        Some(child) if child.node_type != declared.node_type => {
                            type_violated
                                .entry(child.aggregate_id)
                                .or_insert_with(|| {
                                    (
                                        declared.name.clone(),
                                        child.node_type.clone(),
                                        DimensionSpacePointSet::empty(),
                                    )
                                })
                                .2
                                .insert(point.clone());
                        }
                        Some(_) => {}
                    }
                }

                let tethered = subgraph.find_tethered_children(parent.aggregate_id).await?;
                for child in tethered.iter() {
                    let declared = child
                        .name
                        .as_ref()
                        .map(|name| schema.declares_tethered_child(name))
                        .unwrap_or(false);
                    if !declared {
                        extras
                            .entry(child.aggregate_id)
                            .or_insert_with(|| (child.name.clone(), DimensionSpacePointSet::empty()))
                            .1
                            .insert(point.clone());
                    }
                }

                // Order check over the declared children that actually exist
                // at this point.
                let actual: Vec<&NodeName> = tethered
                    .iter()
                    .filter_map(|child| child.name.as_ref())
                    .filter(|name| schema.declares_tethered_child(name))
                    .collect();
                let desired: Vec<&NodeName> = schema
                    .tethered_children
                    .iter()
                    .map(|declared| &declared.name)
                    .filter(|name| actual.contains(name))
                    .collect();
                if actual != desired {
                    wrongly_ordered.insert(point.clone());
                }
            }

            for (name, points) in missing {
                let declared = schema
                    .tethered_child(&name)
                    .expect("name taken from the schema's declarations");
                findings.push(Adjustment {
                    adjustment_type: AdjustmentType::TetheredNodeMissing,
                    content_stream_id: self.content_stream_id,
                    aggregate_id: parent.aggregate_id,
                    points,
                    explanation: format!(
                        "type {} mandates a tethered child '{}' of type {} under {}, but none exists",
                        type_name, name, declared.node_type, parent.aggregate_id
                    ),
                    remediation: Some(Remediation::CreateTetheredNode {
                        parent_aggregate_id: parent.aggregate_id,
                        name,
                        node_type: declared.node_type.clone(),
                    }),
                });
            }
            for (child_id, (name, points)) in not_tethered {
                findings.push(Adjustment {
                    adjustment_type: AdjustmentType::NodeIsNotTetheredButShouldBe,
                    content_stream_id: self.content_stream_id,
                    aggregate_id: child_id,
                    points,
                    explanation: format!(
                        "child '{name}' of {} exists but is not classified tethered; \
                         this requires a manual migration",
                        parent.aggregate_id
                    ),
                    remediation: None,
                });
            }
            for (child_id, (name, actual_type, points)) in type_violated {
                let declared = schema
                    .tethered_child(&name)
                    .expect("name taken from the schema's declarations");
                findings.push(Adjustment {
                    adjustment_type: AdjustmentType::TetheredNodeTypeViolated,
                    content_stream_id: self.content_stream_id,
                    aggregate_id: child_id,
                    points,
                    explanation: format!(
                        "tethered child '{}' of {} is of type {} but the schema declares {}; \
                         this requires a manual migration",
                        name, parent.aggregate_id, actual_type, declared.node_type
                    ),
                    remediation: None,
                });
            }
            for (child_id, (name, points)) in extras {
                findings.push(Adjustment {
                    adjustment_type: AdjustmentType::DisallowedTetheredNode,
                    content_stream_id: self.content_stream_id,
                    aggregate_id: child_id,
                    points,
                    explanation: format!(
                        "tethered child {} ('{}') of {} is not declared by type {}",
                        child_id,
                        name.as_ref().map(|n| n.as_str()).unwrap_or("<unnamed>"),
                        parent.aggregate_id,
                        type_name
                    ),
                    remediation: Some(Remediation::RemoveAggregate {
                        aggregate_id: child_id,
                    }),
                });
            }
            if !wrongly_ordered.is_empty() {
                findings.push(Adjustment {
                    adjustment_type: AdjustmentType::TetheredNodeWronglyOrdered,
                    content_stream_id: self.content_stream_id,
                    aggregate_id: parent.aggregate_id,
                    points: wrongly_ordered,
                    explanation: format!(
                        "tethered children of {} are not in the declared order {:?}",
                        parent.aggregate_id,
                        schema
                            .tethered_children
                            .iter()
                            .map(|t| t.name.as_str())
                            .collect::<Vec<&str>>()
                    ),
                    remediation: Some(Remediation::ReorderTetheredChildren {
                        parent_aggregate_id: parent.aggregate_id,
                        order: schema
                            .tethered_children
                            .iter()
                            .map(|t| t.name.clone())
                            .collect(),
                    }),
                });
            }
        }
        Ok(findings)
    }

    /// Per node variant: obsolete properties (no longer declared),
    /// non-deserializable properties (present but failing their declared
    /// type), and missing schema defaults.
    pub(crate) async fn detect_property_issues(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<Adjustment>, StratumError> {
        let Some(schema) = self.registry.get_type(type_name) else {
            return Ok(Vec::new());
        };
        let mut findings = Vec::new();
        for aggregate in self.aggregates_of(type_name).await? {
            for node in aggregate.nodes() {
                let points = aggregate.coverage_of(&node.origin);
                for (key, value) in node.properties.iter() {
                    match schema.properties.get(key) {
                        None => findings.push(Adjustment {
                            adjustment_type: AdjustmentType::ObsoleteProperty,
                            content_stream_id: self.content_stream_id,
                            aggregate_id: aggregate.aggregate_id,
                            points: points.clone(),
                            explanation: format!(
                                "property '{}' of {} at {} is not declared by type {}",
                                key, aggregate.aggregate_id, node.origin, type_name
                            ),
                            remediation: Some(Remediation::UnsetProperty {
                                aggregate_id: aggregate.aggregate_id,
                                origin: node.origin.clone(),
                                property: key.to_string(),
                            }),
                        }),
                        Some(declaration)
                            if !value_matches_type(declaration.property_type, value) =>
                        {
                            findings.push(Adjustment {
                                adjustment_type: AdjustmentType::NonDeserializableProperty,
                                content_stream_id: self.content_stream_id,
                                aggregate_id: aggregate.aggregate_id,
                                points: points.clone(),
                                explanation: format!(
                                    "property '{}' of {} at {} does not deserialize as {:?}",
                                    key,
                                    aggregate.aggregate_id,
                                    node.origin,
                                    declaration.property_type
                                ),
                                remediation: Some(Remediation::UnsetProperty {
                                    aggregate_id: aggregate.aggregate_id,
                                    origin: node.origin.clone(),
                                    property: key.to_string(),
                                }),
                            })
                        }
                        Some(_) => {}
                    }
                }
                for (key, declaration) in schema.properties.iter() {
                    if declaration.default.is_none() || node.properties.contains_key(key) {
                        continue;
                    }
                    let value = declaration
                        .serialized_default()
                        .expect("checked default.is_some() above");
                    findings.push(Adjustment {
                        adjustment_type: AdjustmentType::MissingDefaultValue,
                        content_stream_id: self.content_stream_id,
                        aggregate_id: aggregate.aggregate_id,
                        points: points.clone(),
                        explanation: format!(
                            "property '{}' of {} at {} lacks the default declared by type {}",
                            key, aggregate.aggregate_id, node.origin, type_name
                        ),
                        remediation: Some(Remediation::SetPropertyDefault {
                            aggregate_id: aggregate.aggregate_id,
                            origin: node.origin.clone(),
                            property: key.to_string(),
                            value,
                        }),
                    });
                }
            }
        }
        Ok(findings)
    }

    /// Coverage invariant: every covered point must be the origin itself or
    /// one of its specializations. Report-only — correcting coverage is a
    /// data migration decision.
    pub(crate) async fn detect_coverage(
        &self,
        type_name: &NodeTypeName,
    ) -> Result<Vec<Adjustment>, StratumError> {
        let mut findings = Vec::new();
        for aggregate in self.aggregates_of(type_name).await? {
            if aggregate.is_root() {
                // Root aggregates cover the whole space from a
                // dimension-less origin by construction.
                continue;
            }
            for node in aggregate.nodes() {
                let origin = &node.origin;
                for covered in aggregate.coverage_of(origin).iter() {
                    let variant_type = self.variation.variant_type(covered, origin.as_point());
                    if !matches!(
                        variant_type,
                        VariantType::Same | VariantType::Specialization
                    ) {
                        findings.push(Adjustment {
                            adjustment_type: AdjustmentType::NodeCoversGeneralizationOrPeer,
                            content_stream_id: self.content_stream_id,
                            aggregate_id: aggregate.aggregate_id,
                            points: DimensionSpacePointSet::from(vec![covered.clone()]),
                            explanation: format!(
                                "{} covers {} from origin {}, which is a {} of it; \
                                 coverage may only flow toward specializations",
                                aggregate.aggregate_id, covered, origin, variant_type
                            ),
                            remediation: None,
                        });
                    }
                }
            }
        }
        Ok(findings)
    }
}
