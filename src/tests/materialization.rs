//! Tests for node/aggregate materialization and schema declarations.

use serde_json::json;

use crate::{
    dimension::{DimensionSpacePoint, OriginDimensionSpacePoint},
    error::StratumError,
    node::{Node, NodeAggregate, NodeRow, NodeRowWithContext},
    properties::{ContentStreamId, NodeAggregateId, NodeAnchor},
    schema::{PropertyDeclaration, PropertyType},
};

fn point(language: &str) -> DimensionSpacePoint {
    DimensionSpacePoint::new([("language", language)])
}

fn row(
    stream: ContentStreamId,
    aggregate: NodeAggregateId,
    anchor: NodeAnchor,
    origin: &DimensionSpacePoint,
    properties: &str,
) -> NodeRow {
    NodeRow {
        anchor,
        content_stream_id: stream,
        node_aggregate_id: aggregate,
        origin_dimension_space_point: origin.to_json(),
        origin_dimension_space_point_hash: origin.hash(),
        node_type_name: "Article".into(),
        classification: "regular".to_string(),
        name: None,
        properties: properties.to_string(),
    }
}

fn context(row: NodeRow, covered: &DimensionSpacePoint, disabled: bool) -> NodeRowWithContext {
    NodeRowWithContext {
        row,
        dimension_space_point: covered.to_json(),
        dimension_space_point_hash: covered.hash(),
        disabled,
    }
}

#[test]
fn node_mapping_rejects_malformed_properties() {
    let stream = ContentStreamId::new();
    let aggregate = NodeAggregateId::new();
    let bad = row(stream, aggregate, NodeAnchor::new(), &point("en"), "not json");
    assert!(matches!(
        Node::from_row(&bad),
        Err(StratumError::Deserialization(_))
    ));
}

#[test]
fn node_mapping_is_deterministic() {
    let stream = ContentStreamId::new();
    let aggregate = NodeAggregateId::new();
    let good = row(
        stream,
        aggregate,
        NodeAnchor::new(),
        &point("en"),
        r#"{"title": "hello"}"#,
    );
    let node = Node::from_row(&good).unwrap();
    assert_eq!(node.aggregate_id, aggregate);
    assert_eq!(node.origin.as_point(), &point("en"));
    assert_eq!(
        node.properties.get::<String>("title").unwrap(),
        Some("hello".to_string())
    );
}

#[test]
fn empty_input_materializes_no_aggregate() {
    assert!(NodeAggregate::from_rows(Vec::new()).unwrap().is_none());
}

#[test]
fn single_origin_coverage_bookkeeping() {
    let stream = ContentStreamId::new();
    let aggregate = NodeAggregateId::new();
    let anchor = NodeAnchor::new();
    let en = point("en");
    let en_us = point("en_us");
    // One variant authored at en, effective at en and en_us, soft-disabled
    // at en_us.
    let rows = vec![
        context(row(stream, aggregate, anchor, &en, "{}"), &en, false),
        context(row(stream, aggregate, anchor, &en, "{}"), &en_us, true),
    ];
    let materialized = NodeAggregate::from_rows(rows).unwrap().unwrap();

    let origin = OriginDimensionSpacePoint::from(en.clone());
    assert!(materialized.occupies(&origin));
    assert_eq!(materialized.occupied_points().count(), 1);
    assert!(materialized.covers(&en));
    assert!(materialized.covers(&en_us));
    assert_eq!(materialized.coverage_of(&origin).len(), 2);
    assert_eq!(materialized.occupation_of(&en_us), Some(&origin));
    assert!(materialized.disables(&en_us));
    assert!(!materialized.disables(&en));
}

#[test]
fn covered_points_partition_across_origins() {
    let stream = ContentStreamId::new();
    let aggregate = NodeAggregateId::new();
    let en = point("en");
    let en_us = point("en_us");
    let en_anchor = NodeAnchor::new();
    let us_anchor = NodeAnchor::new();
    // The en_us variant shadows the en variant at en_us.
    let rows = vec![
        context(row(stream, aggregate, en_anchor, &en, "{}"), &en, false),
        context(row(stream, aggregate, us_anchor, &en_us, "{}"), &en_us, false),
    ];
    let materialized = NodeAggregate::from_rows(rows).unwrap().unwrap();

    let en_origin = OriginDimensionSpacePoint::from(en.clone());
    let us_origin = OriginDimensionSpacePoint::from(en_us.clone());
    assert_eq!(materialized.occupied_points().count(), 2);
    assert_eq!(materialized.occupation_of(&en), Some(&en_origin));
    assert_eq!(materialized.occupation_of(&en_us), Some(&us_origin));
    assert_eq!(materialized.coverage_of(&en_origin).len(), 1);
    assert_eq!(materialized.coverage_of(&us_origin).len(), 1);
}

#[test]
fn mixed_aggregate_rows_are_rejected() {
    let stream = ContentStreamId::new();
    let en = point("en");
    let rows = vec![
        context(
            row(stream, NodeAggregateId::new(), NodeAnchor::new(), &en, "{}"),
            &en,
            false,
        ),
        context(
            row(stream, NodeAggregateId::new(), NodeAnchor::new(), &en, "{}"),
            &en,
            false,
        ),
    ];
    assert!(matches!(
        NodeAggregate::from_rows(rows),
        Err(StratumError::Command(_))
    ));
}

#[test]
fn grouped_materialization_preserves_encounter_order() {
    let stream = ContentStreamId::new();
    let en = point("en");
    let first = NodeAggregateId::new();
    let second = NodeAggregateId::new();
    // Deliberately interleave the two aggregates' rows.
    let rows = vec![
        context(row(stream, second, NodeAnchor::new(), &en, "{}"), &en, false),
        context(row(stream, first, NodeAnchor::new(), &en, "{}"), &en, false),
        context(
            row(stream, second, NodeAnchor::new(), &point("de"), "{}"),
            &point("de"),
            false,
        ),
    ];
    let aggregates = NodeAggregate::aggregates_from_rows(rows).unwrap();
    assert_eq!(aggregates.len(), 2);
    assert_eq!(aggregates[0].aggregate_id, second);
    assert_eq!(aggregates[1].aggregate_id, first);
    assert_eq!(aggregates[0].covered_points().len(), 2);
}

#[test]
fn datetime_defaults_serialize_to_text() {
    let declaration =
        PropertyDeclaration::with_default(PropertyType::DateTime, json!(1700000000));
    assert_eq!(declaration.serialized_default(), Some(json!("1700000000")));

    let textual = PropertyDeclaration::with_default(
        PropertyType::DateTime,
        json!("2024-01-01T00:00:00Z"),
    );
    assert_eq!(
        textual.serialized_default(),
        Some(json!("2024-01-01T00:00:00Z"))
    );
}

#[test]
fn plain_defaults_pass_through() {
    let declaration = PropertyDeclaration::with_default(PropertyType::String, json!(""));
    assert_eq!(declaration.serialized_default(), Some(json!("")));
    assert_eq!(
        PropertyDeclaration::new(PropertyType::String).serialized_default(),
        None
    );
}
