//! Structure adjustment integration tests: the audit detects schema drift
//! and its repairs, expressed as ordinary events, restore consistency.

mod common;

use common::{ids, name, point, points, props, ProjectionFixture};
use serde_json::json;
use test_log::test;
use stratum_core::{
    adjustment::{Adjustment, AdjustmentType},
    dimension::OriginDimensionSpacePoint,
    event::GraphEvent,
    properties::{NodeAggregateId, NodeClassification, PropertyCollection},
    query::Pagination,
    StratumError,
};

async fn findings_for(
    fixture: &ProjectionFixture,
    type_name: &str,
) -> Vec<Adjustment> {
    fixture
        .adjustments()
        .find_adjustments_for_node_type(type_name.into())
        .collect_remaining()
        .await
        .into_iter()
        .map(|item| item.expect("detectors succeed on a healthy store"))
        .collect()
}

fn of_type(findings: &[Adjustment], kind: AdjustmentType) -> Vec<Adjustment> {
    findings
        .iter()
        .filter(|f| f.adjustment_type == kind)
        .cloned()
        .collect()
}

#[test(tokio::test)]
async fn a_clean_projection_yields_no_findings() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    fixture
        .create_everywhere(
            article,
            "Article",
            fixture.root,
            props(&[("summary", json!("ok")), ("title", json!("t"))]),
        )
        .await;
    let findings = fixture
        .adjustments()
        .find_all_adjustments()
        .collect_remaining()
        .await;
    assert!(
        findings.iter().all(|f| f.is_ok()),
        "no detector errors expected"
    );
    assert!(
        findings.is_empty(),
        "unexpected findings: {:?}",
        findings
    );
}

#[test(tokio::test)]
async fn unknown_node_types_are_flagged_for_removal() {
    let fixture = ProjectionFixture::new().await;
    let legacy = NodeAggregateId::new();
    fixture
        .create_everywhere(legacy, "LegacyWidget", fixture.root, props(&[]))
        .await;

    let findings = findings_for(&fixture, "LegacyWidget").await;
    let unknown = of_type(&findings, AdjustmentType::NodeTypeIsUnknown);
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].aggregate_id, legacy);
    assert!(unknown[0].is_auto_fixable());

    fixture.adjustments().apply(&unknown[0]).await.unwrap();
    assert!(fixture
        .subgraph("en")
        .find_by_id(legacy)
        .await
        .unwrap()
        .is_none());
    assert!(findings_for(&fixture, "LegacyWidget").await.is_empty());
}

/// The disallowed-child scenario: the same aggregate sits under a
/// no-longer-permitting parent at `en` but under a still-permitting parent
/// at `fr`, so the finding and its repair are scoped to `en` alone.
#[test(tokio::test)]
async fn disallowed_children_are_flagged_per_dimension_point() {
    let fixture = ProjectionFixture::new().await;
    let (document, section, article) = (
        NodeAggregateId::new(),
        NodeAggregateId::new(),
        NodeAggregateId::new(),
    );
    fixture
        .create_everywhere(document, "Document", fixture.root, props(&[]))
        .await;
    fixture
        .create_everywhere(section, "Section", fixture.root, props(&[]))
        .await;
    fixture
        .create_everywhere(article, "Article", document, props(&[]))
        .await;
    fixture
        .projector
        .apply(&GraphEvent::NodeAggregateMoved {
            content_stream: fixture.stream,
            aggregate_id: article,
            new_parent_aggregate_id: Some(section),
            succeeding_sibling: None,
            affected_points: points(&["fr"]),
        })
        .await
        .unwrap();

    // Schema change: Document stops allowing Article children.
    fixture.registry.register(
        stratum_core::schema::NodeTypeSchema::new("Document")
            .allowing_child_types(["Document".into()]),
    );

    let findings = findings_for(&fixture, "Article").await;
    let disallowed = of_type(&findings, AdjustmentType::DisallowedChildNode);
    // Flagged at en and en_us (where Document is the parent), never at fr
    // (where Section still allows Article).
    assert_eq!(disallowed.len(), 2);
    for finding in disallowed.iter() {
        assert_eq!(finding.aggregate_id, article);
        assert!(!finding.points.contains(&point("fr")));
    }

    for finding in disallowed.iter() {
        fixture.adjustments().apply(finding).await.unwrap();
    }
    assert!(fixture
        .subgraph("en")
        .find_by_id(article)
        .await
        .unwrap()
        .is_none());
    assert!(fixture
        .subgraph("fr")
        .find_by_id(article)
        .await
        .unwrap()
        .is_some());
    assert!(of_type(
        &findings_for(&fixture, "Article").await,
        AdjustmentType::DisallowedChildNode
    )
    .is_empty());
}

/// The tethered-reorder scenario: declared order [main, sidebar], projected
/// order [sidebar, main], one finding, and the repair restores the declared
/// order.
#[test(tokio::test)]
async fn wrongly_ordered_tethered_children_are_reordered() {
    let fixture = ProjectionFixture::new().await;
    let page = NodeAggregateId::new();
    fixture
        .create_everywhere(page, "Page", fixture.root, props(&[]))
        .await;
    let (sidebar, main) = (NodeAggregateId::new(), NodeAggregateId::new());
    // Created sidebar-first: the projection shows [sidebar, main].
    fixture
        .create_tethered_everywhere(sidebar, "ContentCollection", "sidebar", page)
        .await;
    fixture
        .create_tethered_everywhere(main, "ContentCollection", "main", page)
        .await;

    let findings = findings_for(&fixture, "Page").await;
    let wrongly_ordered = of_type(&findings, AdjustmentType::TetheredNodeWronglyOrdered);
    assert_eq!(wrongly_ordered.len(), 1);
    assert_eq!(wrongly_ordered[0].aggregate_id, page);

    fixture.adjustments().apply(&wrongly_ordered[0]).await.unwrap();
    let children = fixture
        .subgraph("en")
        .find_children(page, None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(ids(&children), vec![main, sidebar]);

    assert!(of_type(
        &findings_for(&fixture, "Page").await,
        AdjustmentType::TetheredNodeWronglyOrdered
    )
    .is_empty());
}

#[test(tokio::test)]
async fn missing_tethered_children_are_synthesized() {
    let fixture = ProjectionFixture::new().await;
    let page = NodeAggregateId::new();
    fixture
        .create_everywhere(page, "Page", fixture.root, props(&[]))
        .await;
    let main = NodeAggregateId::new();
    fixture
        .create_tethered_everywhere(main, "ContentCollection", "main", page)
        .await;

    let findings = findings_for(&fixture, "Page").await;
    let missing = of_type(&findings, AdjustmentType::TetheredNodeMissing);
    assert_eq!(missing.len(), 1, "findings: {findings:?}");

    fixture.adjustments().apply(&missing[0]).await.unwrap();
    for language in ["en", "en_us", "fr"] {
        let sidebar = fixture
            .subgraph(language)
            .find_child_by_name(page, &name("sidebar"))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("sidebar exists at {language}"));
        assert_eq!(sidebar.classification, NodeClassification::Tethered);
        assert_eq!(sidebar.node_type, "ContentCollection".into());
    }
    assert!(findings_for(&fixture, "Page").await.is_empty());
}

#[test(tokio::test)]
async fn undeclared_tethered_children_are_extras() {
    let fixture = ProjectionFixture::new().await;
    let page = NodeAggregateId::new();
    fixture
        .create_everywhere(page, "Page", fixture.root, props(&[]))
        .await;
    for (id, child_name) in [
        (NodeAggregateId::new(), "main"),
        (NodeAggregateId::new(), "sidebar"),
    ] {
        fixture
            .create_tethered_everywhere(id, "ContentCollection", child_name, page)
            .await;
    }
    let extra = NodeAggregateId::new();
    fixture
        .create_tethered_everywhere(extra, "ContentCollection", "banner", page)
        .await;

    let findings = findings_for(&fixture, "Page").await;
    let extras = of_type(&findings, AdjustmentType::DisallowedTetheredNode);
    assert_eq!(extras.len(), 1);
    assert_eq!(extras[0].aggregate_id, extra);

    fixture.adjustments().apply(&extras[0]).await.unwrap();
    assert!(fixture
        .subgraph("en")
        .find_child_by_name(page, &name("banner"))
        .await
        .unwrap()
        .is_none());
}

#[test(tokio::test)]
async fn a_regular_node_shadowing_a_tethered_name_is_not_auto_fixable() {
    let fixture = ProjectionFixture::new().await;
    let page = NodeAggregateId::new();
    fixture
        .create_everywhere(page, "Page", fixture.root, props(&[]))
        .await;
    let sidebar = NodeAggregateId::new();
    fixture
        .create_tethered_everywhere(sidebar, "ContentCollection", "sidebar", page)
        .await;
    // "main" exists but was created as a regular node.
    let impostor = NodeAggregateId::new();
    fixture
        .projector
        .apply(&GraphEvent::NodeAggregateCreated {
            content_stream: fixture.stream,
            aggregate_id: impostor,
            node_type: "ContentCollection".into(),
            origin: OriginDimensionSpacePoint::from(point("en")),
            coverage: points(&["en", "en_us"]),
            parent_aggregate_id: page,
            name: Some(name("main")),
            classification: NodeClassification::Regular,
            initial_properties: PropertyCollection::new(),
            succeeding_sibling: None,
        })
        .await
        .unwrap();

    let findings = findings_for(&fixture, "Page").await;
    let not_tethered = of_type(&findings, AdjustmentType::NodeIsNotTetheredButShouldBe);
    assert!(!not_tethered.is_empty());
    assert!(not_tethered.iter().all(|f| !f.is_auto_fixable()));
}

/// The missing-default scenario: `Article` declares `summary` with default
/// `""`; a node lacking it is flagged, repaired, and re-audits clean.
#[test(tokio::test)]
async fn missing_defaults_are_set_idempotently() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    fixture
        .create_node(
            article,
            "Article",
            "en",
            &["en", "en_us"],
            fixture.root,
            props(&[("title", json!("no summary yet"))]),
        )
        .await;

    let findings = findings_for(&fixture, "Article").await;
    let missing = of_type(&findings, AdjustmentType::MissingDefaultValue);
    assert_eq!(missing.len(), 1);

    fixture.adjustments().apply(&missing[0]).await.unwrap();
    let node = fixture
        .subgraph("en")
        .find_by_id(article)
        .await
        .unwrap()
        .expect("article visible");
    assert_eq!(
        node.properties.get::<String>("summary").unwrap(),
        Some(String::new())
    );
    assert!(of_type(
        &findings_for(&fixture, "Article").await,
        AdjustmentType::MissingDefaultValue
    )
    .is_empty());

    // Re-applying the stale finding aborts instead of re-writing.
    let stale = fixture.adjustments().apply(&missing[0]).await;
    assert!(matches!(stale, Err(StratumError::ConcurrencyConflict(_))));
}

#[test(tokio::test)]
async fn obsolete_and_mistyped_properties_are_unset() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    fixture
        .create_node(
            article,
            "Article",
            "en",
            &["en"],
            fixture.root,
            props(&[
                ("summary", json!(42)),
                ("title", json!("t")),
                ("legacy_flag", json!(true)),
            ]),
        )
        .await;

    let findings = findings_for(&fixture, "Article").await;
    let obsolete = of_type(&findings, AdjustmentType::ObsoleteProperty);
    assert_eq!(obsolete.len(), 1);
    let mistyped = of_type(&findings, AdjustmentType::NonDeserializableProperty);
    assert_eq!(mistyped.len(), 1);

    fixture.adjustments().apply(&obsolete[0]).await.unwrap();
    fixture.adjustments().apply(&mistyped[0]).await.unwrap();

    let node = fixture
        .subgraph("en")
        .find_by_id(article)
        .await
        .unwrap()
        .expect("article visible");
    assert!(!node.properties.contains_key("legacy_flag"));
    assert!(!node.properties.contains_key("summary"));

    let next = findings_for(&fixture, "Article").await;
    assert!(of_type(&next, AdjustmentType::ObsoleteProperty).is_empty());
    assert!(of_type(&next, AdjustmentType::NonDeserializableProperty).is_empty());
    // Unsetting the mistyped summary legitimately resurfaces the missing
    // default, a different category.
    assert_eq!(of_type(&next, AdjustmentType::MissingDefaultValue).len(), 1);
}

#[test(tokio::test)]
async fn coverage_invariant_violations_are_report_only() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    // An origin must never cover a peer: authored at en yet covering fr.
    fixture
        .create_node(
            article,
            "Article",
            "en",
            &["en", "fr"],
            fixture.root,
            props(&[("summary", json!("s")), ("title", json!("t"))]),
        )
        .await;

    let findings = findings_for(&fixture, "Article").await;
    let violations = of_type(&findings, AdjustmentType::NodeCoversGeneralizationOrPeer);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].points.contains(&point("fr")));
    assert!(!violations[0].is_auto_fixable());

    let rejected = fixture.adjustments().apply(&violations[0]).await;
    assert!(matches!(rejected, Err(StratumError::Command(_))));
}

#[test(tokio::test)]
async fn the_stream_is_lazy_and_stoppable() {
    let fixture = ProjectionFixture::new().await;
    for _ in 0..3 {
        fixture
            .create_everywhere(NodeAggregateId::new(), "LegacyWidget", fixture.root, props(&[]))
            .await;
    }
    let mut stream = fixture.adjustments().find_all_adjustments();
    let first = stream
        .next()
        .await
        .expect("at least one finding")
        .expect("detector succeeds");
    assert_eq!(first.adjustment_type, AdjustmentType::NodeTypeIsUnknown);
    // Dropping the stream here abandons the remaining enumeration.
    drop(stream);

    // A fresh stream restarts from scratch.
    let all = fixture
        .adjustments()
        .find_all_adjustments()
        .collect_remaining()
        .await;
    assert_eq!(all.len(), 3);
}
