//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::{sqlite::Sqlite, Pool};
use tempfile::TempDir;

use stratum_core::{
    adjustment::StructureAdjustmentService,
    config::{ContentDimension, DimensionConfiguration, DimensionValue},
    db::{db_init, Projector},
    dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint},
    event::GraphEvent,
    properties::{
        ContentStreamId, NodeAggregateId, NodeClassification, NodeName, PropertyCollection,
    },
    query::{ContentGraph, ContentSubgraph, VisibilityConstraints},
    schema::{NodeTypeRegistry, NodeTypeSchema, PropertyDeclaration, PropertyType},
    variation::InterDimensionalVariationGraph,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times — subsequent calls are no-ops.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// One language dimension: `en` specialized by `en_us`, `fr` as a peer.
pub fn language_dimensions() -> DimensionConfiguration {
    DimensionConfiguration::new(vec![ContentDimension {
        name: "language".to_string(),
        values: vec![
            DimensionValue::with_specializations("en", vec![DimensionValue::new("en_us")]),
            DimensionValue::new("fr"),
        ],
    }])
    .expect("static test configuration is valid")
}

pub fn point(language: &str) -> DimensionSpacePoint {
    DimensionSpacePoint::new([("language", language)])
}

pub fn points(languages: &[&str]) -> DimensionSpacePointSet {
    languages.iter().map(|l| point(l)).collect()
}

pub fn name(value: &str) -> NodeName {
    NodeName::try_from(value).expect("test names are non-empty")
}

/// The node type catalog the integration suites audit against.
pub fn content_registry() -> NodeTypeRegistry {
    let registry = NodeTypeRegistry::new();
    registry.register(NodeTypeSchema::new("Sites").allowing_child_types([
        "Document".into(),
        "Page".into(),
        "Section".into(),
        "Article".into(),
    ]));
    registry.register(
        NodeTypeSchema::new("Document")
            .allowing_child_types(["Document".into(), "Article".into()]),
    );
    registry.register(NodeTypeSchema::new("Section").allowing_child_types(["Article".into()]));
    registry.register(
        NodeTypeSchema::new("Article")
            .with_property(
                "summary",
                PropertyDeclaration::with_default(PropertyType::String, serde_json::json!("")),
            )
            .with_property("title", PropertyDeclaration::new(PropertyType::String)),
    );
    registry
        .register(NodeTypeSchema::new("ContentCollection").allowing_child_types(["Article".into()]));
    registry.register(
        NodeTypeSchema::new("Page")
            .with_tethered_child(name("main"), "ContentCollection".into())
            .with_tethered_child(name("sidebar"), "ContentCollection".into())
            .allowing_grandchild_types(name("main"), ["Article".into()]),
    );
    registry
}

/// A projected content stream over a temp-file SQLite store, seeded with one
/// root aggregate of type `Sites`.
pub struct ProjectionFixture {
    pub pool: Pool<Sqlite>,
    pub projector: Projector,
    pub registry: NodeTypeRegistry,
    pub variation: Arc<InterDimensionalVariationGraph>,
    pub graph: ContentGraph,
    pub stream: ContentStreamId,
    pub root: NodeAggregateId,
    _tempdir: TempDir,
}

impl ProjectionFixture {
    pub async fn new() -> Self {
        init_logging();
        let tempdir = TempDir::new().expect("tempdir");
        let pool = db_init(tempdir.path().join("projection.db"))
            .await
            .expect("projection db initializes");
        let registry = content_registry();
        let variation = Arc::new(
            InterDimensionalVariationGraph::from_configuration(&language_dimensions())
                .expect("test dimensions are valid"),
        );
        let projector = Projector::new(pool.clone());
        let stream = ContentStreamId::new();
        let root = NodeAggregateId::new();
        projector
            .apply(&GraphEvent::RootNodeAggregateCreated {
                content_stream: stream,
                aggregate_id: root,
                node_type: "Sites".into(),
                coverage: variation.dimension_space().clone(),
            })
            .await
            .expect("root projection applies");
        let graph = ContentGraph::new(pool.clone(), registry.clone());
        ProjectionFixture {
            pool,
            projector,
            registry,
            variation,
            graph,
            stream,
            root,
            _tempdir: tempdir,
        }
    }

    pub fn subgraph(&self, language: &str) -> ContentSubgraph {
        self.graph
            .subgraph(self.stream, point(language), VisibilityConstraints::Default)
    }

    pub fn subgraph_unrestricted(&self, language: &str) -> ContentSubgraph {
        self.graph.subgraph(
            self.stream,
            point(language),
            VisibilityConstraints::WithoutRestrictions,
        )
    }

    pub fn adjustments(&self) -> StructureAdjustmentService {
        StructureAdjustmentService::new(
            self.projector.clone(),
            self.registry.clone(),
            self.variation.clone(),
            self.stream,
        )
    }

    /// Create a regular node authored at `origin_language`, visible at
    /// `coverage_languages`, appended under `parent`.
    pub async fn create_node(
        &self,
        aggregate_id: NodeAggregateId,
        node_type: &str,
        origin_language: &str,
        coverage_languages: &[&str],
        parent: NodeAggregateId,
        properties: PropertyCollection,
    ) {
        self.projector
            .apply(&GraphEvent::NodeAggregateCreated {
                content_stream: self.stream,
                aggregate_id,
                node_type: node_type.into(),
                origin: OriginDimensionSpacePoint::from(point(origin_language)),
                coverage: points(coverage_languages),
                parent_aggregate_id: parent,
                name: None,
                classification: NodeClassification::Regular,
                initial_properties: properties,
                succeeding_sibling: None,
            })
            .await
            .expect("node creation applies");
    }

    /// Create a named, tethered node, like the write side does for
    /// auto-created children.
    pub async fn create_tethered(
        &self,
        aggregate_id: NodeAggregateId,
        node_type: &str,
        child_name: &str,
        origin_language: &str,
        coverage_languages: &[&str],
        parent: NodeAggregateId,
    ) {
        self.projector
            .apply(&GraphEvent::NodeAggregateCreated {
                content_stream: self.stream,
                aggregate_id,
                node_type: node_type.into(),
                origin: OriginDimensionSpacePoint::from(point(origin_language)),
                coverage: points(coverage_languages),
                parent_aggregate_id: parent,
                name: Some(name(child_name)),
                classification: NodeClassification::Tethered,
                initial_properties: PropertyCollection::new(),
                succeeding_sibling: None,
            })
            .await
            .expect("tethered node creation applies");
    }

    /// Create a node occupying the whole dimension space without violating
    /// the coverage invariant: authored at `en` (covering `en`/`en_us`),
    /// with a peer variant at `fr`.
    pub async fn create_everywhere(
        &self,
        aggregate_id: NodeAggregateId,
        node_type: &str,
        parent: NodeAggregateId,
        properties: PropertyCollection,
    ) {
        self.create_node(
            aggregate_id,
            node_type,
            "en",
            &["en", "en_us"],
            parent,
            properties,
        )
        .await;
        self.projector
            .apply(&GraphEvent::NodeVariantCreated {
                content_stream: self.stream,
                aggregate_id,
                source_origin: OriginDimensionSpacePoint::from(point("en")),
                target_origin: OriginDimensionSpacePoint::from(point("fr")),
                coverage: points(&["fr"]),
            })
            .await
            .expect("peer variant applies");
    }

    /// Same, for a named tethered child.
    pub async fn create_tethered_everywhere(
        &self,
        aggregate_id: NodeAggregateId,
        node_type: &str,
        child_name: &str,
        parent: NodeAggregateId,
    ) {
        self.create_tethered(
            aggregate_id,
            node_type,
            child_name,
            "en",
            &["en", "en_us"],
            parent,
        )
        .await;
        self.projector
            .apply(&GraphEvent::NodeVariantCreated {
                content_stream: self.stream,
                aggregate_id,
                source_origin: OriginDimensionSpacePoint::from(point("en")),
                target_origin: OriginDimensionSpacePoint::from(point("fr")),
                coverage: points(&["fr"]),
            })
            .await
            .expect("peer variant applies");
    }

    pub async fn set_properties(
        &self,
        aggregate_id: NodeAggregateId,
        origin_language: &str,
        set: PropertyCollection,
        unset: Vec<String>,
    ) {
        self.projector
            .apply(&GraphEvent::NodePropertiesSet {
                content_stream: self.stream,
                aggregate_id,
                origin: OriginDimensionSpacePoint::from(point(origin_language)),
                set,
                unset,
            })
            .await
            .expect("property update applies");
    }
}

pub fn props(pairs: &[(&str, serde_json::Value)]) -> PropertyCollection {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// Aggregate ids of an ordered node list, for terse order assertions.
pub fn ids(nodes: &[stratum_core::node::Node]) -> Vec<NodeAggregateId> {
    nodes.iter().map(|n| n.aggregate_id).collect()
}
