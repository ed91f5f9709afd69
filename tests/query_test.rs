//! Query layer integration tests: ordering, pagination, siblings,
//! visibility, and the bounded subtree descent.

mod common;

use common::{ids, name, props, ProjectionFixture};
use test_log::test;

use stratum_core::{
    event::GraphEvent,
    properties::NodeAggregateId,
    query::{NodeTypeFilter, Pagination, SiblingMode, Subtree},
};

async fn four_documents(fixture: &ProjectionFixture) -> Vec<NodeAggregateId> {
    let mut created = Vec::new();
    for _ in 0..4 {
        let id = NodeAggregateId::new();
        fixture
            .create_node(id, "Document", "en", &["en", "en_us"], fixture.root, props(&[]))
            .await;
        created.push(id);
    }
    created
}

#[test(tokio::test)]
async fn pagination_windows_are_stable_and_gapless() {
    let fixture = ProjectionFixture::new().await;
    let created = four_documents(&fixture).await;
    let subgraph = fixture.subgraph("en");

    let unpaginated = subgraph
        .find_children(fixture.root, None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(ids(&unpaginated), created);

    let first = subgraph
        .find_children(fixture.root, None, Pagination::window(2, 0))
        .await
        .unwrap();
    let second = subgraph
        .find_children(fixture.root, None, Pagination::window(2, 2))
        .await
        .unwrap();
    let stitched: Vec<NodeAggregateId> = ids(&first).into_iter().chain(ids(&second)).collect();
    assert_eq!(stitched, created, "windows must neither duplicate nor skip");
}

#[test(tokio::test)]
async fn sibling_slices_are_symmetric() {
    let fixture = ProjectionFixture::new().await;
    let created = four_documents(&fixture).await;
    let (a, b, c, d) = (created[0], created[1], created[2], created[3]);
    let subgraph = fixture.subgraph("en");

    let preceding = subgraph
        .find_siblings(c, SiblingMode::Preceding, None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(ids(&preceding), vec![b, a], "preceding is nearest-first");

    let succeeding = subgraph
        .find_siblings(b, SiblingMode::Succeeding, None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(ids(&succeeding), vec![c, d]);

    let all = subgraph
        .find_siblings(b, SiblingMode::All, None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(ids(&all), vec![a, c, d], "hierarchy order without the node itself");
}

#[test(tokio::test)]
async fn disabling_is_scoped_to_the_exact_dimension_point() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    fixture
        .create_everywhere(article, "Article", fixture.root, props(&[]))
        .await;
    fixture
        .projector
        .apply(&GraphEvent::NodeAggregateDisabled {
            content_stream: fixture.stream,
            aggregate_id: article,
            affected_points: common::points(&["en"]),
        })
        .await
        .unwrap();

    // Excluded from every default-visibility read at en.
    let en = fixture.subgraph("en");
    assert!(en.find_by_id(article).await.unwrap().is_none());
    assert!(ids(
        &en.find_children(fixture.root, None, Pagination::default())
            .await
            .unwrap()
    )
    .is_empty());

    // Included under relaxed visibility, and untouched at unrelated points.
    assert!(fixture
        .subgraph_unrestricted("en")
        .find_by_id(article)
        .await
        .unwrap()
        .is_some());
    assert!(fixture.subgraph("fr").find_by_id(article).await.unwrap().is_some());

    // Re-enabling restores default visibility.
    fixture
        .projector
        .apply(&GraphEvent::NodeAggregateEnabled {
            content_stream: fixture.stream,
            aggregate_id: article,
            affected_points: common::points(&["en"]),
        })
        .await
        .unwrap();
    assert!(en.find_by_id(article).await.unwrap().is_some());
}

fn levels_of(forest: &[Subtree]) -> Vec<(usize, NodeAggregateId)> {
    fn walk(tree: &Subtree, out: &mut Vec<(usize, NodeAggregateId)>) {
        out.push((tree.level, tree.node.aggregate_id));
        for child in tree.children.iter() {
            walk(child, out);
        }
    }
    let mut out = Vec::new();
    for tree in forest {
        walk(tree, &mut out);
    }
    out
}

#[test(tokio::test)]
async fn subtree_levels_match_hierarchy_distance() {
    let fixture = ProjectionFixture::new().await;
    let (x, y, z) = (
        NodeAggregateId::new(),
        NodeAggregateId::new(),
        NodeAggregateId::new(),
    );
    fixture
        .create_node(x, "Document", "en", &["en"], fixture.root, props(&[]))
        .await;
    fixture
        .create_node(y, "Document", "en", &["en"], x, props(&[]))
        .await;
    fixture
        .create_node(z, "Article", "en", &["en"], y, props(&[]))
        .await;

    let subgraph = fixture.subgraph("en");
    let forest = subgraph.find_subtree(&[x], 2, None).await.unwrap();
    let visited = levels_of(&forest);
    assert_eq!(visited, vec![(0, x), (1, y), (2, z)]);

    // The level bound caps the descent.
    let bounded = subgraph.find_subtree(&[x], 1, None).await.unwrap();
    let visited = levels_of(&bounded);
    assert_eq!(visited, vec![(0, x), (1, y)]);
    assert!(visited.iter().all(|(level, _)| *level <= 1));
}

#[test(tokio::test)]
async fn hiding_a_subtree_root_hides_the_whole_subtree() {
    let fixture = ProjectionFixture::new().await;
    let (x, y, z) = (
        NodeAggregateId::new(),
        NodeAggregateId::new(),
        NodeAggregateId::new(),
    );
    fixture
        .create_node(x, "Document", "en", &["en"], fixture.root, props(&[]))
        .await;
    fixture
        .create_node(y, "Document", "en", &["en"], x, props(&[]))
        .await;
    fixture
        .create_node(z, "Article", "en", &["en"], y, props(&[]))
        .await;
    fixture
        .projector
        .apply(&GraphEvent::NodeAggregateDisabled {
            content_stream: fixture.stream,
            aggregate_id: y,
            affected_points: common::points(&["en"]),
        })
        .await
        .unwrap();

    let forest = fixture
        .subgraph("en")
        .find_subtree(&[x], 10, None)
        .await
        .unwrap();
    let visited = levels_of(&forest);
    // y is pruned at expansion, so z is never reached even though z itself
    // carries no restriction.
    assert_eq!(visited, vec![(0, x)]);
}

#[test(tokio::test)]
async fn subtree_type_filter_stops_before_a_disallowed_node() {
    let fixture = ProjectionFixture::new().await;
    let (x, y, z) = (
        NodeAggregateId::new(),
        NodeAggregateId::new(),
        NodeAggregateId::new(),
    );
    fixture
        .create_node(x, "Document", "en", &["en"], fixture.root, props(&[]))
        .await;
    fixture
        .create_node(y, "Article", "en", &["en"], x, props(&[]))
        .await;
    fixture
        .create_node(z, "Document", "en", &["en"], x, props(&[]))
        .await;

    let filter = NodeTypeFilter::parse("Document").unwrap();
    let forest = fixture
        .subgraph("en")
        .find_subtree(&[x], 10, Some(&filter))
        .await
        .unwrap();
    let visited = levels_of(&forest);
    // The Article is not visited at all; the Document sibling is.
    assert_eq!(visited, vec![(0, x), (1, z)]);
}

#[test(tokio::test)]
async fn subtree_entry_order_and_multi_entry_forest() {
    let fixture = ProjectionFixture::new().await;
    let created = four_documents(&fixture).await;
    let subgraph = fixture.subgraph("en");
    let forest = subgraph
        .find_subtree(&[created[2], created[0]], 0, None)
        .await
        .unwrap();
    assert_eq!(
        forest.iter().map(|t| t.node.aggregate_id).collect::<Vec<_>>(),
        vec![created[2], created[0]]
    );
    assert!(forest.iter().all(|t| t.children.is_empty()));
}

#[test(tokio::test)]
async fn name_addressed_and_tethered_child_lookups() {
    let fixture = ProjectionFixture::new().await;
    let page = NodeAggregateId::new();
    fixture
        .create_node(page, "Page", "en", &["en"], fixture.root, props(&[]))
        .await;
    let (main, sidebar) = (NodeAggregateId::new(), NodeAggregateId::new());
    fixture
        .create_tethered(main, "ContentCollection", "main", "en", &["en"], page)
        .await;
    fixture
        .create_tethered(sidebar, "ContentCollection", "sidebar", "en", &["en"], page)
        .await;

    let subgraph = fixture.subgraph("en");
    let found = subgraph
        .find_child_by_name(page, &name("sidebar"))
        .await
        .unwrap()
        .expect("sidebar resolves by name");
    assert_eq!(found.aggregate_id, sidebar);
    assert!(found.is_tethered());

    let tethered = subgraph.find_tethered_children(page).await.unwrap();
    assert_eq!(ids(&tethered), vec![main, sidebar]);

    assert!(subgraph
        .find_child_by_name(page, &name("footer"))
        .await
        .unwrap()
        .is_none());
}

#[test(tokio::test)]
async fn counts_are_scoped_to_subgraph_or_graph() {
    let fixture = ProjectionFixture::new().await;
    let article = NodeAggregateId::new();
    fixture
        .create_everywhere(article, "Article", fixture.root, props(&[]))
        .await;

    // Subgraph count: root + article at en; whole-graph count also sees the
    // fr variant row.
    assert_eq!(fixture.subgraph("en").count_nodes().await.unwrap(), 2);
    assert_eq!(fixture.graph.count_nodes().await.unwrap(), 3);

    assert_eq!(
        fixture
            .subgraph("en")
            .count_children(fixture.root, None)
            .await
            .unwrap(),
        1
    );
}

#[test(tokio::test)]
async fn root_aggregate_lookup_asserts_existence_and_uniqueness() {
    let fixture = ProjectionFixture::new().await;
    let found = fixture
        .graph
        .find_root_node_aggregate_by_type(fixture.stream, &"Sites".into())
        .await
        .unwrap();
    assert_eq!(found.aggregate_id, fixture.root);

    let missing = fixture
        .graph
        .find_root_node_aggregate_by_type(fixture.stream, &"Shop".into())
        .await;
    assert!(matches!(
        missing,
        Err(stratum_core::StratumError::NotFound(_))
    ));

    // A second root of the same type turns the lookup into an invariant
    // violation, uniformly.
    fixture
        .projector
        .apply(&GraphEvent::RootNodeAggregateCreated {
            content_stream: fixture.stream,
            aggregate_id: NodeAggregateId::new(),
            node_type: "Sites".into(),
            coverage: fixture.variation.dimension_space().clone(),
        })
        .await
        .unwrap();
    let ambiguous = fixture
        .graph
        .find_root_node_aggregate_by_type(fixture.stream, &"Sites".into())
        .await;
    assert!(matches!(
        ambiguous,
        Err(stratum_core::StratumError::InvariantViolation(_))
    ));
}

#[test(tokio::test)]
async fn parent_of_root_is_none() {
    let fixture = ProjectionFixture::new().await;
    assert!(fixture
        .subgraph("en")
        .find_parent(fixture.root)
        .await
        .unwrap()
        .is_none());
}
