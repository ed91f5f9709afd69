//! Graph and subgraph query layer.
//!
//! [`ContentSubgraph`] answers reads against one `(content stream, dimension
//! space point, visibility)` context; [`ContentGraph`] answers
//! aggregate-level reads across all dimension points of a stream. Both are
//! stateless handles over the connection pool and safe for unbounded
//! concurrent readers; every operation is a single read, except the subtree
//! descent which runs inside one SQL transaction so the recursion observes a
//! consistent snapshot.
//!
//! Legitimately absent data (unknown stream, never-projected point, missing
//! aggregate) yields empty results, not errors. Only the aggregate-level
//! root lookup asserts existence, per its contract.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{
    sqlite::{Sqlite, SqliteConnection},
    Pool, QueryBuilder,
};

use crate::{
    dimension::{DimensionSpacePoint, DimensionSpacePointHash},
    error::StratumError,
    node::{Node, NodeAggregate, NodeRow, NodeRowWithContext},
    properties::{
        ContentStreamId, NodeAggregateId, NodeAnchor, NodeClassification, NodeName, NodeTypeName,
        PropertyCollection,
    },
    schema::NodeTypeRegistry,
};

pub const DEFAULT_SUBTREE_LEVELS: usize = 10;

/// Whether soft-disabled nodes are excluded (default) or included
/// (administrative mode).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VisibilityConstraints {
    #[default]
    Default,
    WithoutRestrictions,
}

impl VisibilityConstraints {
    pub fn excludes_disabled(&self) -> bool {
        matches!(self, VisibilityConstraints::Default)
    }
}

/// Which side of a sibling's position to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SiblingMode {
    All,
    Preceding,
    Succeeding,
}

impl TryFrom<&str> for SiblingMode {
    type Error = StratumError;

    fn try_from(src: &str) -> Result<SiblingMode, StratumError> {
        match &src.to_lowercase()[..] {
            "all" => Ok(SiblingMode::All),
            "preceding" => Ok(SiblingMode::Preceding),
            "succeeding" => Ok(SiblingMode::Succeeding),
            _ => Err(StratumError::Command(format!(
                "Invalid sibling mode '{src}'. Valid options: all, preceding, succeeding"
            ))),
        }
    }
}

/// Allow/deny filter over node type names, parsed from strings like
/// `"Document,!LegacyDocument"`.
///
/// A type name unknown to the registry matches no constraint: it fails any
/// allow-list (fail-closed) and is untouched by deny entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTypeFilter {
    allowed: BTreeSet<NodeTypeName>,
    disallowed: BTreeSet<NodeTypeName>,
}

impl NodeTypeFilter {
    pub fn parse(src: &str) -> Result<Self, StratumError> {
        let mut filter = NodeTypeFilter::default();
        for entry in src.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(StratumError::Command(format!(
                    "empty entry in node type filter '{src}'"
                )));
            }
            match entry.strip_prefix('!') {
                Some(denied) => filter.disallowed.insert(NodeTypeName::from(denied)),
                None => filter.allowed.insert(NodeTypeName::from(entry)),
            };
        }
        Ok(filter)
    }

    pub fn allowing<I: IntoIterator<Item = NodeTypeName>>(types: I) -> Self {
        NodeTypeFilter {
            allowed: types.into_iter().collect(),
            disallowed: BTreeSet::new(),
        }
    }

    pub fn matches(&self, node_type: &NodeTypeName, registry: &NodeTypeRegistry) -> bool {
        if !registry.has_type(node_type) {
            return self.allowed.is_empty();
        }
        if !self.allowed.is_empty() && !self.allowed.contains(node_type) {
            return false;
        }
        !self.disallowed.contains(node_type)
    }
}

/// Offset/limit window applied after ordering and filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Pagination {
    pub fn window(limit: usize, offset: usize) -> Self {
        Pagination {
            limit: Some(limit),
            offset,
        }
    }

    fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// One resolved reference edge: the opposite node plus the edge's name,
/// position, and optional property bag.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub name: NodeName,
    pub position: usize,
    pub properties: Option<PropertyCollection>,
    pub node: Node,
}

/// One visited node of a subtree query: its depth below the entry set and
/// its already-expanded children in hierarchy order.
#[derive(Debug, Clone)]
pub struct Subtree {
    pub level: usize,
    pub node: Node,
    pub children: Vec<Subtree>,
}

fn push_anchor_expr(qb: &mut QueryBuilder<Sqlite>, anchors: &[NodeAnchor], column: &str) {
    let last_sep = if !anchors.is_empty() {
        anchors.len() - 1
    } else {
        0
    };
    qb.push(column);
    qb.push(" IN(");
    for (idx, anchor) in anchors.iter().enumerate() {
        qb.push_bind::<String>(anchor.into());
        if idx < last_sep {
            qb.push(", ");
        }
    }
    qb.push(") ");
}

async fn nodes_by_anchors(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    anchors: &[NodeAnchor],
) -> Result<BTreeMap<NodeAnchor, NodeRow>, StratumError> {
    if anchors.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM nodes WHERE contentstreamid = ");
    qb.push_bind(String::from(&stream));
    qb.push(" AND ");
    push_anchor_expr(&mut qb, anchors, "anchor");
    let rows = qb
        .build_query_as::<NodeRow>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|row| (row.anchor, row)).collect())
}

async fn disabled_aggregates(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
) -> Result<BTreeSet<NodeAggregateId>, StratumError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT nodeaggregateid FROM restriction \
         WHERE contentstreamid = ? AND dimensionspacepointhash = ?",
    )
    .bind(String::from(&stream))
    .bind(point_hash.as_str())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|(id,)| NodeAggregateId::try_from(id.as_str()))
        .collect()
}

async fn covering_anchor(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
    aggregate: NodeAggregateId,
) -> Result<Option<NodeAnchor>, StratumError> {
    crate::db::covering_anchor(conn, stream, point_hash, aggregate).await
}

/// Read access to one variant context of one content stream.
#[derive(Debug, Clone)]
pub struct ContentSubgraph {
    pool: Pool<Sqlite>,
    registry: NodeTypeRegistry,
    pub content_stream_id: ContentStreamId,
    pub dimension_space_point: DimensionSpacePoint,
    point_hash: DimensionSpacePointHash,
    visibility: VisibilityConstraints,
}

impl ContentSubgraph {
    pub fn new(
        pool: Pool<Sqlite>,
        registry: NodeTypeRegistry,
        content_stream_id: ContentStreamId,
        dimension_space_point: DimensionSpacePoint,
        visibility: VisibilityConstraints,
    ) -> Self {
        let point_hash = dimension_space_point.hash();
        ContentSubgraph {
            pool,
            registry,
            content_stream_id,
            dimension_space_point,
            point_hash,
            visibility,
        }
    }

    pub fn visibility(&self) -> VisibilityConstraints {
        self.visibility
    }

    /// The same context with relaxed visibility.
    pub fn without_restrictions(&self) -> Self {
        let mut relaxed = self.clone();
        relaxed.visibility = VisibilityConstraints::WithoutRestrictions;
        relaxed
    }

    async fn hidden_set(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<BTreeSet<NodeAggregateId>, StratumError> {
        if self.visibility.excludes_disabled() {
            disabled_aggregates(conn, self.content_stream_id, &self.point_hash).await
        } else {
            Ok(BTreeSet::new())
        }
    }

    /// The node of `aggregate_id` visible in this context, if any.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(
        &self,
        aggregate_id: NodeAggregateId,
    ) -> Result<Option<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let Some(anchor) =
            covering_anchor(conn, self.content_stream_id, &self.point_hash, aggregate_id).await?
        else {
            return Ok(None);
        };
        let hidden = self.hidden_set(conn).await?;
        if hidden.contains(&aggregate_id) {
            return Ok(None);
        }
        match crate::db::node_row(conn, self.content_stream_id, anchor).await? {
            None => Ok(None),
            Some(row) => Ok(Some(Node::from_row(&row)?)),
        }
    }

    /// Ordered children of the parent aggregate: hyperedge ordinality is the
    /// sole ordering; type filter and pagination apply after ordering.
    #[tracing::instrument(skip(self, type_filter))]
    pub async fn find_children(
        &self,
        parent_aggregate_id: NodeAggregateId,
        type_filter: Option<&NodeTypeFilter>,
        pagination: Pagination,
    ) -> Result<Vec<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let nodes = self
            .child_nodes(conn, parent_aggregate_id, type_filter)
            .await?;
        Ok(pagination.slice(nodes))
    }

    pub async fn count_children(
        &self,
        parent_aggregate_id: NodeAggregateId,
        type_filter: Option<&NodeTypeFilter>,
    ) -> Result<usize, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        Ok(self
            .child_nodes(conn, parent_aggregate_id, type_filter)
            .await?
            .len())
    }

    async fn child_nodes(
        &self,
        conn: &mut SqliteConnection,
        parent_aggregate_id: NodeAggregateId,
        type_filter: Option<&NodeTypeFilter>,
    ) -> Result<Vec<Node>, StratumError> {
        let Some(parent_anchor) = covering_anchor(
            conn,
            self.content_stream_id,
            &self.point_hash,
            parent_aggregate_id,
        )
        .await?
        else {
            return Ok(Vec::new());
        };
        let child_anchors = crate::db::hyperedge_children(
            conn,
            self.content_stream_id,
            &self.point_hash,
            parent_anchor,
        )
        .await?;
        self.resolve_ordered(conn, &child_anchors, type_filter).await
    }

    /// Resolve anchors to visible nodes, preserving the input order.
    async fn resolve_ordered(
        &self,
        conn: &mut SqliteConnection,
        anchors: &[NodeAnchor],
        type_filter: Option<&NodeTypeFilter>,
    ) -> Result<Vec<Node>, StratumError> {
        let rows = nodes_by_anchors(conn, self.content_stream_id, anchors).await?;
        let hidden = self.hidden_set(conn).await?;
        let mut nodes = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            let Some(row) = rows.get(anchor) else {
                tracing::warn!(
                    "[ContentSubgraph] hyperedge references anchor {} without a node row",
                    anchor
                );
                continue;
            };
            if hidden.contains(&row.node_aggregate_id) {
                continue;
            }
            let node = Node::from_row(row)?;
            if let Some(filter) = type_filter {
                if !filter.matches(&node.node_type, &self.registry) {
                    continue;
                }
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// The unique parent of the child aggregate in this context. Root nodes
    /// have no parent.
    #[tracing::instrument(skip(self))]
    pub async fn find_parent(
        &self,
        child_aggregate_id: NodeAggregateId,
    ) -> Result<Option<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let Some(child_anchor) = covering_anchor(
            conn,
            self.content_stream_id,
            &self.point_hash,
            child_aggregate_id,
        )
        .await?
        else {
            return Ok(None);
        };
        let Some((parent_anchor, _)) = crate::db::parent_hyperedge_of(
            conn,
            self.content_stream_id,
            &self.point_hash,
            child_anchor,
        )
        .await?
        else {
            return Ok(None);
        };
        if parent_anchor.is_root_sentinel() {
            return Ok(None);
        }
        let Some(row) = crate::db::node_row(conn, self.content_stream_id, parent_anchor).await?
        else {
            return Ok(None);
        };
        let hidden = self.hidden_set(conn).await?;
        if hidden.contains(&row.node_aggregate_id) {
            return Ok(None);
        }
        Ok(Some(Node::from_row(&row)?))
    }

    /// Name-addressed child lookup (tethered and other named children).
    #[tracing::instrument(skip(self))]
    pub async fn find_child_by_name(
        &self,
        parent_aggregate_id: NodeAggregateId,
        name: &NodeName,
    ) -> Result<Option<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let children = self.child_nodes(conn, parent_aggregate_id, None).await?;
        Ok(children.into_iter().find(|n| n.name.as_ref() == Some(name)))
    }

    pub async fn find_tethered_children(
        &self,
        parent_aggregate_id: NodeAggregateId,
    ) -> Result<Vec<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let children = self.child_nodes(conn, parent_aggregate_id, None).await?;
        Ok(children
            .into_iter()
            .filter(|n| n.classification == NodeClassification::Tethered)
            .collect())
    }

    /// Siblings of `sibling_aggregate_id`, sliced relative to its own
    /// ordinal position. `Preceding` returns nearest-first (reverse) order,
    /// `Succeeding` forward order, `All` hierarchy order without the node
    /// itself.
    #[tracing::instrument(skip(self, type_filter))]
    pub async fn find_siblings(
        &self,
        sibling_aggregate_id: NodeAggregateId,
        mode: SiblingMode,
        type_filter: Option<&NodeTypeFilter>,
        pagination: Pagination,
    ) -> Result<Vec<Node>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let Some(own_anchor) = covering_anchor(
            conn,
            self.content_stream_id,
            &self.point_hash,
            sibling_aggregate_id,
        )
        .await?
        else {
            return Ok(Vec::new());
        };
        let Some((_, siblings)) = crate::db::parent_hyperedge_of(
            conn,
            self.content_stream_id,
            &self.point_hash,
            own_anchor,
        )
        .await?
        else {
            return Ok(Vec::new());
        };
        let Some(own_position) = siblings.iter().position(|a| *a == own_anchor) else {
            return Ok(Vec::new());
        };
        let ordered: Vec<NodeAnchor> = match mode {
            SiblingMode::All => siblings
                .iter()
                .filter(|a| **a != own_anchor)
                .copied()
                .collect(),
            SiblingMode::Preceding => siblings[..own_position].iter().rev().copied().collect(),
            SiblingMode::Succeeding => siblings[own_position + 1..].to_vec(),
        };
        let nodes = self.resolve_ordered(conn, &ordered, type_filter).await?;
        Ok(pagination.slice(nodes))
    }

    /// Outgoing references of the source node, ordered by reference name
    /// then position, paired with the visible target node.
    #[tracing::instrument(skip(self))]
    pub async fn find_references(
        &self,
        source_aggregate_id: NodeAggregateId,
        name: Option<&NodeName>,
    ) -> Result<Vec<ReferenceRecord>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let Some(source_anchor) = covering_anchor(
            conn,
            self.content_stream_id,
            &self.point_hash,
            source_aggregate_id,
        )
        .await?
        else {
            return Ok(Vec::new());
        };
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT name, position, targetaggregateid, properties FROM refs \
             WHERE contentstreamid = ",
        );
        qb.push_bind(String::from(&self.content_stream_id));
        qb.push(" AND dimensionspacepointhash = ");
        qb.push_bind(self.point_hash.as_str().to_string());
        qb.push(" AND sourceanchor = ");
        qb.push_bind(String::from(&source_anchor));
        if let Some(name) = name {
            qb.push(" AND name = ");
            qb.push_bind(name.as_str().to_string());
        }
        qb.push(" ORDER BY name, position");
        let rows = qb
            .build_query_as::<(String, i64, String, Option<String>)>()
            .fetch_all(&mut *conn)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (name, position, target, properties) in rows {
            let target_aggregate = NodeAggregateId::try_from(target.as_str())?;
            let Some(node) = self
                .visible_node_in(conn, target_aggregate)
                .await?
            else {
                continue;
            };
            records.push(ReferenceRecord {
                name: NodeName::try_from(name.as_str())?,
                position: position as usize,
                properties: properties
                    .as_deref()
                    .map(PropertyCollection::from_json)
                    .transpose()?,
                node,
            });
        }
        Ok(records)
    }

    /// Incoming references onto the target node, ordered by reference name
    /// then position, paired with the visible source node.
    #[tracing::instrument(skip(self))]
    pub async fn find_referencing_nodes(
        &self,
        target_aggregate_id: NodeAggregateId,
        name: Option<&NodeName>,
    ) -> Result<Vec<ReferenceRecord>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT name, position, sourceanchor, properties FROM refs \
             WHERE contentstreamid = ",
        );
        qb.push_bind(String::from(&self.content_stream_id));
        qb.push(" AND dimensionspacepointhash = ");
        qb.push_bind(self.point_hash.as_str().to_string());
        qb.push(" AND targetaggregateid = ");
        qb.push_bind(String::from(&target_aggregate_id));
        if let Some(name) = name {
            qb.push(" AND name = ");
            qb.push_bind(name.as_str().to_string());
        }
        qb.push(" ORDER BY name, position");
        let rows = qb
            .build_query_as::<(String, i64, String, Option<String>)>()
            .fetch_all(&mut *conn)
            .await?;

        let hidden = self.hidden_set(conn).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (name, position, source, properties) in rows {
            let source_anchor = NodeAnchor::try_from(source.as_str())?;
            let Some(row) =
                crate::db::node_row(conn, self.content_stream_id, source_anchor).await?
            else {
                continue;
            };
            if hidden.contains(&row.node_aggregate_id) {
                continue;
            }
            records.push(ReferenceRecord {
                name: NodeName::try_from(name.as_str())?,
                position: position as usize,
                properties: properties
                    .as_deref()
                    .map(PropertyCollection::from_json)
                    .transpose()?,
                node: Node::from_row(&row)?,
            });
        }
        Ok(records)
    }

    async fn visible_node_in(
        &self,
        conn: &mut SqliteConnection,
        aggregate_id: NodeAggregateId,
    ) -> Result<Option<Node>, StratumError> {
        let Some(anchor) =
            covering_anchor(conn, self.content_stream_id, &self.point_hash, aggregate_id).await?
        else {
            return Ok(None);
        };
        let hidden = self.hidden_set(conn).await?;
        if hidden.contains(&aggregate_id) {
            return Ok(None);
        }
        match crate::db::node_row(conn, self.content_stream_id, anchor).await? {
            None => Ok(None),
            Some(row) => Ok(Some(Node::from_row(&row)?)),
        }
    }

    /// Bounded-depth recursive descent from the entry aggregates.
    ///
    /// Runs inside one SQL transaction so the level-by-level expansion
    /// observes a consistent snapshot of the hierarchy — the underlying
    /// store's snapshot isolation is a hard dependency here.
    ///
    /// Hidden nodes are pruned at the point of expansion, so hiding a
    /// subtree root hides its whole subtree. A type filter likewise stops
    /// expansion BEFORE a disallowed node: the disallowed node itself is not
    /// visited and nothing below it is expanded.
    #[tracing::instrument(skip(self, type_filter))]
    pub async fn find_subtree(
        &self,
        entry_aggregate_ids: &[NodeAggregateId],
        max_levels: usize,
        type_filter: Option<&NodeTypeFilter>,
    ) -> Result<Vec<Subtree>, StratumError> {
        let mut tx = self.pool.begin().await?;
        let conn: &mut SqliteConnection = &mut tx;

        let hidden = self.hidden_set(conn).await?;
        let keep = |node: &Node| -> bool {
            if hidden.contains(&node.aggregate_id) {
                return false;
            }
            match type_filter {
                Some(filter) => filter.matches(&node.node_type, &self.registry),
                None => true,
            }
        };

        // Seed level 0 with the visible entry nodes, in entry order.
        let mut levels: Vec<Vec<(NodeAnchor, Node)>> = Vec::new();
        let mut seeds = Vec::new();
        for aggregate_id in entry_aggregate_ids {
            let Some(anchor) = covering_anchor(
                conn,
                self.content_stream_id,
                &self.point_hash,
                *aggregate_id,
            )
            .await?
            else {
                continue;
            };
            let Some(row) = crate::db::node_row(conn, self.content_stream_id, anchor).await?
            else {
                continue;
            };
            let node = Node::from_row(&row)?;
            if keep(&node) {
                seeds.push((anchor, node));
            }
        }
        if seeds.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }
        levels.push(seeds);

        // One hierarchy step per iteration, up to max_levels hyperedges deep.
        let mut child_map: BTreeMap<NodeAnchor, Vec<(NodeAnchor, Node)>> = BTreeMap::new();
        for level in 0..max_levels {
            let Some(frontier) = levels.get(level) else {
                break;
            };
            let frontier: Vec<NodeAnchor> = frontier.iter().map(|(anchor, _)| *anchor).collect();
            let mut next_level = Vec::new();
            for parent_anchor in frontier {
                let child_anchors = crate::db::hyperedge_children(
                    conn,
                    self.content_stream_id,
                    &self.point_hash,
                    parent_anchor,
                )
                .await?;
                if child_anchors.is_empty() {
                    continue;
                }
                let rows = nodes_by_anchors(conn, self.content_stream_id, &child_anchors).await?;
                let mut kept = Vec::new();
                for anchor in child_anchors {
                    let Some(row) = rows.get(&anchor) else {
                        continue;
                    };
                    let node = Node::from_row(row)?;
                    if keep(&node) {
                        kept.push((anchor, node));
                    }
                }
                next_level.extend(kept.iter().cloned());
                child_map.insert(parent_anchor, kept);
            }
            if next_level.is_empty() {
                break;
            }
            levels.push(next_level);
        }
        tx.commit().await?;

        // Assemble bottom-up: deepest level first, each node adopting its
        // already-built children.
        let mut built: BTreeMap<NodeAnchor, Subtree> = BTreeMap::new();
        for (level, nodes) in levels.iter().enumerate().rev() {
            for (anchor, node) in nodes {
                let children = child_map
                    .get(anchor)
                    .map(|kept| {
                        kept.iter()
                            .filter_map(|(child_anchor, _)| built.get(child_anchor).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                built.insert(
                    *anchor,
                    Subtree {
                        level,
                        node: node.clone(),
                        children,
                    },
                );
            }
        }
        Ok(levels[0]
            .iter()
            .filter_map(|(anchor, _)| built.get(anchor).cloned())
            .collect())
    }

    /// Count of distinct visible nodes in this variant context.
    pub async fn count_nodes(&self) -> Result<usize, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let mut sql = String::from(
            "SELECT COUNT(*) FROM nodes n \
             WHERE n.contentstreamid = ? \
               AND EXISTS (SELECT 1 FROM hierarchy h \
                           WHERE h.contentstreamid = n.contentstreamid \
                             AND h.dimensionspacepointhash = ? \
                             AND instr(h.childanchors, n.anchor) > 0)",
        );
        if self.visibility.excludes_disabled() {
            sql.push_str(
                " AND NOT EXISTS (SELECT 1 FROM restriction r \
                  WHERE r.contentstreamid = n.contentstreamid \
                    AND r.dimensionspacepointhash = ? \
                    AND r.nodeaggregateid = n.nodeaggregateid)",
            );
        }
        let mut query = sqlx::query_as::<_, (i64,)>(&sql)
            .bind(String::from(&self.content_stream_id))
            .bind(self.point_hash.as_str());
        if self.visibility.excludes_disabled() {
            query = query.bind(self.point_hash.as_str());
        }
        let (count,) = query.fetch_one(&mut *conn).await?;
        Ok(count as usize)
    }
}

/// Aggregate-level read access across every dimension point of the
/// hypergraph.
#[derive(Debug, Clone)]
pub struct ContentGraph {
    pool: Pool<Sqlite>,
    registry: NodeTypeRegistry,
}

impl ContentGraph {
    pub fn new(pool: Pool<Sqlite>, registry: NodeTypeRegistry) -> Self {
        ContentGraph { pool, registry }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    /// A subgraph handle for one variant context.
    pub fn subgraph(
        &self,
        content_stream_id: ContentStreamId,
        dimension_space_point: DimensionSpacePoint,
        visibility: VisibilityConstraints,
    ) -> ContentSubgraph {
        ContentSubgraph::new(
            self.pool.clone(),
            self.registry.clone(),
            content_stream_id,
            dimension_space_point,
            visibility,
        )
    }

    /// Every (node, covered point) row of one aggregate, feeding
    /// [`NodeAggregate::from_rows`].
    async fn aggregate_rows(
        &self,
        conn: &mut SqliteConnection,
        stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
    ) -> Result<Vec<NodeRowWithContext>, StratumError> {
        Ok(sqlx::query_as::<_, NodeRowWithContext>(
            "SELECT n.*, h.dimensionspacepoint, h.dimensionspacepointhash, \
                    (r.nodeaggregateid IS NOT NULL) AS disabled \
             FROM nodes n \
             JOIN hierarchy h ON h.contentstreamid = n.contentstreamid \
                             AND instr(h.childanchors, n.anchor) > 0 \
             LEFT JOIN restriction r ON r.contentstreamid = n.contentstreamid \
                             AND r.dimensionspacepointhash = h.dimensionspacepointhash \
                             AND r.nodeaggregateid = n.nodeaggregateid \
             WHERE n.contentstreamid = ? AND n.nodeaggregateid = ? \
             ORDER BY n.rowid",
        )
        .bind(String::from(&stream))
        .bind(String::from(&aggregate_id))
        .fetch_all(&mut *conn)
        .await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_node_aggregate_by_id(
        &self,
        stream: ContentStreamId,
        aggregate_id: NodeAggregateId,
    ) -> Result<Option<NodeAggregate>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let rows = self
            .aggregate_rows(conn.as_mut(), stream, aggregate_id)
            .await?;
        NodeAggregate::from_rows(rows)
    }

    /// All aggregates of one node type, in first-projected order.
    #[tracing::instrument(skip(self))]
    pub async fn find_node_aggregates_by_type(
        &self,
        stream: ContentStreamId,
        node_type: &NodeTypeName,
    ) -> Result<Vec<NodeAggregate>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, NodeRowWithContext>(
            "SELECT n.*, h.dimensionspacepoint, h.dimensionspacepointhash, \
                    (r.nodeaggregateid IS NOT NULL) AS disabled \
             FROM nodes n \
             JOIN hierarchy h ON h.contentstreamid = n.contentstreamid \
                             AND instr(h.childanchors, n.anchor) > 0 \
             LEFT JOIN restriction r ON r.contentstreamid = n.contentstreamid \
                             AND r.dimensionspacepointhash = h.dimensionspacepointhash \
                             AND r.nodeaggregateid = n.nodeaggregateid \
             WHERE n.contentstreamid = ? AND n.nodetypename = ? \
             ORDER BY n.rowid",
        )
        .bind(String::from(&stream))
        .bind(node_type.as_str())
        .fetch_all(conn.as_mut())
        .await?;
        NodeAggregate::aggregates_from_rows(rows)
    }

    /// The unique root aggregate of the given type. Errors both when absent
    /// and when ambiguous; this lookup asserts existence by contract.
    #[tracing::instrument(skip(self))]
    pub async fn find_root_node_aggregate_by_type(
        &self,
        stream: ContentStreamId,
        node_type: &NodeTypeName,
    ) -> Result<NodeAggregate, StratumError> {
        let aggregates = self.find_node_aggregates_by_type(stream, node_type).await?;
        let mut roots: Vec<NodeAggregate> =
            aggregates.into_iter().filter(|a| a.is_root()).collect();
        match roots.len() {
            0 => Err(StratumError::NotFound(format!(
                "no root node aggregate of type {node_type} in content stream {stream}"
            ))),
            1 => Ok(roots.remove(0)),
            ambiguous => Err(StratumError::InvariantViolation(format!(
                "{ambiguous} root node aggregates of type {node_type} in content stream {stream}; \
                 expected exactly one"
            ))),
        }
    }

    /// Parent aggregates of the child aggregate across all of its covered
    /// points.
    #[tracing::instrument(skip(self))]
    pub async fn find_parent_node_aggregates(
        &self,
        stream: ContentStreamId,
        child_aggregate_id: NodeAggregateId,
    ) -> Result<Vec<NodeAggregate>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT h.parentanchor, h.dimensionspacepointhash \
             FROM hierarchy h \
             JOIN nodes c ON c.contentstreamid = h.contentstreamid \
                         AND instr(h.childanchors, c.anchor) > 0 \
             WHERE h.contentstreamid = ? AND c.nodeaggregateid = ? \
             ORDER BY h.rowid",
        )
        .bind(String::from(&stream))
        .bind(String::from(&child_aggregate_id))
        .fetch_all(&mut *conn)
        .await?;

        let mut seen = BTreeSet::new();
        let mut parents = Vec::new();
        for (parent_anchor, _) in rows {
            let parent_anchor = NodeAnchor::try_from(parent_anchor.as_str())?;
            if parent_anchor.is_root_sentinel() {
                continue;
            }
            let Some(row) = crate::db::node_row(conn, stream, parent_anchor).await? else {
                continue;
            };
            if !seen.insert(row.node_aggregate_id) {
                continue;
            }
            let rows = self.aggregate_rows(conn, stream, row.node_aggregate_id).await?;
            if let Some(aggregate) = NodeAggregate::from_rows(rows)? {
                parents.push(aggregate);
            }
        }
        Ok(parents)
    }

    /// Child aggregates of the parent aggregate across all covered points,
    /// in first-projected order.
    #[tracing::instrument(skip(self))]
    pub async fn find_child_node_aggregates(
        &self,
        stream: ContentStreamId,
        parent_aggregate_id: NodeAggregateId,
    ) -> Result<Vec<NodeAggregate>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let conn = conn.as_mut();
        let parent_anchors = sqlx::query_as::<_, (String,)>(
            "SELECT anchor FROM nodes WHERE contentstreamid = ? AND nodeaggregateid = ? \
             ORDER BY rowid",
        )
        .bind(String::from(&stream))
        .bind(String::from(&parent_aggregate_id))
        .fetch_all(&mut *conn)
        .await?;

        let mut seen = BTreeSet::new();
        let mut children = Vec::new();
        for (parent_anchor,) in parent_anchors {
            let parent_anchor = NodeAnchor::try_from(parent_anchor.as_str())?;
            let edges = sqlx::query_as::<_, (String,)>(
                "SELECT childanchors FROM hierarchy \
                 WHERE contentstreamid = ? AND parentanchor = ? ORDER BY rowid",
            )
            .bind(String::from(&stream))
            .bind(String::from(&parent_anchor))
            .fetch_all(&mut *conn)
            .await?;
            for (raw,) in edges {
                for child_anchor in crate::db::decode_children(&raw)? {
                    let Some(row) = crate::db::node_row(conn, stream, child_anchor).await? else {
                        continue;
                    };
                    if !seen.insert(row.node_aggregate_id) {
                        continue;
                    }
                    let rows = self
                        .aggregate_rows(conn, stream, row.node_aggregate_id)
                        .await?;
                    if let Some(aggregate) = NodeAggregate::from_rows(rows)? {
                        children.push(aggregate);
                    }
                }
            }
        }
        Ok(children)
    }

    pub async fn find_tethered_child_node_aggregates(
        &self,
        stream: ContentStreamId,
        parent_aggregate_id: NodeAggregateId,
    ) -> Result<Vec<NodeAggregate>, StratumError> {
        Ok(self
            .find_child_node_aggregates(stream, parent_aggregate_id)
            .await?
            .into_iter()
            .filter(|a| a.is_tethered())
            .collect())
    }

    /// Every node type name that occurs in the stream's projection,
    /// including names the schema no longer defines.
    pub async fn used_node_type_names(
        &self,
        stream: ContentStreamId,
    ) -> Result<Vec<NodeTypeName>, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT DISTINCT nodetypename FROM nodes WHERE contentstreamid = ? \
             ORDER BY nodetypename",
        )
        .bind(String::from(&stream))
        .fetch_all(conn.as_mut())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name,)| NodeTypeName::new(name))
            .collect())
    }

    /// Total node rows in the whole hypergraph, across streams and points.
    pub async fn count_nodes(&self) -> Result<usize, StratumError> {
        let mut conn = self.pool.acquire().await?;
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM nodes")
            .fetch_one(conn.as_mut())
            .await?;
        Ok(count as usize)
    }
}
