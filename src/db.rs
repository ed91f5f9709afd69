//! Hypergraph storage: schema bootstrap and the event projector.
//!
//! Four tables carry the projection:
//!
//! - `nodes`: one row per node variant, keyed by `(contentstreamid, anchor)`
//!   with a non-unique `(nodeaggregateid, contentstreamid,
//!   origindimensionspacepointhash)` lookup key.
//! - `hierarchy`: one row per hyperedge — `(contentstreamid,
//!   dimensionspacepointhash, parentanchor)` holding a JSON array of child
//!   anchors whose position IS sibling order.
//! - `refs`: named, ordered reference edges keyed by `(contentstreamid,
//!   dimensionspacepointhash, sourceanchor, name, position)`.
//! - `restriction`: presence of `(contentstreamid, dimensionspacepointhash,
//!   nodeaggregateid)` marks the aggregate soft-disabled at that point.
//!
//! The [`Projector`] folds [`GraphEvent`]s into these tables; every
//! `apply`/`apply_batch` call is one SQL transaction, so a batch of
//! corrective events commits all-or-nothing.

use std::{path::PathBuf, str::FromStr};

use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{
        MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator,
    },
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Pool, Row,
};

use crate::{
    dimension::{DimensionSpacePoint, DimensionSpacePointHash},
    error::StratumError,
    event::GraphEvent,
    node::NodeRow,
    properties::{ContentStreamId, NodeAggregateId, NodeAnchor},
};

pub const PROJECTION_DB: &str = "sqlite:content_projection.db";

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, sqlx::Error> {
    let fqdb = format!("sqlite:{}", db_path.display());
    tracing::debug!("Initializing projection db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);
    let pool = Pool::<Sqlite>::connect_with(options).await?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_projection_tables",
        sql: "\
            CREATE TABLE nodes (\
                anchor TEXT NOT NULL, \
                contentstreamid TEXT NOT NULL, \
                nodeaggregateid TEXT NOT NULL, \
                origindimensionspacepoint TEXT NOT NULL, \
                origindimensionspacepointhash TEXT NOT NULL, \
                nodetypename TEXT NOT NULL, \
                classification TEXT NOT NULL, \
                name TEXT, \
                properties TEXT NOT NULL, \
                PRIMARY KEY (contentstreamid, anchor)); \
            CREATE INDEX node_aggregate_identifier \
                ON nodes(nodeaggregateid, contentstreamid, origindimensionspacepointhash); \
            CREATE TABLE hierarchy (\
                contentstreamid TEXT NOT NULL, \
                dimensionspacepoint TEXT NOT NULL, \
                dimensionspacepointhash TEXT NOT NULL, \
                parentanchor TEXT NOT NULL, \
                childanchors TEXT NOT NULL, \
                UNIQUE(contentstreamid, dimensionspacepointhash, parentanchor)); \
            CREATE TABLE refs (\
                contentstreamid TEXT NOT NULL, \
                dimensionspacepointhash TEXT NOT NULL, \
                sourceanchor TEXT NOT NULL, \
                name TEXT NOT NULL, \
                position INTEGER NOT NULL, \
                targetaggregateid TEXT NOT NULL, \
                properties TEXT, \
                UNIQUE(contentstreamid, dimensionspacepointhash, sourceanchor, name, position)); \
            CREATE TABLE restriction (\
                contentstreamid TEXT NOT NULL, \
                dimensionspacepointhash TEXT NOT NULL, \
                nodeaggregateid TEXT NOT NULL, \
                UNIQUE(contentstreamid, dimensionspacepointhash, nodeaggregateid));",
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations).await?;
    migrator.run(&pool).await?;

    let node_count = sqlx::query("SELECT COUNT(*) FROM nodes;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "Projection DB initialized. Node row count: {:?}",
        node_count.get::<u32, usize>(0)
    );
    Ok(pool)
}

fn encode_children(children: &[NodeAnchor]) -> String {
    let strings: Vec<String> = children.iter().map(String::from).collect();
    serde_json::to_string(&strings).expect("string vectors serialize infallibly")
}

pub(crate) fn decode_children(raw: &str) -> Result<Vec<NodeAnchor>, StratumError> {
    let strings: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        StratumError::Store(format!("malformed hyperedge child list '{raw}': {e}"))
    })?;
    strings
        .iter()
        .map(|s| NodeAnchor::try_from(s.as_str()))
        .collect()
}

pub(crate) async fn anchor_of(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    aggregate: NodeAggregateId,
    origin_hash: &DimensionSpacePointHash,
) -> Result<Option<NodeAnchor>, StratumError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT anchor FROM nodes \
         WHERE contentstreamid = ? AND nodeaggregateid = ? \
           AND origindimensionspacepointhash = ?",
    )
    .bind(String::from(&stream))
    .bind(String::from(&aggregate))
    .bind(origin_hash.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|(anchor,)| NodeAnchor::try_from(anchor.as_str()))
        .transpose()
}

/// The anchor of the node variant through which `aggregate` covers the given
/// dimension point, i.e. the one linked into the hierarchy there.
pub(crate) async fn covering_anchor(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
    aggregate: NodeAggregateId,
) -> Result<Option<NodeAnchor>, StratumError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT n.anchor FROM nodes n \
         WHERE n.contentstreamid = ? AND n.nodeaggregateid = ? \
           AND EXISTS (SELECT 1 FROM hierarchy h \
                       WHERE h.contentstreamid = n.contentstreamid \
                         AND h.dimensionspacepointhash = ? \
                         AND instr(h.childanchors, n.anchor) > 0)",
    )
    .bind(String::from(&stream))
    .bind(String::from(&aggregate))
    .bind(point_hash.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|(anchor,)| NodeAnchor::try_from(anchor.as_str()))
        .transpose()
}

pub(crate) async fn node_row(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    anchor: NodeAnchor,
) -> Result<Option<NodeRow>, StratumError> {
    Ok(sqlx::query_as::<_, NodeRow>(
        "SELECT * FROM nodes WHERE contentstreamid = ? AND anchor = ?",
    )
    .bind(String::from(&stream))
    .bind(String::from(&anchor))
    .fetch_optional(&mut *conn)
    .await?)
}

pub(crate) async fn hyperedge_children(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
    parent: NodeAnchor,
) -> Result<Vec<NodeAnchor>, StratumError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT childanchors FROM hierarchy \
         WHERE contentstreamid = ? AND dimensionspacepointhash = ? AND parentanchor = ?",
    )
    .bind(String::from(&stream))
    .bind(point_hash.as_str())
    .bind(String::from(&parent))
    .fetch_optional(&mut *conn)
    .await?;
    match row {
        None => Ok(Vec::new()),
        Some((raw,)) => decode_children(&raw),
    }
}

async fn upsert_hyperedge(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point: &DimensionSpacePoint,
    parent: NodeAnchor,
    children: &[NodeAnchor],
) -> Result<(), StratumError> {
    if children.is_empty() {
        sqlx::query(
            "DELETE FROM hierarchy \
             WHERE contentstreamid = ? AND dimensionspacepointhash = ? AND parentanchor = ?",
        )
        .bind(String::from(&stream))
        .bind(point.hash().as_str())
        .bind(String::from(&parent))
        .execute(&mut *conn)
        .await?;
        return Ok(());
    }
    sqlx::query(
        "INSERT OR REPLACE INTO hierarchy \
         (contentstreamid, dimensionspacepoint, dimensionspacepointhash, parentanchor, childanchors) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(String::from(&stream))
    .bind(point.to_json())
    .bind(point.hash().as_str())
    .bind(String::from(&parent))
    .bind(encode_children(children))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Rewrite the child list of an existing hyperedge. An emptied list removes
/// the row.
async fn set_hyperedge_children(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
    parent: NodeAnchor,
    children: &[NodeAnchor],
) -> Result<(), StratumError> {
    if children.is_empty() {
        sqlx::query(
            "DELETE FROM hierarchy \
             WHERE contentstreamid = ? AND dimensionspacepointhash = ? AND parentanchor = ?",
        )
        .bind(String::from(&stream))
        .bind(point_hash.as_str())
        .bind(String::from(&parent))
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "UPDATE hierarchy SET childanchors = ? \
             WHERE contentstreamid = ? AND dimensionspacepointhash = ? AND parentanchor = ?",
        )
        .bind(encode_children(children))
        .bind(String::from(&stream))
        .bind(point_hash.as_str())
        .bind(String::from(&parent))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// The unique hyperedge whose child list contains `child` at the given
/// point, per the one-parent-per-variant-context invariant.
pub(crate) async fn parent_hyperedge_of(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    point_hash: &DimensionSpacePointHash,
    child: NodeAnchor,
) -> Result<Option<(NodeAnchor, Vec<NodeAnchor>)>, StratumError> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT parentanchor, childanchors FROM hierarchy \
         WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
           AND instr(childanchors, ?) > 0",
    )
    .bind(String::from(&stream))
    .bind(point_hash.as_str())
    .bind(String::from(&child))
    .fetch_optional(&mut *conn)
    .await?;
    match row {
        None => Ok(None),
        Some((parent, raw)) => {
            let children = decode_children(&raw)?;
            // instr is a substring check; confirm actual membership.
            if !children.contains(&child) {
                return Ok(None);
            }
            Ok(Some((NodeAnchor::try_from(parent.as_str())?, children)))
        }
    }
}

async fn insert_node_row(
    conn: &mut SqliteConnection,
    stream: ContentStreamId,
    anchor: NodeAnchor,
    aggregate: NodeAggregateId,
    origin: &DimensionSpacePoint,
    node_type: &str,
    classification: &str,
    name: Option<&str>,
    properties: &str,
) -> Result<(), StratumError> {
    sqlx::query(
        "INSERT INTO nodes \
         (anchor, contentstreamid, nodeaggregateid, origindimensionspacepoint, \
          origindimensionspacepointhash, nodetypename, classification, name, properties) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(String::from(&anchor))
    .bind(String::from(&stream))
    .bind(String::from(&aggregate))
    .bind(origin.to_json())
    .bind(origin.hash().as_str())
    .bind(node_type)
    .bind(classification)
    .bind(name)
    .bind(properties)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Applies the domain event feed to the projection tables.
#[derive(Debug, Clone)]
pub struct Projector {
    pool: Pool<Sqlite>,
}

impl Projector {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Projector { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Apply one event in its own transaction.
    #[tracing::instrument(skip(self, event), fields(event = %event))]
    pub async fn apply(&self, event: &GraphEvent) -> Result<(), StratumError> {
        self.apply_batch(std::slice::from_ref(event)).await
    }

    /// Apply a batch of events in a single transaction: either every event
    /// commits or none do.
    pub async fn apply_batch(&self, events: &[GraphEvent]) -> Result<(), StratumError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            tracing::debug!("[Projector] applying {}", event);
            apply_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn apply_event(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    event: &GraphEvent,
) -> Result<(), StratumError> {
    let conn: &mut SqliteConnection = &mut *tx;
    match event {
        GraphEvent::RootNodeAggregateCreated {
            content_stream,
            aggregate_id,
            node_type,
            coverage,
        } => {
            let anchor = NodeAnchor::new();
            let origin = DimensionSpacePoint::empty();
            insert_node_row(
                conn,
                *content_stream,
                anchor,
                *aggregate_id,
                &origin,
                node_type.as_str(),
                "root",
                None,
                "{}",
            )
            .await?;
            for point in coverage.iter() {
                let sentinel = NodeAnchor::root_sentinel();
                let mut children =
                    hyperedge_children(conn, *content_stream, &point.hash(), sentinel).await?;
                children.push(anchor);
                upsert_hyperedge(conn, *content_stream, point, sentinel, &children).await?;
            }
        }
        GraphEvent::NodeAggregateCreated {
            content_stream,
            aggregate_id,
            node_type,
            origin,
            coverage,
            parent_aggregate_id,
            name,
            classification,
            initial_properties,
            succeeding_sibling,
        } => {
            let anchor = NodeAnchor::new();
            insert_node_row(
                conn,
                *content_stream,
                anchor,
                *aggregate_id,
                origin.as_point(),
                node_type.as_str(),
                classification.as_str(),
                name.as_ref().map(|n| n.as_str()),
                &initial_properties.to_json(),
            )
            .await?;
            for point in coverage.iter() {
                let point_hash = point.hash();
                let Some(parent_anchor) =
                    covering_anchor(conn, *content_stream, &point_hash, *parent_aggregate_id)
                        .await?
                else {
                    tracing::warn!(
                        "[Projector] parent aggregate {} does not cover {}; skipping link",
                        parent_aggregate_id,
                        point
                    );
                    continue;
                };
                let mut children =
                    hyperedge_children(conn, *content_stream, &point_hash, parent_anchor).await?;
                let position = match succeeding_sibling {
                    Some(sibling) => {
                        match covering_anchor(conn, *content_stream, &point_hash, *sibling).await? {
                            Some(sibling_anchor) => children
                                .iter()
                                .position(|a| *a == sibling_anchor)
                                .unwrap_or(children.len()),
                            None => children.len(),
                        }
                    }
                    None => children.len(),
                };
                children.insert(position, anchor);
                upsert_hyperedge(conn, *content_stream, point, parent_anchor, &children).await?;
            }
        }
        GraphEvent::NodeVariantCreated {
            content_stream,
            aggregate_id,
            source_origin,
            target_origin,
            coverage,
        } => {
            let source_anchor =
                anchor_of(conn, *content_stream, *aggregate_id, &source_origin.hash())
                    .await?
                    .ok_or_else(|| {
                        StratumError::InvariantViolation(format!(
                            "variant source {} of aggregate {} is not occupied",
                            source_origin, aggregate_id
                        ))
                    })?;
            let source = node_row(conn, *content_stream, source_anchor)
                .await?
                .ok_or_else(|| {
                    StratumError::InvariantViolation(format!(
                        "node row missing for anchor {source_anchor}"
                    ))
                })?;
            let new_anchor = NodeAnchor::new();
            insert_node_row(
                conn,
                *content_stream,
                new_anchor,
                *aggregate_id,
                target_origin.as_point(),
                source.node_type_name.as_str(),
                &source.classification,
                source.name.as_deref(),
                &source.properties,
            )
            .await?;
            for point in coverage.iter() {
                let point_hash = point.hash();
                match covering_anchor(conn, *content_stream, &point_hash, *aggregate_id).await? {
                    Some(previous) => {
                        let Some((parent, mut children)) =
                            parent_hyperedge_of(conn, *content_stream, &point_hash, previous)
                                .await?
                        else {
                            continue;
                        };
                        for child in children.iter_mut() {
                            if *child == previous {
                                *child = new_anchor;
                            }
                        }
                        set_hyperedge_children(
                            conn,
                            *content_stream,
                            &point_hash,
                            parent,
                            &children,
                        )
                        .await?;
                        // Reference edges follow the variant that now covers
                        // the point.
                        sqlx::query(
                            "UPDATE refs SET sourceanchor = ? \
                             WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                               AND sourceanchor = ?",
                        )
                        .bind(String::from(&new_anchor))
                        .bind(String::from(content_stream))
                        .bind(point_hash.as_str())
                        .bind(String::from(&previous))
                        .execute(&mut *conn)
                        .await?;
                    }
                    None => {
                        // Newly covered point: hang the variant under the
                        // parent aggregate's covering anchor there.
                        let Some((source_parent, _)) = parent_hyperedge_of(
                            conn,
                            *content_stream,
                            &source_origin.hash(),
                            source_anchor,
                        )
                        .await?
                        else {
                            tracing::warn!(
                                "[Projector] variant source {} has no parent hyperedge; \
                                 skipping {}",
                                source_origin,
                                point
                            );
                            continue;
                        };
                        let target_parent = if source_parent.is_root_sentinel() {
                            Some(source_parent)
                        } else {
                            let parent_row = node_row(conn, *content_stream, source_parent)
                                .await?
                                .ok_or_else(|| {
                                    StratumError::InvariantViolation(format!(
                                        "node row missing for parent anchor {source_parent}"
                                    ))
                                })?;
                            covering_anchor(
                                conn,
                                *content_stream,
                                &point_hash,
                                parent_row.node_aggregate_id,
                            )
                            .await?
                        };
                        let Some(target_parent) = target_parent else {
                            tracing::warn!(
                                "[Projector] parent does not cover {}; skipping variant link",
                                point
                            );
                            continue;
                        };
                        let mut children =
                            hyperedge_children(conn, *content_stream, &point_hash, target_parent)
                                .await?;
                        children.push(new_anchor);
                        upsert_hyperedge(conn, *content_stream, point, target_parent, &children)
                            .await?;
                    }
                }
            }
        }
        GraphEvent::NodePropertiesSet {
            content_stream,
            aggregate_id,
            origin,
            set,
            unset,
        } => {
            let anchor = anchor_of(conn, *content_stream, *aggregate_id, &origin.hash())
                .await?
                .ok_or_else(|| {
                    StratumError::NotFound(format!(
                        "aggregate {} does not occupy {}",
                        aggregate_id, origin
                    ))
                })?;
            let row = node_row(conn, *content_stream, anchor)
                .await?
                .ok_or_else(|| {
                    StratumError::InvariantViolation(format!(
                        "node row missing for anchor {anchor}"
                    ))
                })?;
            let mut properties =
                crate::properties::PropertyCollection::from_json(&row.properties)?;
            for (key, value) in set.iter() {
                properties.set_raw(key, value.clone());
            }
            for key in unset {
                properties.remove(key);
            }
            sqlx::query("UPDATE nodes SET properties = ? WHERE contentstreamid = ? AND anchor = ?")
                .bind(properties.to_json())
                .bind(String::from(content_stream))
                .bind(String::from(&anchor))
                .execute(&mut *conn)
                .await?;
        }
        GraphEvent::NodeReferencesSet {
            content_stream,
            source_aggregate_id,
            affected_points,
            name,
            references,
        } => {
            for point in affected_points.iter() {
                let point_hash = point.hash();
                let Some(source_anchor) =
                    covering_anchor(conn, *content_stream, &point_hash, *source_aggregate_id)
                        .await?
                else {
                    continue;
                };
                sqlx::query(
                    "DELETE FROM refs \
                     WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                       AND sourceanchor = ? AND name = ?",
                )
                .bind(String::from(content_stream))
                .bind(point_hash.as_str())
                .bind(String::from(&source_anchor))
                .bind(name.as_str())
                .execute(&mut *conn)
                .await?;
                for (position, reference) in references.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO refs \
                         (contentstreamid, dimensionspacepointhash, sourceanchor, name, \
                          position, targetaggregateid, properties) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(String::from(content_stream))
                    .bind(point_hash.as_str())
                    .bind(String::from(&source_anchor))
                    .bind(name.as_str())
                    .bind(position as i64)
                    .bind(String::from(&reference.target))
                    .bind(reference.properties.as_ref().map(|p| p.to_json()))
                    .execute(&mut *conn)
                    .await?;
                }
            }
        }
        GraphEvent::NodeAggregateMoved {
            content_stream,
            aggregate_id,
            new_parent_aggregate_id,
            succeeding_sibling,
            affected_points,
        } => {
            for point in affected_points.iter() {
                let point_hash = point.hash();
                let Some(child_anchor) =
                    covering_anchor(conn, *content_stream, &point_hash, *aggregate_id).await?
                else {
                    continue;
                };
                let Some((old_parent, mut old_children)) =
                    parent_hyperedge_of(conn, *content_stream, &point_hash, child_anchor).await?
                else {
                    continue;
                };
                old_children.retain(|a| *a != child_anchor);

                let target_parent = match new_parent_aggregate_id {
                    None => old_parent,
                    Some(parent_aggregate) => {
                        match covering_anchor(conn, *content_stream, &point_hash, *parent_aggregate)
                            .await?
                        {
                            Some(anchor) => anchor,
                            None => {
                                tracing::warn!(
                                    "[Projector] move target {} does not cover {}; skipping",
                                    parent_aggregate,
                                    point
                                );
                                continue;
                            }
                        }
                    }
                };

                let mut target_children = if target_parent == old_parent {
                    old_children.clone()
                } else {
                    set_hyperedge_children(
                        conn,
                        *content_stream,
                        &point_hash,
                        old_parent,
                        &old_children,
                    )
                    .await?;
                    hyperedge_children(conn, *content_stream, &point_hash, target_parent).await?
                };
                let position = match succeeding_sibling {
                    Some(sibling) => {
                        match covering_anchor(conn, *content_stream, &point_hash, *sibling).await? {
                            Some(sibling_anchor) => target_children
                                .iter()
                                .position(|a| *a == sibling_anchor)
                                .unwrap_or(target_children.len()),
                            None => target_children.len(),
                        }
                    }
                    None => target_children.len(),
                };
                target_children.insert(position, child_anchor);
                upsert_hyperedge(conn, *content_stream, point, target_parent, &target_children)
                    .await?;
            }
        }
        GraphEvent::NodeAggregateRemoved {
            content_stream,
            aggregate_id,
            affected_covered_points,
        } => {
            let mut all_removed: Vec<NodeAnchor> = Vec::new();
            for point in affected_covered_points.iter() {
                let point_hash = point.hash();
                let Some(anchor) =
                    covering_anchor(conn, *content_stream, &point_hash, *aggregate_id).await?
                else {
                    continue;
                };
                if let Some((parent, mut siblings)) =
                    parent_hyperedge_of(conn, *content_stream, &point_hash, anchor).await?
                {
                    siblings.retain(|a| *a != anchor);
                    set_hyperedge_children(conn, *content_stream, &point_hash, parent, &siblings)
                        .await?;
                }
                // Unlinking the root of a subtree removes the whole subtree
                // at this point.
                let mut removed = vec![anchor];
                let mut queue = vec![anchor];
                while let Some(current) = queue.pop() {
                    let children =
                        hyperedge_children(conn, *content_stream, &point_hash, current).await?;
                    removed.extend(children.iter().copied());
                    queue.extend(children.iter().copied());
                    sqlx::query(
                        "DELETE FROM hierarchy \
                         WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                           AND parentanchor = ?",
                    )
                    .bind(String::from(content_stream))
                    .bind(point_hash.as_str())
                    .bind(String::from(&current))
                    .execute(&mut *conn)
                    .await?;
                }
                for anchor in removed.iter() {
                    sqlx::query(
                        "DELETE FROM refs \
                         WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                           AND sourceanchor = ?",
                    )
                    .bind(String::from(content_stream))
                    .bind(point_hash.as_str())
                    .bind(String::from(anchor))
                    .execute(&mut *conn)
                    .await?;
                    if let Some(row) = node_row(conn, *content_stream, *anchor).await? {
                        sqlx::query(
                            "DELETE FROM restriction \
                             WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                               AND nodeaggregateid = ?",
                        )
                        .bind(String::from(content_stream))
                        .bind(point_hash.as_str())
                        .bind(String::from(&row.node_aggregate_id))
                        .execute(&mut *conn)
                        .await?;
                    }
                }
                all_removed.extend(removed);
            }
            // Garbage-collect node rows with no hierarchy presence left
            // anywhere in the stream.
            for anchor in all_removed {
                let still_linked = sqlx::query(
                    "SELECT 1 FROM hierarchy \
                     WHERE contentstreamid = ? AND instr(childanchors, ?) > 0 LIMIT 1",
                )
                .bind(String::from(content_stream))
                .bind(String::from(&anchor))
                .fetch_optional(&mut *conn)
                .await?;
                if still_linked.is_none() {
                    sqlx::query("DELETE FROM nodes WHERE contentstreamid = ? AND anchor = ?")
                        .bind(String::from(content_stream))
                        .bind(String::from(&anchor))
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        GraphEvent::NodeAggregateDisabled {
            content_stream,
            aggregate_id,
            affected_points,
        } => {
            for point in affected_points.iter() {
                sqlx::query(
                    "INSERT OR REPLACE INTO restriction \
                     (contentstreamid, dimensionspacepointhash, nodeaggregateid) VALUES (?, ?, ?)",
                )
                .bind(String::from(content_stream))
                .bind(point.hash().as_str())
                .bind(String::from(aggregate_id))
                .execute(&mut *conn)
                .await?;
            }
        }
        GraphEvent::NodeAggregateEnabled {
            content_stream,
            aggregate_id,
            affected_points,
        } => {
            for point in affected_points.iter() {
                sqlx::query(
                    "DELETE FROM restriction \
                     WHERE contentstreamid = ? AND dimensionspacepointhash = ? \
                       AND nodeaggregateid = ?",
                )
                .bind(String::from(content_stream))
                .bind(point.hash().as_str())
                .bind(String::from(aggregate_id))
                .execute(&mut *conn)
                .await?;
            }
        }
        GraphEvent::DimensionSpacePointMoved {
            content_stream,
            source,
            target,
        } => {
            let source_hash = source.hash();
            let target_hash = target.hash();
            sqlx::query(
                "UPDATE hierarchy SET dimensionspacepoint = ?, dimensionspacepointhash = ? \
                 WHERE contentstreamid = ? AND dimensionspacepointhash = ?",
            )
            .bind(target.to_json())
            .bind(target_hash.as_str())
            .bind(String::from(content_stream))
            .bind(source_hash.as_str())
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "UPDATE nodes SET origindimensionspacepoint = ?, \
                 origindimensionspacepointhash = ? \
                 WHERE contentstreamid = ? AND origindimensionspacepointhash = ?",
            )
            .bind(target.to_json())
            .bind(target_hash.as_str())
            .bind(String::from(content_stream))
            .bind(source_hash.as_str())
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "UPDATE refs SET dimensionspacepointhash = ? \
                 WHERE contentstreamid = ? AND dimensionspacepointhash = ?",
            )
            .bind(target_hash.as_str())
            .bind(String::from(content_stream))
            .bind(source_hash.as_str())
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "UPDATE restriction SET dimensionspacepointhash = ? \
                 WHERE contentstreamid = ? AND dimensionspacepointhash = ?",
            )
            .bind(target_hash.as_str())
            .bind(String::from(content_stream))
            .bind(source_hash.as_str())
            .execute(&mut *conn)
            .await?;
        }
        GraphEvent::ContentStreamForked {
            source_content_stream,
            target_content_stream,
        } => {
            sqlx::query(
                "INSERT INTO nodes (anchor, contentstreamid, nodeaggregateid, \
                 origindimensionspacepoint, origindimensionspacepointhash, nodetypename, \
                 classification, name, properties) \
                 SELECT anchor, ?, nodeaggregateid, origindimensionspacepoint, \
                 origindimensionspacepointhash, nodetypename, classification, name, properties \
                 FROM nodes WHERE contentstreamid = ?",
            )
            .bind(String::from(target_content_stream))
            .bind(String::from(source_content_stream))
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "INSERT INTO hierarchy (contentstreamid, dimensionspacepoint, \
                 dimensionspacepointhash, parentanchor, childanchors) \
                 SELECT ?, dimensionspacepoint, dimensionspacepointhash, parentanchor, \
                 childanchors FROM hierarchy WHERE contentstreamid = ?",
            )
            .bind(String::from(target_content_stream))
            .bind(String::from(source_content_stream))
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "INSERT INTO refs (contentstreamid, dimensionspacepointhash, sourceanchor, \
                 name, position, targetaggregateid, properties) \
                 SELECT ?, dimensionspacepointhash, sourceanchor, name, position, \
                 targetaggregateid, properties FROM refs WHERE contentstreamid = ?",
            )
            .bind(String::from(target_content_stream))
            .bind(String::from(source_content_stream))
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "INSERT INTO restriction (contentstreamid, dimensionspacepointhash, \
                 nodeaggregateid) \
                 SELECT ?, dimensionspacepointhash, nodeaggregateid \
                 FROM restriction WHERE contentstreamid = ?",
            )
            .bind(String::from(target_content_stream))
            .bind(String::from(source_content_stream))
            .execute(&mut *conn)
            .await?;
        }
        GraphEvent::ContentStreamRemoved { content_stream } => {
            for table in ["nodes", "hierarchy", "refs", "restriction"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE contentstreamid = ?"))
                    .bind(String::from(content_stream))
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}
