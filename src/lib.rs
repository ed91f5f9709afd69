//! # stratum-core
//!
//! A multi-dimensional content hypergraph projection engine: a
//! read-optimized, dimension-aware graph store that represents a versioned
//! content tree as node aggregates whose property values and tree positions
//! may differ per dimension space point (e.g. language/region combinations),
//! scoped to isolated, branchable content streams.
//!
//! ## Overview
//!
//! Content lives in a hypergraph persisted in a transactional SQL store:
//! nodes are flat rows keyed by an internal anchor, and structure is a
//! separate hierarchy table where one row — one hyperedge — connects a
//! parent to an *ordered* list of children per content stream and dimension
//! space point. Sibling order is hyperedge list position, nothing else.
//!
//! The write side is an append-only feed of already-validated domain events;
//! the [`db::Projector`] folds them into the tables, and everything else is
//! reads:
//!
//! - [`query::ContentSubgraph`] answers the per-variant-context queries
//!   (children, parent, siblings, references, bounded subtree descent)
//!   with visibility filtering.
//! - [`node::NodeAggregate`] materializes the cross-variant view of one
//!   aggregate, with full dimension-coverage bookkeeping.
//! - [`adjustment::StructureAdjustmentService`] audits the projection
//!   against the current type schema and offers corrective events for the
//!   drift it finds.
//!
//! ## Architecture
//!
//! - [`dimension`]: dimension space value types and stable point hashes
//! - [`variation`]: the inter-dimensional variation DAG
//!   (specialization/generalization partial order over dimension points)
//! - [`config`]: dimension space configuration the variation graph is
//!   computed from
//! - [`properties`]: identifiers, node classification, property bags
//! - [`schema`]: the consumed node-type schema registry
//! - [`event`]: the domain event enum the projector applies
//! - [`db`]: table layout, migrations, and the event projector
//! - [`node`]: row-to-node and rows-to-aggregate materialization
//! - [`query`]: the graph/subgraph query layer
//! - [`adjustment`]: the structure adjustment (audit + repair) service
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum_core::{
//!     config::DimensionConfiguration,
//!     db::{db_init, Projector},
//!     dimension::DimensionSpacePoint,
//!     properties::ContentStreamId,
//!     query::{ContentGraph, VisibilityConstraints},
//!     schema::NodeTypeRegistry,
//!     variation::InterDimensionalVariationGraph,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DimensionConfiguration::from_file("dimensions.toml")?;
//!     let variation = Arc::new(InterDimensionalVariationGraph::from_configuration(&config)?);
//!     let registry = NodeTypeRegistry::new();
//!
//!     let pool = db_init("content_projection.db".into()).await?;
//!     let projector = Projector::new(pool.clone());
//!     // ... apply the event feed through `projector` ...
//!
//!     let graph = ContentGraph::new(pool, registry);
//!     let stream = ContentStreamId::new();
//!     let subgraph = graph.subgraph(
//!         stream,
//!         DimensionSpacePoint::new([("language", "en")]),
//!         VisibilityConstraints::Default,
//!     );
//!     let count = subgraph.count_nodes().await?;
//!     println!("{count} visible nodes");
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! The query layer is stateless and safe for unbounded concurrent readers;
//! each operation is a single read against the store. The subtree descent
//! alone spans multiple reads and therefore runs inside one SQL transaction
//! — snapshot isolation there is a hard dependency on the underlying store.
//! Event application is assumed single-writer-per-content-stream at the
//! collaborator layer; this crate takes no locks of its own, and audits
//! running concurrently with writes may report transient findings that a
//! re-run (or the repair precondition re-check) resolves.

pub mod adjustment;
pub mod config;
pub mod db;
pub mod dimension;
pub mod error;
pub mod event;
pub mod node;
pub mod properties;
pub mod query;
pub mod schema;
#[cfg(test)]
mod tests;
pub mod variation;

pub use error::*;
