//! Inter-dimensional variation graph.
//!
//! A directed acyclic graph over every legal [`DimensionSpacePoint`],
//! ordered by specialization: an edge runs from the more general point to
//! the more specific one. The graph is computed once from
//! [`DimensionConfiguration`] and is read-only at query time; queries answer
//! "which points specialize this one" and "how do these two points relate".

use std::collections::BTreeMap;

use petgraph::{
    algo::is_cyclic_directed,
    graph::NodeIndex,
    visit::{depth_first_search, DfsEvent},
    Direction,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::DimensionConfiguration,
    dimension::{DimensionSpacePoint, DimensionSpacePointHash, DimensionSpacePointSet},
    error::StratumError,
};

/// How one dimension space point relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariantType {
    Same,
    Specialization,
    Generalization,
    Peer,
}

impl std::fmt::Display for VariantType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The variation DAG plus a hash → node-index side map, mirroring how
/// content is keyed in storage.
#[derive(Debug, Clone)]
pub struct InterDimensionalVariationGraph {
    graph: petgraph::Graph<DimensionSpacePoint, ()>,
    index: BTreeMap<DimensionSpacePointHash, NodeIndex>,
    space: DimensionSpacePointSet,
}

impl InterDimensionalVariationGraph {
    /// Assemble the full legal space (cartesian product of dimension values)
    /// and its immediate variation edges (exactly one dimension stepping one
    /// specialization level).
    pub fn from_configuration(
        config: &DimensionConfiguration,
    ) -> Result<Self, StratumError> {
        config.validate()?;

        // Per-dimension flattened value lists and value -> parent maps.
        let mut dimension_names = Vec::new();
        let mut value_lists = Vec::new();
        let mut parent_maps = Vec::new();
        for dimension in config.dimensions.iter() {
            let parents = dimension.generalization_map();
            dimension_names.push(dimension.name.clone());
            value_lists.push(parents.keys().cloned().collect::<Vec<String>>());
            parent_maps.push(parents);
        }

        let mut points = vec![DimensionSpacePoint::empty()];
        for (name, values) in dimension_names.iter().zip(value_lists.iter()) {
            let mut extended = Vec::with_capacity(points.len() * values.len());
            for point in points.iter() {
                for value in values.iter() {
                    let mut coordinates = point.coordinates().clone();
                    coordinates.insert(name.clone(), value.clone());
                    extended.push(DimensionSpacePoint::new(coordinates));
                }
            }
            points = extended;
        }

        let mut graph = petgraph::Graph::new();
        let mut index = BTreeMap::new();
        let mut space = DimensionSpacePointSet::empty();
        for point in points.iter() {
            let node_index = graph.add_node(point.clone());
            index.insert(point.hash(), node_index);
            space.insert(point.clone());
        }

        for point in points.iter() {
            let specific_index = index[&point.hash()];
            for (dimension_position, name) in dimension_names.iter().enumerate() {
                let value = point
                    .coordinate(name)
                    .expect("every legal point carries every configured dimension");
                if let Some(Some(parent_value)) = parent_maps[dimension_position].get(value) {
                    let mut coordinates = point.coordinates().clone();
                    coordinates.insert(name.clone(), parent_value.clone());
                    let general = DimensionSpacePoint::new(coordinates);
                    let general_index = index[&general.hash()];
                    graph.add_edge(general_index, specific_index, ());
                }
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(StratumError::InvariantViolation(
                "variation graph contains a specialization cycle".to_string(),
            ));
        }

        tracing::debug!(
            "[InterDimensionalVariationGraph] Assembled {} points, {} variation edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(InterDimensionalVariationGraph {
            graph,
            index,
            space,
        })
    }

    /// The full legal dimension space.
    pub fn dimension_space(&self) -> &DimensionSpacePointSet {
        &self.space
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.index.contains_key(&point.hash())
    }

    /// Every point reachable from `point` by following specialization edges,
    /// minus `excluding`. Returns the empty set for a point outside the
    /// legal space.
    pub fn specialization_set(
        &self,
        point: &DimensionSpacePoint,
        include_self: bool,
        excluding: &DimensionSpacePointSet,
    ) -> DimensionSpacePointSet {
        self.reachable_set(point, include_self, excluding, Direction::Outgoing)
    }

    /// Every point from which `point` is reachable along specialization
    /// edges, i.e. the generalizations of `point`.
    pub fn generalization_set(
        &self,
        point: &DimensionSpacePoint,
        include_self: bool,
    ) -> DimensionSpacePointSet {
        self.reachable_set(
            point,
            include_self,
            &DimensionSpacePointSet::empty(),
            Direction::Incoming,
        )
    }

    /// Classify `a` relative to `b`. Points outside the legal space have no
    /// variation edges, so they classify as [`VariantType::Peer`] against
    /// everything but themselves.
    pub fn variant_type(&self, a: &DimensionSpacePoint, b: &DimensionSpacePoint) -> VariantType {
        if a.hash() == b.hash() {
            return VariantType::Same;
        }
        if self
            .specialization_set(b, false, &DimensionSpacePointSet::empty())
            .contains(a)
        {
            return VariantType::Specialization;
        }
        if self
            .specialization_set(a, false, &DimensionSpacePointSet::empty())
            .contains(b)
        {
            return VariantType::Generalization;
        }
        VariantType::Peer
    }

    fn reachable_set(
        &self,
        point: &DimensionSpacePoint,
        include_self: bool,
        excluding: &DimensionSpacePointSet,
        direction: Direction,
    ) -> DimensionSpacePointSet {
        let Some(start) = self.index.get(&point.hash()) else {
            return DimensionSpacePointSet::empty();
        };
        // DFS over the (possibly reversed) graph, collecting discovered nodes.
        let mut set = DimensionSpacePointSet::empty();
        match direction {
            Direction::Outgoing => {
                depth_first_search(&self.graph, Some(*start), |event| {
                    if let DfsEvent::Discover(node, _) = event {
                        set.insert(self.graph[node].clone());
                    }
                });
            }
            Direction::Incoming => {
                let reversed = petgraph::visit::Reversed(&self.graph);
                depth_first_search(reversed, Some(*start), |event| {
                    if let DfsEvent::Discover(node, _) = event {
                        set.insert(self.graph[node].clone());
                    }
                });
            }
        }
        if !include_self {
            set = set.difference(&DimensionSpacePointSet::from(vec![point.clone()]));
        }
        set.difference(excluding)
    }
}
