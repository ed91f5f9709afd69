//! Dimension space value types.
//!
//! Content varies along configured dimensions (language, region, ...). A
//! [`DimensionSpacePoint`] pins every dimension to one coordinate value and
//! identifies a single variant context. Points hash to a stable
//! [`DimensionSpacePointHash`] used as the storage key for hyperedges,
//! references and restrictions, and as the grouping key during aggregate
//! materialization.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    ops::Deref,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StratumError;

/// Stable content hash of a [`DimensionSpacePoint`].
///
/// Sha256 over the canonical JSON serialization of the coordinates, hex
/// encoded. Two points with equal coordinates always produce equal hashes,
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimensionSpacePointHash(String);

impl DimensionSpacePointHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct a hash read back from storage. The value is trusted; it
    /// was produced by [`DimensionSpacePoint::hash`] when the row was
    /// written.
    pub fn from_storage<S: Into<String>>(value: S) -> Self {
        DimensionSpacePointHash(value.into())
    }
}

impl Display for DimensionSpacePointHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&DimensionSpacePointHash> for String {
    fn from(val: &DimensionSpacePointHash) -> Self {
        val.0.clone()
    }
}

/// An immutable mapping from dimension name to a single coordinate value.
///
/// Coordinates are kept in a `BTreeMap` so serialization and hashing are
/// canonical regardless of construction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionSpacePoint {
    coordinates: BTreeMap<String, String>,
}

impl DimensionSpacePoint {
    pub fn new<I, K, V>(coordinates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        DimensionSpacePoint {
            coordinates: coordinates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The zero-dimensional point, used when no dimensions are configured.
    pub fn empty() -> Self {
        DimensionSpacePoint::default()
    }

    pub fn coordinate(&self, dimension: &str) -> Option<&str> {
        self.coordinates.get(dimension).map(|v| v.as_str())
    }

    pub fn coordinates(&self) -> &BTreeMap<String, String> {
        &self.coordinates
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.coordinates.keys().map(|k| k.as_str())
    }

    /// Stable storage/grouping key for this point.
    pub fn hash(&self) -> DimensionSpacePointHash {
        let canonical = serde_json::to_string(&self.coordinates)
            .expect("BTreeMap<String, String> serialization is infallible");
        let digest = Sha256::digest(canonical.as_bytes());
        DimensionSpacePointHash(hex::encode(digest))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.coordinates)
            .expect("BTreeMap<String, String> serialization is infallible")
    }

    pub fn from_json(json: &str) -> Result<Self, StratumError> {
        let coordinates: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(DimensionSpacePoint { coordinates })
    }
}

impl Display for DimensionSpacePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.coordinates.is_empty() {
            return write!(f, "{{}}");
        }
        let rendered = self
            .coordinates
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

/// A [`DimensionSpacePoint`] tagged as the point where a node variant was
/// authored. Same representation, distinct meaning: a node has exactly one
/// origin, while it may cover many points through the variation graph.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OriginDimensionSpacePoint(DimensionSpacePoint);

impl OriginDimensionSpacePoint {
    pub fn new<I, K, V>(coordinates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        OriginDimensionSpacePoint(DimensionSpacePoint::new(coordinates))
    }

    pub fn as_point(&self) -> &DimensionSpacePoint {
        &self.0
    }

    pub fn into_point(self) -> DimensionSpacePoint {
        self.0
    }

    pub fn hash(&self) -> DimensionSpacePointHash {
        self.0.hash()
    }
}

impl From<DimensionSpacePoint> for OriginDimensionSpacePoint {
    fn from(point: DimensionSpacePoint) -> Self {
        OriginDimensionSpacePoint(point)
    }
}

impl From<OriginDimensionSpacePoint> for DimensionSpacePoint {
    fn from(origin: OriginDimensionSpacePoint) -> Self {
        origin.0
    }
}

impl Deref for OriginDimensionSpacePoint {
    type Target = DimensionSpacePoint;
    fn deref(&self) -> &DimensionSpacePoint {
        &self.0
    }
}

impl Display for OriginDimensionSpacePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of dimension space points keyed by hash. Insertion order is
/// irrelevant; iteration follows hash order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DimensionSpacePoint>", into = "Vec<DimensionSpacePoint>")]
pub struct DimensionSpacePointSet {
    points: BTreeMap<DimensionSpacePointHash, DimensionSpacePoint>,
}

impl DimensionSpacePointSet {
    pub fn empty() -> Self {
        DimensionSpacePointSet::default()
    }

    pub fn insert(&mut self, point: DimensionSpacePoint) {
        self.points.insert(point.hash(), point);
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.points.contains_key(&point.hash())
    }

    pub fn contains_hash(&self, hash: &DimensionSpacePointHash) -> bool {
        self.points.contains_key(hash)
    }

    pub fn get(&self, hash: &DimensionSpacePointHash) -> Option<&DimensionSpacePoint> {
        self.points.get(hash)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DimensionSpacePoint> {
        self.points.values()
    }

    pub fn hashes(&self) -> BTreeSet<DimensionSpacePointHash> {
        self.points.keys().cloned().collect()
    }

    pub fn union(&self, rhs: &Self) -> Self {
        let mut points = self.points.clone();
        for (hash, point) in rhs.points.iter() {
            points.insert(hash.clone(), point.clone());
        }
        DimensionSpacePointSet { points }
    }

    pub fn intersection(&self, rhs: &Self) -> Self {
        DimensionSpacePointSet {
            points: self
                .points
                .iter()
                .filter(|(hash, _)| rhs.points.contains_key(*hash))
                .map(|(hash, point)| (hash.clone(), point.clone()))
                .collect(),
        }
    }

    pub fn difference(&self, rhs: &Self) -> Self {
        DimensionSpacePointSet {
            points: self
                .points
                .iter()
                .filter(|(hash, _)| !rhs.points.contains_key(*hash))
                .map(|(hash, point)| (hash.clone(), point.clone()))
                .collect(),
        }
    }
}

impl From<Vec<DimensionSpacePoint>> for DimensionSpacePointSet {
    fn from(points: Vec<DimensionSpacePoint>) -> Self {
        points.into_iter().collect()
    }
}

impl From<DimensionSpacePointSet> for Vec<DimensionSpacePoint> {
    fn from(set: DimensionSpacePointSet) -> Self {
        set.points.into_values().collect()
    }
}

impl FromIterator<DimensionSpacePoint> for DimensionSpacePointSet {
    fn from_iter<I: IntoIterator<Item = DimensionSpacePoint>>(iter: I) -> Self {
        let mut set = DimensionSpacePointSet::default();
        for point in iter {
            set.insert(point);
        }
        set
    }
}

impl IntoIterator for DimensionSpacePointSet {
    type Item = DimensionSpacePoint;
    type IntoIter = btree_map::IntoValues<DimensionSpacePointHash, DimensionSpacePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_values()
    }
}

impl<'a> IntoIterator for &'a DimensionSpacePointSet {
    type Item = &'a DimensionSpacePoint;
    type IntoIter = btree_map::Values<'a, DimensionSpacePointHash, DimensionSpacePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.values()
    }
}
