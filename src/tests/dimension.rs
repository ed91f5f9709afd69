//! Tests for dimension space value types.

use crate::dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint,
};

#[test]
fn hash_is_stable_across_insertion_order() {
    let a = DimensionSpacePoint::new([("language", "en"), ("region", "us")]);
    let b = DimensionSpacePoint::new([("region", "us"), ("language", "en")]);
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn hash_differs_for_distinct_coordinates() {
    let a = DimensionSpacePoint::new([("language", "en")]);
    let b = DimensionSpacePoint::new([("language", "de")]);
    assert_ne!(a.hash(), b.hash());
}

#[test]
fn empty_point_has_no_coordinates() {
    let point = DimensionSpacePoint::empty();
    assert!(point.coordinates().is_empty());
    assert_eq!(point.to_string(), "{}");
}

#[test]
fn json_round_trip() {
    let point = DimensionSpacePoint::new([("language", "en"), ("region", "us")]);
    let parsed = DimensionSpacePoint::from_json(&point.to_json()).unwrap();
    assert_eq!(point, parsed);
    assert_eq!(point.hash(), parsed.hash());
}

#[test]
fn origin_is_distinct_but_convertible() {
    let point = DimensionSpacePoint::new([("language", "en")]);
    let origin = OriginDimensionSpacePoint::from(point.clone());
    assert_eq!(origin.hash(), point.hash());
    assert_eq!(DimensionSpacePoint::from(origin), point);
}

#[test]
fn set_deduplicates_by_hash() {
    let en = DimensionSpacePoint::new([("language", "en")]);
    let also_en = DimensionSpacePoint::new([("language", "en")]);
    let de = DimensionSpacePoint::new([("language", "de")]);
    let set: DimensionSpacePointSet = vec![en.clone(), also_en, de.clone()].into();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&en));
    assert!(set.contains(&de));
}

#[test]
fn set_algebra() {
    let en = DimensionSpacePoint::new([("language", "en")]);
    let de = DimensionSpacePoint::new([("language", "de")]);
    let fr = DimensionSpacePoint::new([("language", "fr")]);
    let lhs: DimensionSpacePointSet = vec![en.clone(), de.clone()].into();
    let rhs: DimensionSpacePointSet = vec![de.clone(), fr.clone()].into();

    let union = lhs.union(&rhs);
    assert_eq!(union.len(), 3);

    let intersection = lhs.intersection(&rhs);
    assert_eq!(intersection.len(), 1);
    assert!(intersection.contains(&de));

    let difference = lhs.difference(&rhs);
    assert_eq!(difference.len(), 1);
    assert!(difference.contains(&en));
}

#[test]
fn set_serde_round_trips_as_point_list() {
    let set: DimensionSpacePointSet = vec![
        DimensionSpacePoint::new([("language", "en")]),
        DimensionSpacePoint::new([("language", "de")]),
    ]
    .into();
    let json = serde_json::to_string(&set).unwrap();
    let parsed: DimensionSpacePointSet = serde_json::from_str(&json).unwrap();
    assert_eq!(set, parsed);
}
