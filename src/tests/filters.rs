//! Tests for visibility and node type filtering primitives.

use crate::{
    error::StratumError,
    properties::NodeTypeName,
    query::{NodeTypeFilter, SiblingMode, VisibilityConstraints},
    schema::{NodeTypeRegistry, NodeTypeSchema},
};

fn registry_with(types: &[&str]) -> NodeTypeRegistry {
    let registry = NodeTypeRegistry::new();
    for name in types {
        registry.register(NodeTypeSchema::new(*name));
    }
    registry
}

#[test]
fn allow_list_admits_only_listed_types() {
    let registry = registry_with(&["Article", "Page"]);
    let filter = NodeTypeFilter::parse("Article").unwrap();
    assert!(filter.matches(&NodeTypeName::from("Article"), &registry));
    assert!(!filter.matches(&NodeTypeName::from("Page"), &registry));
}

#[test]
fn deny_entries_exclude_listed_types() {
    let registry = registry_with(&["Article", "Page"]);
    let filter = NodeTypeFilter::parse("!Page").unwrap();
    assert!(filter.matches(&NodeTypeName::from("Article"), &registry));
    assert!(!filter.matches(&NodeTypeName::from("Page"), &registry));
}

#[test]
fn mixed_filter_applies_both() {
    let registry = registry_with(&["Article", "Page", "News"]);
    let filter = NodeTypeFilter::parse("Article,News,!News").unwrap();
    assert!(filter.matches(&NodeTypeName::from("Article"), &registry));
    assert!(!filter.matches(&NodeTypeName::from("News"), &registry));
    assert!(!filter.matches(&NodeTypeName::from("Page"), &registry));
}

/// A type unknown to the schema matches no constraint: allow-lists fail
/// closed, deny-only filters leave it untouched.
#[test]
fn unknown_type_fails_allow_lists_closed() {
    let registry = registry_with(&["Article"]);
    let allow = NodeTypeFilter::parse("Article,Vanished").unwrap();
    assert!(!allow.matches(&NodeTypeName::from("Vanished"), &registry));

    let deny_only = NodeTypeFilter::parse("!Vanished").unwrap();
    assert!(deny_only.matches(&NodeTypeName::from("Vanished"), &registry));
}

#[test]
fn empty_filter_entries_are_rejected() {
    assert!(matches!(
        NodeTypeFilter::parse("Article,,Page"),
        Err(StratumError::Command(_))
    ));
}

#[test]
fn sibling_mode_parses_case_insensitively() {
    assert_eq!(SiblingMode::try_from("ALL").unwrap(), SiblingMode::All);
    assert_eq!(
        SiblingMode::try_from("preceding").unwrap(),
        SiblingMode::Preceding
    );
    assert_eq!(
        SiblingMode::try_from("Succeeding").unwrap(),
        SiblingMode::Succeeding
    );
    assert!(matches!(
        SiblingMode::try_from("sideways"),
        Err(StratumError::Command(_))
    ));
}

#[test]
fn default_visibility_excludes_disabled() {
    assert!(VisibilityConstraints::Default.excludes_disabled());
    assert!(!VisibilityConstraints::WithoutRestrictions.excludes_disabled());
}
