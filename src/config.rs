//! Dimension space configuration.
//!
//! The legal dimension space and its variation edges are defined by
//! configuration, not by the projection: each content dimension declares a
//! tree of values where nested values specialize their parent. The full
//! legal space is the cartesian product of every dimension's values;
//! variation edges run generalization → specialization pointwise.
//!
//! Construction of the [`crate::variation::InterDimensionalVariationGraph`]
//! from a validated configuration happens exactly once at startup; the
//! projection engine treats the result as read-only.

use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::StratumError;

/// One value within a dimension's specialization tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specializations: Vec<DimensionValue>,
}

impl DimensionValue {
    pub fn new<S: Into<String>>(value: S) -> Self {
        DimensionValue {
            value: value.into(),
            specializations: Vec::new(),
        }
    }

    pub fn with_specializations<S: Into<String>>(
        value: S,
        specializations: Vec<DimensionValue>,
    ) -> Self {
        DimensionValue {
            value: value.into(),
            specializations,
        }
    }
}

/// A single content dimension: a name plus a forest of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDimension {
    pub name: String,
    pub values: Vec<DimensionValue>,
}

impl ContentDimension {
    /// Flatten the value forest into `value -> generalization parent value`.
    /// Roots map to `None`.
    pub fn generalization_map(&self) -> BTreeMap<String, Option<String>> {
        fn walk(
            value: &DimensionValue,
            parent: Option<&str>,
            out: &mut BTreeMap<String, Option<String>>,
        ) {
            out.insert(value.value.clone(), parent.map(|p| p.to_string()));
            for child in value.specializations.iter() {
                walk(child, Some(&value.value), out);
            }
        }
        let mut out = BTreeMap::new();
        for root in self.values.iter() {
            walk(root, None, &mut out);
        }
        out
    }
}

/// The full dimension configuration: an ordered list of content dimensions.
///
/// An empty configuration is legal and yields the single zero-dimensional
/// point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfiguration {
    #[serde(default)]
    pub dimensions: Vec<ContentDimension>,
}

impl DimensionConfiguration {
    pub fn new(dimensions: Vec<ContentDimension>) -> Result<Self, StratumError> {
        let config = DimensionConfiguration { dimensions };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, StratumError> {
        let config: DimensionConfiguration = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StratumError> {
        tracing::debug!("Reading dimension configuration from {:?}", path.as_ref());
        Self::from_toml(&read_to_string(path)?)
    }

    /// Reject configurations the variation graph cannot be built from:
    /// unnamed or duplicate dimensions, dimensions without values, duplicate
    /// values within one dimension's tree. The tree representation makes
    /// value-level cycles unrepresentable; point-level acyclicity is
    /// re-checked when the variation graph is assembled.
    pub fn validate(&self) -> Result<(), StratumError> {
        let mut seen_dimensions = BTreeMap::new();
        for dimension in self.dimensions.iter() {
            if dimension.name.is_empty() {
                return Err(StratumError::Command(
                    "dimension configuration contains an unnamed dimension".to_string(),
                ));
            }
            if seen_dimensions.insert(dimension.name.clone(), ()).is_some() {
                return Err(StratumError::Command(format!(
                    "duplicate dimension '{}' in configuration",
                    dimension.name
                )));
            }
            if dimension.values.is_empty() {
                return Err(StratumError::Command(format!(
                    "dimension '{}' declares no values",
                    dimension.name
                )));
            }
            let mut seen_values = BTreeMap::new();
            let mut stack: Vec<&DimensionValue> = dimension.values.iter().collect();
            while let Some(value) = stack.pop() {
                if seen_values.insert(value.value.clone(), ()).is_some() {
                    return Err(StratumError::Command(format!(
                        "duplicate value '{}' in dimension '{}'",
                        value.value, dimension.name
                    )));
                }
                stack.extend(value.specializations.iter());
            }
        }
        Ok(())
    }
}
