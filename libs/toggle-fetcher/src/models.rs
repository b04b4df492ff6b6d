//! Toggle payload served by the features endpoint.
//!
//! Fields the client does not know about are ignored so newer servers stay
//! readable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full toggle state of one project or environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleCollection {
    #[serde(default = "default_version")]
    pub version: u32,
    pub features: Vec<FeatureToggle>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl ToggleCollection {
    /// Look a toggle up by name
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&FeatureToggle> {
        self.features.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn segment(&self, id: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggle {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub impression_data: bool,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub dependencies: Vec<FeatureDependency>,
}

/// Activation strategy with its parameters and targeting constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub name: String,
    /// Values are usually strings; numbers and booleans are kept as sent
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Ids into [`ToggleCollection::segments`]
    #[serde(default)]
    pub segments: Vec<u64>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub context_name: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub weight_type: Option<String>,
    #[serde(default)]
    pub stickiness: Option<String>,
    #[serde(default)]
    pub payload: Option<VariantPayload>,
    #[serde(default)]
    pub overrides: Vec<VariantOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOverride {
    pub context_name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Parent toggle that must be in the given state for this one to be on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDependency {
    pub feature: String,
    #[serde(default = "default_dependency_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub variants: Vec<String>,
}

fn default_dependency_enabled() -> bool {
    true
}

/// Reusable set of constraints shared between strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}
