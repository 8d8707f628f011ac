//! Feature rows and the single required-key lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which part of the pipeline asked for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureComponent {
    /// Process state fed to the policy (`bg_features`)
    Background,
    /// Current setpoints fed to the policy (`action_features`)
    Action,
    /// Simulator input
    Simulator,
}

impl std::fmt::Display for FeatureComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Action => write!(f, "action"),
            Self::Simulator => write!(f, "simulator"),
        }
    }
}

/// A required feature was absent from the row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing {component} feature '{feature}'")]
pub struct MissingFeature {
    pub feature: String,
    pub component: FeatureComponent,
}

/// One sensor reading: feature name → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRow(pub HashMap<String, f64>);

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for tests and the replay stream.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Look up a feature the caller cannot proceed without.
    pub fn require(&self, name: &str, component: FeatureComponent) -> Result<f64, MissingFeature> {
        self.get(name).ok_or_else(|| MissingFeature {
            feature: name.to_string(),
            component,
        })
    }

    /// Collect `names` in order, failing on the first absent one.
    pub fn require_all(
        &self,
        names: &[String],
        component: FeatureComponent,
    ) -> Result<Vec<f64>, MissingFeature> {
        names.iter().map(|n| self.require(n, component)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, f64>> for FeatureRow {
    fn from(map: HashMap<String, f64>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureRow {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_present_and_missing() {
        let row = FeatureRow::new().with("temp", 71.5);
        assert_eq!(row.require("temp", FeatureComponent::Background), Ok(71.5));

        let err = row
            .require("speed", FeatureComponent::Action)
            .expect_err("speed is absent");
        assert_eq!(err.feature, "speed");
        assert_eq!(err.component, FeatureComponent::Action);
        assert_eq!(err.to_string(), "missing action feature 'speed'");
    }

    #[test]
    fn test_require_all_keeps_order() {
        let row: FeatureRow = [("a", 1.0), ("b", 2.0), ("c", 3.0)].into_iter().collect();
        let names = vec!["c".to_string(), "a".to_string()];
        assert_eq!(
            row.require_all(&names, FeatureComponent::Simulator),
            Ok(vec![3.0, 1.0])
        );
    }

    #[test]
    fn test_row_deserializes_from_plain_object() {
        let row: FeatureRow = serde_json::from_str(r#"{"x": 1.5, "y": -2}"#).expect("parse");
        assert_eq!(row.get("x"), Some(1.5));
        assert_eq!(row.get("y"), Some(-2.0));
    }
}
