use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;
use crate::selector::DeviceSelector;

/// Bulk-query filter. Each populated field further narrows the match; all
/// populated fields must hold (AND semantics). `features: Some(∅)` matches
/// nothing — that is how an empty permission set short-circuits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_ids: Option<BTreeSet<u32>>,
}

impl ParameterFilter {
    /// Matches everything.
    pub fn any() -> Self {
        ParameterFilter::default()
    }

    pub fn only_features(features: impl IntoIterator<Item = String>) -> Self {
        ParameterFilter {
            features: Some(features.into_iter().map(|f| f.to_ascii_lowercase()).collect()),
            ..ParameterFilter::default()
        }
    }

    pub fn only_device(selector: DeviceSelector) -> Self {
        ParameterFilter {
            devices: vec![selector],
            ..ParameterFilter::default()
        }
    }

    /// AND-merge with another filter: feature sets intersect, device
    /// selectors accumulate, definition-id sets intersect.
    pub fn and_merge(mut self, other: ParameterFilter) -> ParameterFilter {
        self.features = match (self.features, other.features) {
            (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        self.devices.extend(other.devices);
        self.definition_ids = match (self.definition_ids, other.definition_ids) {
            (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        self
    }

    /// True when the filter provably matches nothing.
    pub fn is_empty_match(&self) -> bool {
        self.features.as_ref().is_some_and(|f| f.is_empty())
            || self.definition_ids.as_ref().is_some_and(|d| d.is_empty())
    }

    pub fn matches_feature(&self, feature_name: &str) -> bool {
        match &self.features {
            None => true,
            Some(set) => set.contains(&feature_name.to_ascii_lowercase()),
        }
    }

    pub fn matches_device(&self, device: DeviceId) -> bool {
        self.devices.iter().all(|s| s.matches(device))
    }

    pub fn matches_definition_id(&self, id: u32) -> bool {
        match &self.definition_ids {
            None => true,
            Some(set) => set.contains(&id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceCollection;

    #[test]
    fn empty_filter_matches_everything() {
        let f = ParameterFilter::any();
        assert!(f.matches_feature("Identity"));
        assert!(f.matches_device(DeviceId::HEADSTATION));
        assert!(f.matches_definition_id(42));
        assert!(!f.is_empty_match());
    }

    #[test]
    fn feature_intersection_on_merge() {
        let a = ParameterFilter::only_features(["A".to_string(), "B".to_string()]);
        let b = ParameterFilter::only_features(["B".to_string(), "C".to_string()]);
        let merged = a.and_merge(b);
        assert!(merged.matches_feature("b"));
        assert!(!merged.matches_feature("a"));
        assert!(!merged.matches_feature("c"));
    }

    #[test]
    fn empty_feature_set_matches_nothing() {
        let f = ParameterFilter::only_features(std::iter::empty());
        assert!(f.is_empty_match());
        assert!(!f.matches_feature("anything"));
    }

    #[test]
    fn feature_match_is_case_insensitive() {
        let f = ParameterFilter::only_features(["Identity".to_string()]);
        assert!(f.matches_feature("identity"));
        assert!(f.matches_feature("IDENTITY"));
    }

    #[test]
    fn filter_round_trips() {
        let f = ParameterFilter {
            features: Some(["identity".to_string()].into()),
            devices: vec![DeviceSelector::WholeCollection(DeviceCollection::Kbus)],
            definition_ids: Some([42].into()),
        };
        let json = serde_json::to_string(&f).unwrap();
        let back: ParameterFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
