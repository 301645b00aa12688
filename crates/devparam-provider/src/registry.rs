//! Keyed provider collections. Registration order is preserved through the
//! monotonic [`ProviderId`]; resolution ties break toward the earliest
//! registration, which keeps provider selection deterministic.

use std::sync::Arc;

use tokio::sync::Mutex;

use devparam_domain::{DeviceId, ParameterSelector};

/// Stable handle for one registration. Ids are never reused, so a stale
/// handle simply stops resolving after unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(pub u64);

/// Whether the dispatcher may overlap calls to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// One call at a time; a second portion waits for the first to resolve.
    Serialized,
    /// The provider handles its own thread safety.
    Concurrent,
}

/// The single-slot lane a serialized provider's calls run through.
pub type SerialLane = Arc<Mutex<()>>;

#[derive(Clone)]
pub struct ProviderEntry<P: ?Sized, D> {
    pub id: ProviderId,
    pub provider: Arc<P>,
    pub data: D,
}

/// Ordered `(provider, data)` store shared by the five provider registries.
pub struct ProviderCollection<P: ?Sized, D> {
    entries: Vec<ProviderEntry<P, D>>,
    next_id: u64,
}

impl<P: ?Sized, D> Default for ProviderCollection<P, D> {
    fn default() -> Self {
        ProviderCollection {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl<P: ?Sized, D> ProviderCollection<P, D> {
    pub fn new() -> Self {
        ProviderCollection::default()
    }

    /// Register a provider. Returns `None` when this exact provider object is
    /// already registered.
    pub fn add(&mut self, provider: Arc<P>, data: D) -> Option<ProviderId> {
        if self.find_id(&provider).is_some() {
            return None;
        }
        let id = ProviderId(self.next_id);
        self.next_id += 1;
        self.entries.push(ProviderEntry { id, provider, data });
        Some(id)
    }

    pub fn remove(&mut self, id: ProviderId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    /// Identity-based removal (the backend unregisters by object).
    pub fn remove_provider(&mut self, provider: &Arc<P>) -> Option<ProviderId> {
        let id = self.find_id(provider)?;
        self.remove(id);
        Some(id)
    }

    pub fn find_id(&self, provider: &Arc<P>) -> Option<ProviderId> {
        self.entries
            .iter()
            .find(|e| Arc::ptr_eq(&e.provider, provider))
            .map(|e| e.id)
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderEntry<P, D>> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry<P, D>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registration data kept for parameter providers.
pub struct ParameterProviderData {
    pub selectors: Vec<ParameterSelector>,
    pub mode: CallMode,
    /// Present only for serialized providers.
    pub lane: Option<SerialLane>,
}

impl ParameterProviderData {
    pub fn new(selectors: Vec<ParameterSelector>, mode: CallMode) -> Self {
        ParameterProviderData {
            selectors,
            mode,
            lane: match mode {
                CallMode::Serialized => Some(Arc::new(Mutex::new(()))),
                CallMode::Concurrent => None,
            },
        }
    }
}

/// Resolve which provider serves an instance: most specific selector wins,
/// ties go to the first registration.
pub fn resolve_parameter_provider<P: ?Sized>(
    collection: &ProviderCollection<P, ParameterProviderData>,
    definition_id: u32,
    feature_name: Option<&str>,
    device: DeviceId,
) -> Option<ProviderId> {
    let mut best: Option<(u8, ProviderId)> = None;
    for entry in collection.iter() {
        for selector in &entry.data.selectors {
            let matched = match selector {
                ParameterSelector::AllWithDefinitionId(id) => *id == definition_id,
                ParameterSelector::AllOfFeature(name) => feature_name
                    .is_some_and(|f| f.eq_ignore_ascii_case(name)),
                ParameterSelector::AllOfDevice(device_selector) => {
                    device_selector.matches(device)
                }
            };
            if !matched {
                continue;
            }
            let specificity = selector.specificity();
            let better = match best {
                None => true,
                Some((best_spec, best_id)) => {
                    specificity > best_spec || (specificity == best_spec && entry.id < best_id)
                }
            };
            if better {
                best = Some((specificity, entry.id));
            }
        }
    }
    best.map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ParameterProvider, ValueResponse};
    use crate::testing::StaticParameterProvider;
    use devparam_domain::{DeviceCollection, DeviceSelector, ParameterValue};

    fn provider(selectors: Vec<ParameterSelector>) -> Arc<dyn ParameterProvider> {
        Arc::new(StaticParameterProvider::new("test", selectors))
    }

    fn collection_with(
        selector_sets: Vec<Vec<ParameterSelector>>,
    ) -> ProviderCollection<dyn ParameterProvider, ParameterProviderData> {
        let mut collection = ProviderCollection::new();
        for selectors in selector_sets {
            let data = ParameterProviderData::new(selectors.clone(), CallMode::Concurrent);
            collection.add(provider(selectors), data);
        }
        collection
    }

    #[test]
    fn re_registration_of_same_object_is_rejected() {
        let mut collection: ProviderCollection<dyn ParameterProvider, ParameterProviderData> =
            ProviderCollection::new();
        let p = provider(vec![ParameterSelector::AllWithDefinitionId(1)]);
        let data = || ParameterProviderData::new(vec![], CallMode::Concurrent);
        assert!(collection.add(p.clone(), data()).is_some());
        assert!(collection.add(p.clone(), data()).is_none());
        assert!(collection.remove_provider(&p).is_some());
        assert!(collection.add(p, data()).is_some());
    }

    #[test]
    fn definition_id_beats_feature_beats_device() {
        let collection = collection_with(vec![
            vec![ParameterSelector::AllOfDevice(DeviceSelector::Any)],
            vec![ParameterSelector::AllOfFeature("Identity".into())],
            vec![ParameterSelector::AllWithDefinitionId(42)],
        ]);
        let winner = resolve_parameter_provider(
            &collection,
            42,
            Some("Identity"),
            DeviceId::HEADSTATION,
        )
        .unwrap();
        assert_eq!(winner, ProviderId(3));

        let winner = resolve_parameter_provider(
            &collection,
            7,
            Some("Identity"),
            DeviceId::HEADSTATION,
        )
        .unwrap();
        assert_eq!(winner, ProviderId(2));

        let winner =
            resolve_parameter_provider(&collection, 7, None, DeviceId::HEADSTATION).unwrap();
        assert_eq!(winner, ProviderId(1));
    }

    #[test]
    fn equally_specific_ties_go_to_first_registered() {
        let collection = collection_with(vec![
            vec![ParameterSelector::AllWithDefinitionId(42)],
            vec![ParameterSelector::AllWithDefinitionId(42)],
        ]);
        let winner =
            resolve_parameter_provider(&collection, 42, None, DeviceId::HEADSTATION).unwrap();
        assert_eq!(winner, ProviderId(1));
    }

    #[test]
    fn specific_device_beats_collection_scope() {
        let kbus1 = DeviceId::new(DeviceCollection::Kbus, 1);
        let collection = collection_with(vec![
            vec![ParameterSelector::AllOfDevice(DeviceSelector::WholeCollection(
                DeviceCollection::Kbus,
            ))],
            vec![ParameterSelector::AllOfDevice(DeviceSelector::Specific(kbus1))],
        ]);
        let winner = resolve_parameter_provider(&collection, 7, None, kbus1).unwrap();
        assert_eq!(winner, ProviderId(2));
    }

    #[test]
    fn no_match_yields_unprovided() {
        let collection = collection_with(vec![vec![ParameterSelector::AllWithDefinitionId(1)]]);
        assert!(resolve_parameter_provider(&collection, 2, None, DeviceId::HEADSTATION).is_none());
    }

    #[tokio::test]
    async fn static_provider_serves_registered_values() {
        let p = StaticParameterProvider::new(
            "rocket",
            vec![ParameterSelector::AllWithDefinitionId(42)],
        )
        .with_value(42, ParameterValue::Bool(true));
        let responses = p
            .get_parameter_values(
                vec![devparam_domain::ParameterInstanceId::headstation(42)],
                crate::DismissWatch::new(),
            )
            .await
            .unwrap();
        assert_eq!(responses, vec![ValueResponse::ok(ParameterValue::Bool(true))]);
    }
}
