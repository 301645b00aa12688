//! The registered-device table and the per-device parameter instance graph.
//! Instances borrow their definition from the compiled model via arena index;
//! the model always outlives the instance graph because both are owned by the
//! same state and swapped together under the param mutex.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use devparam_domain::{
    DeviceCollection, DeviceId, DeviceInfo, DeviceSelector, InstantiationEntry,
    ParameterInstanceId, ParameterValue,
};
use devparam_model::{
    compile_device_description, ClassIdx, DefIdx, DeviceDescription, DeviceModel,
    EffectiveDefinition, FeatureIdx, OverridePatch,
};
use devparam_provider::{
    resolve_parameter_provider, DeviceDescriptionProvider, DeviceExtension,
    DeviceExtensionProvider, ModelProvider, ParameterProvider, ParameterProviderData,
    ProviderCollection, ProviderId,
};

/// Runtime state of one parameter on one device. Deployments hold tens of
/// thousands of these, so the struct stays small: indices and handles only.
#[derive(Debug, Clone)]
pub struct ParameterInstance {
    pub id: ParameterInstanceId,
    pub def: DefIdx,
    pub provider: Option<ProviderId>,
    pub fixed_value: Option<ParameterValue>,
    /// Report `STATUS_VALUE_UNAVAILABLE` instead of `PARAMETER_NOT_PROVIDED`
    /// when no provider is linked (runtime-created class instances).
    pub status_unavailable_if_not_provided: bool,
}

#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub order_number: String,
    pub firmware_version: String,
    /// Source document, kept so the instance graph can be rebuilt against a
    /// recompiled model.
    pub raw_description: Option<String>,
    pub description: DeviceDescription,
    /// Feature names claimed by description and extensions, canonical case.
    pub claimed_features: Vec<String>,
    /// Claimed features that resolve in the current model.
    pub features: Vec<FeatureIdx>,
    /// Runtime-created instances of dynamic classes, keyed by lowercase
    /// class name. Survives model swaps while the class still exists.
    pub dynamic_instantiations: HashMap<String, Vec<InstantiationEntry>>,
    pub instances: BTreeMap<(u32, u16), ParameterInstance>,
}

impl Device {
    pub fn new(id: DeviceId, order_number: String, firmware_version: String) -> Self {
        Device {
            id,
            order_number,
            firmware_version,
            raw_description: None,
            description: DeviceDescription::default(),
            claimed_features: Vec::new(),
            features: Vec::new(),
            dynamic_instantiations: HashMap::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            order_number: self.order_number.clone(),
            firmware_version: self.firmware_version.clone(),
            features: self.claimed_features.clone(),
        }
    }

    pub fn instance(&self, parameter_id: u32, instance_id: u16) -> Option<&ParameterInstance> {
        self.instances.get(&(parameter_id, instance_id))
    }

    pub fn override_patch(&self, definition_id: u32) -> Option<&OverridePatch> {
        self.description.overrides.get(&definition_id)
    }

    /// The definition as this device sees it.
    pub fn effective<'a>(&'a self, model: &'a DeviceModel, def: DefIdx) -> EffectiveDefinition<'a> {
        let base = model.definition(def);
        EffectiveDefinition {
            base,
            patch: self.description.overrides.get(&base.id),
        }
    }

    /// Recompile the stored description and rebuild every instance. Called on
    /// registration and after every model swap.
    pub fn rebuild(&mut self, model: &DeviceModel, extensions: &[DeviceExtension]) {
        self.description = match self.raw_description.as_deref() {
            Some(doc) => {
                match compile_device_description(model, doc, &self.order_number) {
                    Ok((description, _diagnostics)) => description,
                    Err(error) => {
                        debug!(device = %self.id, %error, "device description rejected");
                        DeviceDescription::default()
                    }
                }
            }
            None => DeviceDescription::default(),
        };

        let mut claimed: Vec<String> = self.description.features.clone();
        for extension in extensions {
            if extension.selector.matches(self.id) {
                for feature in &extension.features {
                    if !claimed.iter().any(|f| f.eq_ignore_ascii_case(feature)) {
                        claimed.push(feature.clone());
                    }
                }
            }
        }
        self.claimed_features = claimed;
        self.features = self
            .claimed_features
            .iter()
            .filter_map(|name| model.find_feature(name))
            .collect();

        // Drop runtime instantiations whose class vanished from the model.
        self.dynamic_instantiations
            .retain(|class, _| model.find_class(class).is_some());

        self.rebuild_instances(model);
    }

    fn rebuild_instances(&mut self, model: &DeviceModel) {
        let device_id = self.id;
        let fixed: HashMap<u32, &ParameterValue> = self
            .description
            .parameter_values
            .iter()
            .map(|(id, value)| (*id, value))
            .collect();

        let mut built: Vec<ParameterInstance> = Vec::new();
        let mut classes: Vec<ClassIdx> = Vec::new();
        for feature_idx in &self.features {
            let feature = model.feature(*feature_idx);
            for def_idx in &feature.parameters {
                let def = model.definition(*def_idx);
                built.push(ParameterInstance {
                    id: ParameterInstanceId::new(def.id, 0, device_id),
                    def: *def_idx,
                    provider: None,
                    fixed_value: fixed.get(&def.id).map(|v| (*v).clone()),
                    status_unavailable_if_not_provided: false,
                });
            }
            for class_idx in &feature.classes {
                if !classes.contains(class_idx) {
                    classes.push(*class_idx);
                }
            }
        }

        let class_instances =
            |built: &mut Vec<ParameterInstance>,
             class_idx: ClassIdx,
             instance_id: u16,
             values: &HashMap<u32, ParameterValue>,
             runtime_created: bool| {
                for def_idx in &model.class(class_idx).parameters {
                    let def = model.definition(*def_idx);
                    built.push(ParameterInstance {
                        id: ParameterInstanceId::new(def.id, instance_id, device_id),
                        def: *def_idx,
                        provider: None,
                        fixed_value: values.get(&def.id).cloned(),
                        status_unavailable_if_not_provided: runtime_created,
                    });
                }
            };

        for class_idx in classes {
            let class = model.class(class_idx);

            // Description-table instances.
            for instantiation in &self.description.instantiations {
                if !instantiation.class.eq_ignore_ascii_case(&class.name) {
                    continue;
                }
                for instance in &instantiation.instances {
                    let values: HashMap<u32, ParameterValue> =
                        instance.values.iter().cloned().collect();
                    class_instances(&mut built, class_idx, instance.id, &values, false);
                }
            }

            // Runtime instances of dynamic classes.
            if !class.dynamic {
                continue;
            }
            let Some(entries) = self.dynamic_instantiations.get(&class.name.to_ascii_lowercase())
            else {
                continue;
            };
            for entry in entries {
                let values: HashMap<u32, ParameterValue> = entry
                    .parameter_values
                    .iter()
                    .filter_map(|pv| {
                        let def_idx = class_member(model, class_idx, pv.id)?;
                        let def = model.definition(def_idx);
                        pv.value.promote(def.value_type, def.rank).ok().map(|v| (pv.id, v))
                    })
                    .collect();
                class_instances(&mut built, class_idx, entry.id, &values, true);
            }
        }

        self.instances.clear();
        for instance in built {
            self.instances
                .entry((instance.id.parameter_id, instance.id.instance_id))
                .or_insert(instance);
        }
    }

    /// Apply a successful instantiation write: replace the runtime instance
    /// set of each named class, then rebuild.
    pub fn apply_instantiations(
        &mut self,
        model: &DeviceModel,
        changes: &[devparam_domain::ClassInstantiation],
    ) {
        for change in changes {
            self.dynamic_instantiations
                .insert(change.class.to_ascii_lowercase(), change.instances.clone());
        }
        self.rebuild_instances(model);
    }
}

fn class_member(model: &DeviceModel, class_idx: ClassIdx, definition_id: u32) -> Option<DefIdx> {
    model
        .class(class_idx)
        .parameters
        .iter()
        .copied()
        .find(|idx| model.definition(*idx).id == definition_id)
}

// ── Shared core state ────────────────────────────────────────────────────────

/// Everything guarded by the internal param mutex: the compiled model, the
/// device table, and the non-file provider registries.
pub struct CoreState {
    pub model: Arc<DeviceModel>,
    pub devices: Vec<BTreeMap<u16, Device>>,
    pub parameter_providers: ProviderCollection<dyn ParameterProvider, ParameterProviderData>,
    pub model_providers: ProviderCollection<dyn ModelProvider, ()>,
    pub description_providers:
        ProviderCollection<dyn DeviceDescriptionProvider, Vec<DeviceSelector>>,
    pub extension_providers: ProviderCollection<dyn DeviceExtensionProvider, Vec<DeviceExtension>>,
}

impl CoreState {
    pub fn new() -> Self {
        CoreState {
            model: Arc::new(DeviceModel::empty()),
            devices: DeviceCollection::ALL.iter().map(|_| BTreeMap::new()).collect(),
            parameter_providers: ProviderCollection::new(),
            model_providers: ProviderCollection::new(),
            description_providers: ProviderCollection::new(),
            extension_providers: ProviderCollection::new(),
        }
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices[id.collection.id() as usize].get(&id.slot)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices[id.collection.id() as usize].get_mut(&id.slot)
    }

    pub fn insert_device(&mut self, device: Device) {
        self.devices[device.id.collection.id() as usize].insert(device.id.slot, device);
    }

    pub fn remove_device(&mut self, id: DeviceId) -> Option<Device> {
        self.devices[id.collection.id() as usize].remove(&id.slot)
    }

    pub fn collection(&self, collection: DeviceCollection) -> &BTreeMap<u16, Device> {
        &self.devices[collection.id() as usize]
    }

    pub fn all_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().flat_map(|c| c.values())
    }

    pub fn extensions(&self) -> Vec<DeviceExtension> {
        self.extension_providers
            .iter()
            .flat_map(|e| e.data.iter().cloned())
            .collect()
    }

    /// Recompute the provider link of every instance. Run after any provider
    /// or device change; resolution is deterministic, so re-registration
    /// restores the previous outcome.
    pub fn relink_all(&mut self) {
        let model = self.model.clone();
        let mut feature_cache: HashMap<u32, Option<String>> = HashMap::new();
        let mut claimed: HashSet<(ProviderId, DeviceId)> = HashSet::new();
        for collection in &mut self.devices {
            for device in collection.values_mut() {
                for instance in device.instances.values_mut() {
                    let def = model.definition(instance.def);
                    let feature = feature_cache
                        .entry(def.id)
                        .or_insert_with(|| {
                            model.feature_name_of(instance.def).map(|s| s.to_string())
                        })
                        .clone();
                    instance.provider = resolve_parameter_provider(
                        &self.parameter_providers,
                        def.id,
                        feature.as_deref(),
                        device.id,
                    );
                    if let Some(provider) = instance.provider {
                        claimed.insert((provider, device.id));
                    }
                }
            }
        }
        debug!(links = claimed.len(), "instance graph relinked");
    }

    /// Rebuild every device against the current model and relink.
    pub fn rebuild_all_devices(&mut self) {
        let model = self.model.clone();
        let extensions = self.extensions();
        for collection in &mut self.devices {
            for device in collection.values_mut() {
                device.rebuild(&model, &extensions);
            }
        }
        self.relink_all();
    }
}

impl Default for CoreState {
    fn default() -> Self {
        CoreState::new()
    }
}
