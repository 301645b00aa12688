//! The front-end service: resolves requests against the device table under
//! the internal param mutex, plans provider portions, and releases the lock
//! before any provider is awaited. Every public call returns a dismissible
//! [`ServiceFuture`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::warn;

use devparam_domain::{
    DeviceCollection, DeviceCollectionResponse, DeviceFeatureInfo, DeviceId, DeviceResponse,
    EnumDefinitionResponse, EnumInfo, EnumMemberInfo, FeatureInfo, FeatureListResponse,
    FeatureResponse, MethodInvocationNamedResponse, MonitoringListId, MonitoringListResponse,
    MonitoringListValuesResponse, MonitoringListsResponse, ParameterFilter, ParameterInstanceId,
    ParameterInstancePath, ParameterResponse, ParameterResponseListResponse, ParameterValue,
    PermissionType, Response, SetParameterResponse, StatusCode, UserPermissions, ValuePathRequest,
    ValueRequest,
};
use devparam_model::{DefIdx, DeviceModel};
use devparam_provider::DismissWatch;

use crate::changelog::{ChangeEvent, ChangeSink, NullChangeSink};
use crate::clock::{Clock, SystemClock};
use crate::device::CoreState;
use crate::dispatch::{self, StatusSlot};
use crate::files::FileRegistry;
use crate::future::{resolved_future, ServiceFuture, ServicePromise};
use crate::monitoring::MonitoringListCollection;
use crate::permissions::{is_bypass_user, Permissions};
use crate::resolver::{self, ResolvedInstance};

pub struct ParameterService {
    pub(crate) state: Mutex<CoreState>,
    pub(crate) monitoring: Mutex<MonitoringListCollection>,
    pub(crate) files: Mutex<FileRegistry>,
    pub(crate) permissions: Arc<dyn Permissions>,
    pub(crate) change_sink: Arc<dyn ChangeSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) runtime: tokio::runtime::Handle,
}

pub struct ParameterServiceBuilder {
    permissions: Arc<dyn Permissions>,
    change_sink: Arc<dyn ChangeSink>,
    clock: Arc<dyn Clock>,
}

impl ParameterServiceBuilder {
    pub fn change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.change_sink = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Must run inside a tokio runtime; provider calls are driven by it.
    pub fn build(self) -> Arc<ParameterService> {
        Arc::new(ParameterService {
            state: Mutex::new(CoreState::new()),
            monitoring: Mutex::new(MonitoringListCollection::new(self.clock.clone())),
            files: Mutex::new(FileRegistry::new()),
            permissions: self.permissions,
            change_sink: self.change_sink,
            clock: self.clock,
            runtime: tokio::runtime::Handle::current(),
        })
    }
}

impl ParameterService {
    pub fn builder(permissions: Arc<dyn Permissions>) -> ParameterServiceBuilder {
        ParameterServiceBuilder {
            permissions,
            change_sink: Arc::new(NullChangeSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(permissions: Arc<dyn Permissions>) -> Arc<Self> {
        ParameterService::builder(permissions).build()
    }

    pub(crate) fn spawn_dispatch<T: Send + 'static>(
        self: &Arc<Self>,
        watch: DismissWatch,
        work: impl Future<Output = T> + Send + 'static,
    ) -> ServiceFuture<T> {
        let (promise, future) = ServicePromise::pair();
        {
            let watch = watch.clone();
            future.on_dismiss(move || watch.dismiss());
        }
        self.runtime.spawn(async move {
            let value = work.await;
            if !promise.is_dismissed() && !watch.is_dismissed() {
                promise.set_value(value);
            }
        });
        future
    }

    // ── Permission filtering (shared with the authorized wrapper) ──────────

    pub(crate) fn mark_unauthorized<R: StatusSlot>(
        &self,
        state: &CoreState,
        resolved: &[Option<ResolvedInstance>],
        responses: &mut [R],
        permissions: Option<&UserPermissions>,
        permission_type: PermissionType,
    ) {
        let Some(permissions) = permissions else { return };
        if is_bypass_user(&permissions.user_name) {
            return;
        }
        for (position, slot) in resolved.iter().enumerate() {
            let Some(instance) = slot else { continue };
            if responses[position].status().is_determined() {
                continue;
            }
            let Some(feature) = state.model.feature_name_of(instance.def) else {
                continue;
            };
            if !permissions.has(feature, permission_type) {
                let name = self.permissions.get_permission_name(feature, permission_type);
                responses[position].set_status(StatusCode::Unauthorized);
                responses[position]
                    .set_message(Some(format!("Permission \"{name}\" is missing.")));
            }
        }
    }

    // ── Value reads ────────────────────────────────────────────────────────

    pub fn get_parameters(
        self: &Arc<Self>,
        ids: Vec<ParameterInstanceId>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.get_parameters_impl(ids, None)
    }

    pub(crate) fn get_parameters_impl(
        self: &Arc<Self>,
        ids: Vec<ParameterInstanceId>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        let mut responses = vec![ParameterResponse::default(); ids.len()];
        let plan = {
            let state = self.state.lock().unwrap();
            let resolved = collect_ids(&state, &ids, &mut responses);
            self.mark_unauthorized(
                &state,
                &resolved,
                &mut responses,
                permissions.as_ref(),
                PermissionType::Read,
            );
            dispatch::plan_read(&state, &resolved, &mut responses)
        };
        let watch = DismissWatch::new();
        let work = dispatch::execute_read(plan, responses, watch.clone());
        self.spawn_dispatch(watch, work)
    }

    pub fn get_parameters_by_path(
        self: &Arc<Self>,
        paths: Vec<ParameterInstancePath>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.get_parameters_by_path_impl(paths, None)
    }

    pub(crate) fn get_parameters_by_path_impl(
        self: &Arc<Self>,
        paths: Vec<ParameterInstancePath>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        let mut responses = vec![ParameterResponse::default(); paths.len()];
        let plan = {
            let state = self.state.lock().unwrap();
            let resolved = collect_paths(&state, &paths, &mut responses);
            self.mark_unauthorized(
                &state,
                &resolved,
                &mut responses,
                permissions.as_ref(),
                PermissionType::Read,
            );
            dispatch::plan_read(&state, &resolved, &mut responses)
        };
        let watch = DismissWatch::new();
        let work = dispatch::execute_read(plan, responses, watch.clone());
        self.spawn_dispatch(watch, work)
    }

    // ── Definition reads (no provider involvement) ─────────────────────────

    pub fn get_parameter_definitions(
        self: &Arc<Self>,
        ids: Vec<ParameterInstanceId>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        let mut responses = vec![ParameterResponse::default(); ids.len()];
        let state = self.state.lock().unwrap();
        let resolved = collect_ids(&state, &ids, &mut responses);
        fill_definitions(&state, &resolved, &mut responses);
        drop(state);
        resolved_future(responses)
    }

    pub fn get_parameter_definitions_by_path(
        self: &Arc<Self>,
        paths: Vec<ParameterInstancePath>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        let mut responses = vec![ParameterResponse::default(); paths.len()];
        let state = self.state.lock().unwrap();
        let resolved = collect_paths(&state, &paths, &mut responses);
        fill_definitions(&state, &resolved, &mut responses);
        drop(state);
        resolved_future(responses)
    }

    // ── Writes ─────────────────────────────────────────────────────────────

    pub fn set_parameter_values(
        self: &Arc<Self>,
        requests: Vec<ValueRequest>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.set_parameter_values_impl(requests, None)
    }

    pub(crate) fn set_parameter_values_impl(
        self: &Arc<Self>,
        requests: Vec<ValueRequest>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        let (ids, values): (Vec<_>, Vec<_>) =
            requests.into_iter().map(|r| (r.id, r.value)).unzip();
        let resources = ids.iter().map(|id| id.to_string()).collect();
        let mut responses = vec![SetParameterResponse::default(); ids.len()];
        let plan = {
            let state = self.state.lock().unwrap();
            let resolved = collect_ids(&state, &ids, &mut responses);
            self.mark_unauthorized(
                &state,
                &resolved,
                &mut responses,
                permissions.as_ref(),
                PermissionType::Write,
            );
            dispatch::plan_write(&state, &resolved, &values, &mut responses, None)
        };
        self.spawn_write(plan, responses, permissions, resources)
    }

    pub fn set_parameter_values_by_path(
        self: &Arc<Self>,
        requests: Vec<ValuePathRequest>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.set_parameter_values_by_path_impl(requests, None, None)
    }

    pub fn set_parameter_values_by_path_connection_aware(
        self: &Arc<Self>,
        requests: Vec<ValuePathRequest>,
        defer_wda_web_connection_changes: bool,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.set_parameter_values_by_path_impl(
            requests,
            Some(defer_wda_web_connection_changes),
            None,
        )
    }

    pub(crate) fn set_parameter_values_by_path_impl(
        self: &Arc<Self>,
        requests: Vec<ValuePathRequest>,
        defer_connection_changes: Option<bool>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        let (paths, values): (Vec<_>, Vec<_>) =
            requests.into_iter().map(|r| (r.path, r.value)).unzip();
        let resources = paths.iter().map(|p| p.to_string()).collect();
        let mut responses = vec![SetParameterResponse::default(); paths.len()];
        let plan = {
            let state = self.state.lock().unwrap();
            let resolved = collect_paths(&state, &paths, &mut responses);
            self.mark_unauthorized(
                &state,
                &resolved,
                &mut responses,
                permissions.as_ref(),
                PermissionType::Write,
            );
            dispatch::plan_write(
                &state,
                &resolved,
                &values,
                &mut responses,
                defer_connection_changes,
            )
        };
        self.spawn_write(plan, responses, permissions, resources)
    }

    fn spawn_write(
        self: &Arc<Self>,
        plan: dispatch::WritePlan,
        responses: Vec<SetParameterResponse>,
        permissions: Option<UserPermissions>,
        resources: Vec<String>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        let watch = DismissWatch::new();
        let service = self.clone();
        let user = permissions.map(|p| p.user_name);
        let work = {
            let watch = watch.clone();
            async move {
                let (responses, confirmed) =
                    dispatch::execute_write(plan, responses, watch).await;

                if !confirmed.is_empty() {
                    let mut state = service.state.lock().unwrap();
                    let model = state.model.clone();
                    for (device_id, changes) in &confirmed {
                        if let Some(device) = state.device_mut(*device_id) {
                            device.apply_instantiations(&model, changes);
                        }
                    }
                    state.relink_all();
                }

                for (position, response) in responses.iter().enumerate() {
                    if response.status == StatusCode::Success {
                        service.change_sink.record(ChangeEvent::new(
                            user.clone(),
                            resources[position].clone(),
                            "set",
                        ));
                    }
                }
                responses
            }
        };
        self.spawn_dispatch(watch, work)
    }

    // ── Method invocation ──────────────────────────────────────────────────

    pub fn invoke_method(
        self: &Arc<Self>,
        method_id: ParameterInstanceId,
        in_args: BTreeMap<String, ParameterValue>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        let resolved = {
            let state = self.state.lock().unwrap();
            resolver::resolve_id(&state, method_id)
        };
        self.invoke_resolved(resolved, in_args, None, method_id.to_string())
    }

    pub(crate) fn invoke_method_impl(
        self: &Arc<Self>,
        method_id: ParameterInstanceId,
        in_args: BTreeMap<String, ParameterValue>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        let resolved = {
            let state = self.state.lock().unwrap();
            resolver::resolve_id(&state, method_id)
        };
        self.invoke_resolved(resolved, in_args, permissions, method_id.to_string())
    }

    pub fn invoke_method_by_path(
        self: &Arc<Self>,
        method_path: ParameterInstancePath,
        in_args: BTreeMap<String, ParameterValue>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        self.invoke_method_by_path_impl(method_path, in_args, None)
    }

    pub(crate) fn invoke_method_by_path_impl(
        self: &Arc<Self>,
        method_path: ParameterInstancePath,
        in_args: BTreeMap<String, ParameterValue>,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        let resource = method_path.to_string();
        let resolved = {
            let state = self.state.lock().unwrap();
            resolver::resolve_path(&state, &method_path)
        };
        self.invoke_resolved(resolved, in_args, permissions, resource)
    }

    fn invoke_resolved(
        self: &Arc<Self>,
        resolved: Result<ResolvedInstance, StatusCode>,
        in_args: BTreeMap<String, ParameterValue>,
        permissions: Option<UserPermissions>,
        resource: String,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        let instance = match resolved {
            Ok(instance) => instance,
            Err(status) => {
                return resolved_future(MethodInvocationNamedResponse::status(status));
            }
        };

        // Everything below reads the model and provider registry once, under
        // the lock, then lets go before the provider is awaited.
        let prepared = {
            let state = self.state.lock().unwrap();
            let model = state.model.clone();
            let def = model.definition(instance.def);

            if !def.is_method() {
                return resolved_future(MethodInvocationNamedResponse::status(
                    StatusCode::MethodsDoNotHaveValue,
                ));
            }
            let effective = instance
                .patch
                .as_ref()
                .map(|patch| devparam_model::EffectiveDefinition {
                    base: def,
                    patch: Some(patch),
                })
                .unwrap_or_else(|| devparam_model::EffectiveDefinition::unpatched(def));
            if effective.inactive() {
                return resolved_future(MethodInvocationNamedResponse::status(
                    StatusCode::ParameterNotWriteable,
                ));
            }

            if let Some(permissions) = permissions.as_ref() {
                if !is_bypass_user(&permissions.user_name) {
                    if let Some(feature) = model.feature_name_of(instance.def) {
                        if !permissions.has(feature, PermissionType::Write) {
                            let name = self
                                .permissions
                                .get_permission_name(feature, PermissionType::Write);
                            return resolved_future(
                                MethodInvocationNamedResponse::with_message(
                                    StatusCode::Unauthorized,
                                    format!("Permission \"{name}\" is missing."),
                                ),
                            );
                        }
                    }
                }
            }

            let mut positional = Vec::with_capacity(def.in_args.len());
            for arg in &def.in_args {
                let Some(value) = in_args.get(&arg.name) else {
                    return resolved_future(MethodInvocationNamedResponse::with_message(
                        StatusCode::MissingArgument,
                        format!("Argument \"{}\" is missing.", arg.name),
                    ));
                };
                match value.promote(arg.value_type, devparam_domain::Rank::Scalar) {
                    Ok(value) => positional.push(value),
                    Err(error) => {
                        return resolved_future(MethodInvocationNamedResponse::with_message(
                            error.status(),
                            format!("Argument \"{}\": {error}", arg.name),
                        ));
                    }
                }
            }

            let Some(provider_id) = instance.provider else {
                return resolved_future(MethodInvocationNamedResponse::status(
                    StatusCode::ParameterNotProvided,
                ));
            };
            let Some(entry) = state.parameter_providers.get(provider_id) else {
                return resolved_future(MethodInvocationNamedResponse::status(
                    StatusCode::ParameterNotProvided,
                ));
            };

            (
                entry.provider.clone(),
                entry.provider.display_name(),
                entry.data.lane.clone(),
                positional,
                model,
                instance.def,
            )
        };

        let (provider, provider_name, lane, positional, model, def_idx) = prepared;
        let watch = DismissWatch::new();
        let service = self.clone();
        let user = permissions.map(|p| p.user_name);
        let work = {
            let watch = watch.clone();
            async move {
                let _slot = match &lane {
                    Some(lane) => Some(lane.lock().await),
                    None => None,
                };
                let result = provider
                    .invoke_method(instance.id, positional, watch.clone())
                    .await;
                let response =
                    integrate_method_response(&model, def_idx, &provider_name, result);
                if response.status == StatusCode::Success {
                    service
                        .change_sink
                        .record(ChangeEvent::new(user, resource, "invoke"));
                }
                response
            }
        };
        self.spawn_dispatch(watch, work)
    }

    // ── Bulk queries ───────────────────────────────────────────────────────

    pub fn get_all_parameters(
        self: &Arc<Self>,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        self.get_all_impl(filter, paging_offset, paging_limit, BulkKind::Values)
    }

    pub fn get_all_parameter_definitions(
        self: &Arc<Self>,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        self.get_all_impl(filter, paging_offset, paging_limit, BulkKind::Definitions)
    }

    pub fn get_all_method_definitions(
        self: &Arc<Self>,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        self.get_all_impl(filter, paging_offset, paging_limit, BulkKind::Methods)
    }

    fn get_all_impl(
        self: &Arc<Self>,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
        kind: BulkKind,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        if filter.is_empty_match() {
            return resolved_future(ParameterResponseListResponse::status(StatusCode::Success));
        }

        let (responses, plan, total_count) = {
            let state = self.state.lock().unwrap();
            let model = state.model.clone();

            let mut matches: Vec<(ResolvedInstance, String)> = Vec::new();
            for device in state.all_devices() {
                if !filter.matches_device(device.id) {
                    continue;
                }
                for instance in device.instances.values() {
                    let def = model.definition(instance.def);
                    let wanted = match kind {
                        BulkKind::Values => !def.is_method(),
                        BulkKind::Definitions => true,
                        BulkKind::Methods => def.is_method(),
                    };
                    if !wanted || !filter.matches_definition_id(def.id) {
                        continue;
                    }
                    match model.feature_name_of(instance.def) {
                        Some(feature) if !filter.matches_feature(feature) => continue,
                        None if filter.features.is_some() => continue,
                        _ => {}
                    }
                    let path = instance_path(&model, instance.def, instance.id.instance_id);
                    matches.push((
                        ResolvedInstance {
                            id: instance.id,
                            def: instance.def,
                            provider: instance.provider,
                            fixed_value: instance.fixed_value.clone(),
                            status_unavailable_if_not_provided: instance
                                .status_unavailable_if_not_provided,
                            patch: device.override_patch(def.id).cloned(),
                        },
                        path,
                    ));
                }
            }

            let total_count = matches.len() as u64;
            let page: Vec<(ResolvedInstance, String)> = matches
                .into_iter()
                .skip(paging_offset)
                .take(paging_limit)
                .collect();

            let mut responses = Vec::with_capacity(page.len());
            let mut resolved = Vec::with_capacity(page.len());
            for (instance, path) in page {
                let mut response = ParameterResponse::default();
                response.id = Some(instance.id);
                response.path = Some(path);
                if kind != BulkKind::Values {
                    response.status = StatusCode::Success;
                    response.definition =
                        Some(model.definition_info(instance.def, instance.patch.as_ref()));
                }
                responses.push(response);
                resolved.push(Some(instance));
            }

            let plan = match kind {
                BulkKind::Values => Some(dispatch::plan_read(&state, &resolved, &mut responses)),
                _ => None,
            };
            (responses, plan, total_count)
        };

        match plan {
            None => resolved_future(ParameterResponseListResponse {
                status: StatusCode::Success,
                parameters: responses,
                total_count,
                ..ParameterResponseListResponse::default()
            }),
            Some(plan) => {
                let watch = DismissWatch::new();
                let work = {
                    let watch = watch.clone();
                    async move {
                        let parameters = dispatch::execute_read(plan, responses, watch).await;
                        ParameterResponseListResponse {
                            status: StatusCode::Success,
                            parameters,
                            total_count,
                            ..ParameterResponseListResponse::default()
                        }
                    }
                };
                self.spawn_dispatch(watch, work)
            }
        }
    }

    // ── Devices ────────────────────────────────────────────────────────────

    pub fn get_device(self: &Arc<Self>, device: DeviceId) -> ServiceFuture<DeviceResponse> {
        let state = self.state.lock().unwrap();
        let response = match state.device(device) {
            Some(device) => DeviceResponse {
                status: StatusCode::Success,
                device: Some(device.info()),
                ..DeviceResponse::default()
            },
            None => DeviceResponse::status(StatusCode::UnknownDevice),
        };
        drop(state);
        resolved_future(response)
    }

    pub fn get_all_devices(self: &Arc<Self>) -> ServiceFuture<DeviceCollectionResponse> {
        let state = self.state.lock().unwrap();
        let devices = state.all_devices().map(|d| d.info()).collect();
        drop(state);
        resolved_future(DeviceCollectionResponse {
            status: StatusCode::Success,
            devices,
            ..DeviceCollectionResponse::default()
        })
    }

    pub fn get_subdevices(
        self: &Arc<Self>,
        device_collection_id: u8,
    ) -> ServiceFuture<DeviceCollectionResponse> {
        let collection = match DeviceCollection::from_id(device_collection_id) {
            Ok(collection) => collection,
            Err(error) => return resolved_future(DeviceCollectionResponse::status(error.status())),
        };
        self.subdevices_of(collection)
    }

    pub fn get_subdevices_by_collection_name(
        self: &Arc<Self>,
        device_collection_name: &str,
    ) -> ServiceFuture<DeviceCollectionResponse> {
        let collection = match DeviceCollection::from_name(device_collection_name) {
            Ok(collection) => collection,
            Err(error) => return resolved_future(DeviceCollectionResponse::status(error.status())),
        };
        self.subdevices_of(collection)
    }

    fn subdevices_of(
        self: &Arc<Self>,
        collection: DeviceCollection,
    ) -> ServiceFuture<DeviceCollectionResponse> {
        let state = self.state.lock().unwrap();
        let devices = state.collection(collection).values().map(|d| d.info()).collect();
        drop(state);
        resolved_future(DeviceCollectionResponse {
            status: StatusCode::Success,
            devices,
            ..DeviceCollectionResponse::default()
        })
    }

    // ── Model introspection ────────────────────────────────────────────────

    pub fn get_features(
        self: &Arc<Self>,
        device_paths: Vec<String>,
    ) -> ServiceFuture<Vec<FeatureListResponse>> {
        let state = self.state.lock().unwrap();
        let responses = device_paths
            .iter()
            .map(|path| feature_list_for(&state, path))
            .collect();
        drop(state);
        resolved_future(responses)
    }

    pub fn get_features_of_all_devices(
        self: &Arc<Self>,
    ) -> ServiceFuture<Vec<FeatureListResponse>> {
        let state = self.state.lock().unwrap();
        let responses = state
            .all_devices()
            .map(|device| FeatureListResponse {
                status: StatusCode::Success,
                device: Some(device.id),
                features: feature_infos(&state.model, device),
                ..FeatureListResponse::default()
            })
            .collect();
        drop(state);
        resolved_future(responses)
    }

    pub fn get_feature_definition(
        self: &Arc<Self>,
        device_path: &str,
        feature_name: &str,
    ) -> ServiceFuture<FeatureResponse> {
        let state = self.state.lock().unwrap();
        let response = (|| {
            let device_id: DeviceId = match device_path.parse() {
                Ok(id) => id,
                Err(error) => return FeatureResponse::status(error.status()),
            };
            let Some(device) = state.device(device_id) else {
                return FeatureResponse::status(StatusCode::UnknownDevice);
            };
            let Some(feature_idx) = state.model.find_feature(feature_name) else {
                return FeatureResponse::status(StatusCode::UnknownFeatureName);
            };
            if !device.features.contains(&feature_idx) {
                return FeatureResponse::status(StatusCode::FeatureNotAvailable);
            }
            let feature = state.model.feature(feature_idx);
            FeatureResponse {
                status: StatusCode::Success,
                feature: Some(FeatureInfo {
                    name: feature.name.clone(),
                    beta: feature.beta,
                    deprecated: feature.deprecated,
                    parameter_ids: feature
                        .parameters
                        .iter()
                        .map(|idx| state.model.definition(*idx).id)
                        .collect(),
                }),
                ..FeatureResponse::default()
            }
        })();
        drop(state);
        resolved_future(response)
    }

    pub fn get_enum_definition(
        self: &Arc<Self>,
        enum_name: &str,
    ) -> ServiceFuture<EnumDefinitionResponse> {
        let state = self.state.lock().unwrap();
        let response = match state.model.find_enum(enum_name) {
            Some(idx) => EnumDefinitionResponse {
                status: StatusCode::Success,
                enum_definition: Some(enum_info(state.model.enum_definition(idx))),
                ..EnumDefinitionResponse::default()
            },
            None => EnumDefinitionResponse::status(StatusCode::UnknownFeatureName),
        };
        drop(state);
        resolved_future(response)
    }

    pub fn get_all_enum_definitions(
        self: &Arc<Self>,
    ) -> ServiceFuture<Vec<EnumDefinitionResponse>> {
        let state = self.state.lock().unwrap();
        let responses = state
            .model
            .enums
            .iter()
            .map(|definition| EnumDefinitionResponse {
                status: StatusCode::Success,
                enum_definition: Some(enum_info(definition)),
                ..EnumDefinitionResponse::default()
            })
            .collect();
        drop(state);
        resolved_future(responses)
    }

    // ── Monitoring lists ───────────────────────────────────────────────────

    pub fn create_monitoring_list(
        self: &Arc<Self>,
        ids: Vec<ParameterInstanceId>,
        timeout_seconds: u16,
    ) -> ServiceFuture<MonitoringListResponse> {
        let mut template = vec![ParameterResponse::default(); ids.len()];
        let stored: Vec<Option<ParameterInstanceId>> = {
            let state = self.state.lock().unwrap();
            let resolved = collect_ids(&state, &ids, &mut template);
            resolved.iter().map(|r| r.as_ref().map(|i| i.id)).collect()
        };
        self.finish_create_monitoring_list(stored, template, timeout_seconds)
    }

    pub fn create_monitoring_list_with_paths(
        self: &Arc<Self>,
        paths: Vec<ParameterInstancePath>,
        timeout_seconds: u16,
    ) -> ServiceFuture<MonitoringListResponse> {
        let mut template = vec![ParameterResponse::default(); paths.len()];
        let stored: Vec<Option<ParameterInstanceId>> = {
            let state = self.state.lock().unwrap();
            let resolved = collect_paths(&state, &paths, &mut template);
            resolved.iter().map(|r| r.as_ref().map(|i| i.id)).collect()
        };
        self.finish_create_monitoring_list(stored, template, timeout_seconds)
    }

    fn finish_create_monitoring_list(
        self: &Arc<Self>,
        stored: Vec<Option<ParameterInstanceId>>,
        template: Vec<ParameterResponse>,
        timeout_seconds: u16,
    ) -> ServiceFuture<MonitoringListResponse> {
        let ids: Vec<ParameterInstanceId> = stored.into_iter().flatten().collect();
        let mut monitoring = self.monitoring.lock().unwrap();
        let response = match monitoring.create(ids, template, timeout_seconds) {
            Ok(info) => MonitoringListResponse {
                status: StatusCode::Success,
                list: Some(info),
                ..MonitoringListResponse::default()
            },
            Err(status) => MonitoringListResponse::status(status),
        };
        drop(monitoring);
        resolved_future(response)
    }

    pub fn get_values_for_monitoring_list(
        self: &Arc<Self>,
        id: MonitoringListId,
    ) -> ServiceFuture<MonitoringListValuesResponse> {
        self.get_values_for_monitoring_list_impl(id, None)
    }

    pub(crate) fn get_values_for_monitoring_list_impl(
        self: &Arc<Self>,
        id: MonitoringListId,
        permissions: Option<UserPermissions>,
    ) -> ServiceFuture<MonitoringListValuesResponse> {
        let list = {
            let mut monitoring = self.monitoring.lock().unwrap();
            monitoring.take_for_read(id)
        };
        let list = match list {
            Ok(list) => list,
            Err(status) => {
                return resolved_future(MonitoringListValuesResponse::status(status));
            }
        };

        let mut responses = list.template.clone();
        let plan = {
            let state = self.state.lock().unwrap();
            let mut resolved: Vec<Option<ResolvedInstance>> = Vec::with_capacity(responses.len());
            let mut stored = list.ids.iter();
            for response in responses.iter_mut() {
                if response.status.is_determined() {
                    resolved.push(None);
                    continue;
                }
                let Some(instance_id) = stored.next().copied() else {
                    resolved.push(None);
                    continue;
                };
                match resolver::resolve_id(&state, instance_id) {
                    Ok(instance) => resolved.push(Some(instance)),
                    Err(status) => {
                        response.status = status;
                        resolved.push(None);
                    }
                }
            }
            self.mark_unauthorized(
                &state,
                &resolved,
                &mut responses,
                permissions.as_ref(),
                PermissionType::Read,
            );
            dispatch::plan_read(&state, &resolved, &mut responses)
        };

        let watch = DismissWatch::new();
        let work = {
            let watch = watch.clone();
            async move {
                let values = dispatch::execute_read(plan, responses, watch).await;
                MonitoringListValuesResponse {
                    status: StatusCode::Success,
                    values,
                    ..MonitoringListValuesResponse::default()
                }
            }
        };
        self.spawn_dispatch(watch, work)
    }

    pub fn get_monitoring_list(
        self: &Arc<Self>,
        id: MonitoringListId,
    ) -> ServiceFuture<MonitoringListResponse> {
        let mut monitoring = self.monitoring.lock().unwrap();
        let response = match monitoring.info(id) {
            Ok(info) => MonitoringListResponse {
                status: StatusCode::Success,
                list: Some(info),
                ..MonitoringListResponse::default()
            },
            Err(status) => MonitoringListResponse::status(status),
        };
        drop(monitoring);
        resolved_future(response)
    }

    pub fn get_all_monitoring_lists(self: &Arc<Self>) -> ServiceFuture<MonitoringListsResponse> {
        let mut monitoring = self.monitoring.lock().unwrap();
        let lists = monitoring.infos();
        drop(monitoring);
        resolved_future(MonitoringListsResponse {
            status: StatusCode::Success,
            lists,
            ..MonitoringListsResponse::default()
        })
    }

    pub fn delete_monitoring_list(self: &Arc<Self>, id: MonitoringListId) -> ServiceFuture<Response> {
        let mut monitoring = self.monitoring.lock().unwrap();
        let status = monitoring.delete(id);
        drop(monitoring);
        resolved_future(Response::status(status))
    }

    // ── Context helpers for the permission filter ──────────────────────────

    /// Feature owning the parameter behind a path, when resolvable.
    pub(crate) fn feature_of_path(&self, path: &ParameterInstancePath) -> Option<String> {
        let state = self.state.lock().unwrap();
        let instance = resolver::resolve_path(&state, path).ok()?;
        state.model.feature_name_of(instance.def).map(|s| s.to_string())
    }

    /// `(feature, path)` context of a file id, when it maps onto a known
    /// parameter definition.
    pub(crate) fn file_feature_context(
        &self,
        id: &devparam_domain::FileId,
    ) -> Option<(String, String)> {
        let definition_id = {
            let files = self.files.lock().unwrap();
            files.context_of(id)?
        };
        let state = self.state.lock().unwrap();
        let def_idx = state.model.find_definition_by_id(definition_id)?;
        let feature = state.model.feature_name_of(def_idx)?.to_string();
        let path = state.model.definition(def_idx).path.clone();
        Some((feature, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkKind {
    Values,
    Definitions,
    Methods,
}

// ── Free helpers shared across calls ─────────────────────────────────────────

pub(crate) fn collect_ids<R: StatusSlot>(
    state: &CoreState,
    ids: &[ParameterInstanceId],
    responses: &mut [R],
) -> Vec<Option<ResolvedInstance>> {
    ids.iter()
        .enumerate()
        .map(|(position, id)| match resolver::resolve_id(state, *id) {
            Ok(instance) => Some(instance),
            Err(status) => {
                responses[position].set_status(status);
                None
            }
        })
        .collect()
}

pub(crate) fn collect_paths<R: StatusSlot>(
    state: &CoreState,
    paths: &[ParameterInstancePath],
    responses: &mut [R],
) -> Vec<Option<ResolvedInstance>> {
    paths
        .iter()
        .enumerate()
        .map(|(position, path)| match resolver::resolve_path(state, path) {
            Ok(instance) => Some(instance),
            Err(status) => {
                responses[position].set_status(status);
                None
            }
        })
        .collect()
}

fn fill_definitions(
    state: &CoreState,
    resolved: &[Option<ResolvedInstance>],
    responses: &mut [ParameterResponse],
) {
    for (position, slot) in resolved.iter().enumerate() {
        let Some(instance) = slot else { continue };
        if responses[position].status.is_determined() {
            continue;
        }
        responses[position].status = StatusCode::Success;
        responses[position].id = Some(instance.id);
        responses[position].definition = Some(
            state
                .model
                .definition_info(instance.def, instance.patch.as_ref()),
        );
    }
}

/// Full textual path of one instance (class members get their instance
/// segment back).
fn instance_path(model: &DeviceModel, def_idx: DefIdx, instance_id: u16) -> String {
    let def = model.definition(def_idx);
    match def.class {
        Some(class_idx) => {
            let class = model.class(class_idx);
            format!("{}/{}/{}", class.base_path, instance_id, def.path)
        }
        None => def.path.clone(),
    }
}

fn feature_list_for(state: &CoreState, device_path: &str) -> FeatureListResponse {
    let device_id: DeviceId = match device_path.parse::<DeviceId>() {
        Ok(id) => id,
        Err(error) => return FeatureListResponse::status(error.status()),
    };
    match state.device(device_id) {
        Some(device) => FeatureListResponse {
            status: StatusCode::Success,
            device: Some(device_id),
            features: feature_infos(&state.model, device),
            ..FeatureListResponse::default()
        },
        None => FeatureListResponse::status(StatusCode::UnknownDevice),
    }
}

fn feature_infos(model: &DeviceModel, device: &crate::device::Device) -> Vec<DeviceFeatureInfo> {
    device
        .claimed_features
        .iter()
        .map(|name| match model.find_feature(name) {
            Some(idx) => {
                let feature = model.feature(idx);
                DeviceFeatureInfo {
                    name: feature.name.clone(),
                    beta: feature.beta,
                    deprecated: feature.deprecated,
                }
            }
            None => DeviceFeatureInfo {
                name: name.clone(),
                beta: false,
                deprecated: false,
            },
        })
        .collect()
}

fn enum_info(definition: &devparam_model::EnumDefinition) -> EnumInfo {
    EnumInfo {
        name: definition.name.clone(),
        members: definition
            .members
            .iter()
            .map(|m| EnumMemberInfo {
                id: m.id,
                name: m.name.clone(),
            })
            .collect(),
    }
}

fn integrate_method_response(
    model: &DeviceModel,
    def_idx: DefIdx,
    provider_name: &str,
    result: anyhow::Result<devparam_provider::MethodInvocationResponse>,
) -> MethodInvocationNamedResponse {
    let answer = match result {
        Ok(answer) => answer,
        Err(error) => {
            warn!(provider = %provider_name, %error, "provider method call failed");
            return MethodInvocationNamedResponse::status(StatusCode::InternalError);
        }
    };

    let def = model.definition(def_idx);
    let mut response = MethodInvocationNamedResponse::status(answer.status);
    response.domain_specific_status_code = answer.domain_specific_status_code;
    response.message = answer.message;
    if answer.status != StatusCode::Success {
        return response;
    }

    if answer.out_args.len() != def.out_args.len() {
        warn!(
            provider = %provider_name,
            expected = def.out_args.len(),
            got = answer.out_args.len(),
            "provider answered with wrong out-arg count"
        );
        return MethodInvocationNamedResponse::status(StatusCode::InternalError);
    }
    for (arg, value) in def.out_args.iter().zip(answer.out_args.into_iter()) {
        match value.promote(arg.value_type, devparam_domain::Rank::Scalar) {
            Ok(value) => {
                response.out_args.insert(arg.name.clone(), value);
            }
            Err(error) => {
                warn!(provider = %provider_name, %error, "provider out-arg does not match definition");
                return MethodInvocationNamedResponse::status(StatusCode::InternalError);
            }
        }
    }
    response
}
