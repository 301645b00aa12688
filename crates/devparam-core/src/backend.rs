//! Backend surface: provider and device registration, file I/O routing, and
//! lapse checks. Registration order is free — whichever of model providers,
//! description providers, parameter providers, or devices arrives first, the
//! affected slice of the instance graph is recompiled and relinked.

use std::sync::Arc;

use tracing::{debug, info, warn};

use devparam_domain::{
    DeviceCollection, DeviceId, FileId, FileIdResponse, FileInfoResponse, FileReadResponse,
    ParameterInstancePath, RegisterDeviceRequest, RegisterFileProviderResponse, Response,
    StatusCode,
};
use devparam_model::compile_model;
use devparam_provider::{
    CallMode, DeviceDescriptionProvider, DeviceExtensionProvider, DismissWatch, FileProvider,
    ModelProvider, ParameterProvider, ParameterProviderData, SerialLane,
};

use crate::device::Device;
use crate::files::FileLookup;
use crate::future::{resolved_future, ServiceFuture};
use crate::resolver;
use crate::service::ParameterService;

/// One file provider registration; the id is generated when absent.
pub struct RegisterFileProviderRequest {
    pub provider: Arc<dyn FileProvider>,
    pub context_parameter_id: Option<u32>,
}

/// Re-registration binds an id the caller obtained earlier.
pub struct ReregisterFileProviderRequest {
    pub provider: Arc<dyn FileProvider>,
    pub file_id: FileId,
    pub context_parameter_id: Option<u32>,
}

impl ParameterService {
    // ── Devices ────────────────────────────────────────────────────────────

    pub fn register_devices(
        self: &Arc<Self>,
        requests: Vec<RegisterDeviceRequest>,
    ) -> ServiceFuture<Vec<Response>> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(service.register_device(request).await);
            }
            responses
        })
    }

    async fn register_device(self: &Arc<Self>, request: RegisterDeviceRequest) -> Response {
        let description_providers: Vec<Arc<dyn DeviceDescriptionProvider>> = {
            let state = self.state.lock().unwrap();
            if state.device(request.device_id).is_some() {
                return Response::status(StatusCode::DeviceAlreadyExists);
            }
            state
                .description_providers
                .iter()
                .filter(|entry| entry.data.iter().any(|s| s.matches(request.device_id)))
                .map(|entry| entry.provider.clone())
                .collect()
        };

        let mut raw_description = None;
        for provider in description_providers {
            match provider
                .get_device_information(&request.order_number, &request.firmware_version)
                .await
            {
                Ok(Some(document)) => {
                    raw_description = Some(document);
                    break;
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(device = %request.device_id, %error, "description provider failed");
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.device(request.device_id).is_some() {
            return Response::status(StatusCode::DeviceAlreadyExists);
        }
        let mut device = Device::new(
            request.device_id,
            request.order_number,
            request.firmware_version,
        );
        device.raw_description = raw_description;
        let model = state.model.clone();
        let extensions = state.extensions();
        device.rebuild(&model, &extensions);
        info!(
            device = %device.id,
            order_number = %device.order_number,
            instances = device.instances.len(),
            "device registered"
        );
        state.insert_device(device);
        state.relink_all();
        Response::ok()
    }

    pub fn unregister_devices(
        self: &Arc<Self>,
        device_ids: Vec<DeviceId>,
    ) -> ServiceFuture<Vec<Response>> {
        let mut state = self.state.lock().unwrap();
        let responses = device_ids
            .iter()
            .map(|id| match state.remove_device(*id) {
                Some(_) => Response::ok(),
                None => Response::status(StatusCode::UnknownDevice),
            })
            .collect();
        state.relink_all();
        drop(state);
        resolved_future(responses)
    }

    pub fn unregister_all_devices(
        self: &Arc<Self>,
        device_collection: DeviceCollection,
    ) -> ServiceFuture<Response> {
        let mut state = self.state.lock().unwrap();
        let removed = {
            let collection = &mut state.devices[device_collection.id() as usize];
            let removed = collection.len();
            collection.clear();
            removed
        };
        state.relink_all();
        drop(state);
        debug!(collection = %device_collection, removed, "collection cleared");
        resolved_future(Response::ok())
    }

    // ── Parameter providers ────────────────────────────────────────────────

    pub fn register_parameter_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn ParameterProvider>>,
        mode: CallMode,
    ) -> ServiceFuture<Vec<Response>> {
        let mut state = self.state.lock().unwrap();
        let responses = providers
            .into_iter()
            .map(|provider| {
                let selectors = provider.get_provided_parameters();
                let data = ParameterProviderData::new(selectors, mode);
                match state.parameter_providers.add(provider, data) {
                    Some(_) => Response::ok(),
                    None => Response::with_message(
                        StatusCode::InternalError,
                        "provider already registered",
                    ),
                }
            })
            .collect();
        state.relink_all();
        drop(state);
        resolved_future(responses)
    }

    pub fn unregister_parameter_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn ParameterProvider>>,
    ) {
        let mut state = self.state.lock().unwrap();
        for provider in &providers {
            state.parameter_providers.remove_provider(provider);
        }
        state.relink_all();
    }

    // ── Model providers ────────────────────────────────────────────────────

    pub fn register_model_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn ModelProvider>>,
    ) -> ServiceFuture<Vec<Response>> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let count = {
                let mut state = service.state.lock().unwrap();
                for provider in providers.iter() {
                    state.model_providers.add(provider.clone(), ());
                }
                providers.len()
            };
            let status = match service.recompile_model().await {
                Ok(()) => StatusCode::Success,
                Err(error) => {
                    warn!(%error, "model compilation failed");
                    StatusCode::InternalError
                }
            };
            vec![Response::status(status); count]
        })
    }

    pub fn unregister_model_providers(self: &Arc<Self>, providers: Vec<Arc<dyn ModelProvider>>) {
        {
            let mut state = self.state.lock().unwrap();
            for provider in &providers {
                state.model_providers.remove_provider(provider);
            }
        }
        let service = self.clone();
        self.runtime.spawn(async move {
            if let Err(error) = service.recompile_model().await {
                warn!(%error, "model recompilation after unregistration failed");
            }
        });
    }

    /// Fetch every registered model document, compile, and swap the shared
    /// model pointer under the param mutex. The old model stays in place when
    /// compilation fails.
    pub(crate) async fn recompile_model(self: &Arc<Self>) -> anyhow::Result<()> {
        let providers: Vec<Arc<dyn ModelProvider>> = {
            let state = self.state.lock().unwrap();
            state.model_providers.iter().map(|e| e.provider.clone()).collect()
        };
        let mut documents = Vec::with_capacity(providers.len());
        for provider in providers {
            match provider.get_model_information().await {
                Ok(document) => documents.push(document),
                Err(error) => warn!(%error, "model provider failed, skipping its document"),
            }
        }
        let compiled = compile_model(&documents)?;
        for diagnostic in &compiled.diagnostics {
            debug!(scope = %diagnostic.scope, detail = %diagnostic.detail, "compile diagnostic");
        }

        let mut state = self.state.lock().unwrap();
        state.model = compiled.model;
        state.rebuild_all_devices();
        info!(
            features = state.model.features.len(),
            definitions = state.model.definitions.len(),
            "model swapped"
        );
        Ok(())
    }

    // ── Description providers ──────────────────────────────────────────────

    pub fn register_device_description_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn DeviceDescriptionProvider>>,
    ) -> ServiceFuture<Vec<Response>> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let mut responses = Vec::with_capacity(providers.len());
            for provider in providers {
                let selectors = provider.get_provided_devices();

                // Devices registered before their description arrived.
                let pending: Vec<(DeviceId, String, String)> = {
                    let mut state = service.state.lock().unwrap();
                    if state
                        .description_providers
                        .add(provider.clone(), selectors.clone())
                        .is_none()
                    {
                        responses.push(Response::with_message(
                            StatusCode::InternalError,
                            "provider already registered",
                        ));
                        continue;
                    }
                    state
                        .all_devices()
                        .filter(|d| {
                            d.raw_description.is_none()
                                && selectors.iter().any(|s| s.matches(d.id))
                        })
                        .map(|d| (d.id, d.order_number.clone(), d.firmware_version.clone()))
                        .collect()
                };

                for (device_id, order_number, firmware_version) in pending {
                    match provider
                        .get_device_information(&order_number, &firmware_version)
                        .await
                    {
                        Ok(Some(document)) => {
                            let mut state = service.state.lock().unwrap();
                            let model = state.model.clone();
                            let extensions = state.extensions();
                            if let Some(device) = state.device_mut(device_id) {
                                device.raw_description = Some(document);
                                device.rebuild(&model, &extensions);
                            }
                            state.relink_all();
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!(device = %device_id, %error, "description provider failed");
                        }
                    }
                }
                responses.push(Response::ok());
            }
            responses
        })
    }

    pub fn unregister_device_description_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn DeviceDescriptionProvider>>,
    ) {
        let mut state = self.state.lock().unwrap();
        for provider in &providers {
            state.description_providers.remove_provider(provider);
        }
    }

    // ── Extension providers ────────────────────────────────────────────────

    pub fn register_device_extension_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn DeviceExtensionProvider>>,
    ) -> ServiceFuture<Vec<Response>> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let mut responses = Vec::with_capacity(providers.len());
            for provider in providers {
                let extensions = match provider.get_device_extensions().await {
                    Ok(extensions) => extensions,
                    Err(error) => {
                        warn!(%error, "extension provider failed");
                        responses.push(Response::status(StatusCode::ProviderNotOperational));
                        continue;
                    }
                };
                let mut state = service.state.lock().unwrap();
                match state.extension_providers.add(provider, extensions) {
                    Some(_) => {
                        state.rebuild_all_devices();
                        responses.push(Response::ok());
                    }
                    None => responses.push(Response::with_message(
                        StatusCode::InternalError,
                        "provider already registered",
                    )),
                }
            }
            responses
        })
    }

    pub fn unregister_device_extension_providers(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn DeviceExtensionProvider>>,
    ) {
        let mut state = self.state.lock().unwrap();
        for provider in &providers {
            state.extension_providers.remove_provider(provider);
        }
        state.rebuild_all_devices();
    }

    // ── File providers ─────────────────────────────────────────────────────

    pub fn register_file_providers(
        self: &Arc<Self>,
        requests: Vec<RegisterFileProviderRequest>,
        mode: CallMode,
    ) -> ServiceFuture<Vec<RegisterFileProviderResponse>> {
        let mut files = self.files.lock().unwrap();
        let responses = requests
            .into_iter()
            .map(|request| {
                let file_id = files.register(
                    None,
                    request.provider,
                    mode,
                    request.context_parameter_id,
                );
                RegisterFileProviderResponse {
                    status: StatusCode::Success,
                    file_id: Some(file_id),
                    ..RegisterFileProviderResponse::default()
                }
            })
            .collect();
        drop(files);
        resolved_future(responses)
    }

    pub fn reregister_file_providers(
        self: &Arc<Self>,
        requests: Vec<ReregisterFileProviderRequest>,
        mode: CallMode,
    ) -> ServiceFuture<Vec<RegisterFileProviderResponse>> {
        let mut files = self.files.lock().unwrap();
        let responses = requests
            .into_iter()
            .map(|request| {
                let file_id = files.register(
                    Some(request.file_id),
                    request.provider,
                    mode,
                    request.context_parameter_id,
                );
                RegisterFileProviderResponse {
                    status: StatusCode::Success,
                    file_id: Some(file_id),
                    ..RegisterFileProviderResponse::default()
                }
            })
            .collect();
        drop(files);
        resolved_future(responses)
    }

    pub fn unregister_file_providers(self: &Arc<Self>, providers: Vec<Arc<dyn FileProvider>>) {
        let mut files = self.files.lock().unwrap();
        for provider in &providers {
            files.unregister_provider(provider);
        }
    }

    // ── File API ───────────────────────────────────────────────────────────

    /// Expire lapsed upload ids (sparing `heartbeat`), notify creators, and
    /// resolve the id. Must be called outside the files lock.
    async fn lookup_file(self: &Arc<Self>, id: &FileId) -> Option<(FileLookup, Option<SerialLane>)> {
        let (expired, lookup) = {
            let mut files = self.files.lock().unwrap();
            let now = self.clock.now();
            let expired = files.expire_lapsed_except(Some(id), now);
            let lookup = files.lookup(id, now);
            (expired, lookup)
        };
        for (file_id, entry) in expired {
            debug!(file_id = %file_id, "upload id lapsed");
            if let Err(error) = entry
                .creator
                .remove_parameter_upload_id(file_id, entry.context)
                .await
            {
                warn!(%error, "creator rejected upload id removal");
            }
        }
        lookup.map(|l| {
            let lane = match &l {
                FileLookup::Registered(entry) => entry.lane.clone(),
                FileLookup::Upload(_) => None,
            };
            (l, lane)
        })
    }

    pub fn file_read(
        self: &Arc<Self>,
        id: FileId,
        offset: u64,
        length: usize,
    ) -> ServiceFuture<FileReadResponse> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch.clone(), async move {
            let Some((lookup, lane)) = service.lookup_file(&id).await else {
                return FileReadResponse::status(StatusCode::UnknownFileId);
            };
            let provider = match lookup {
                FileLookup::Registered(entry) => entry.provider,
                FileLookup::Upload(upload) => upload.target,
            };
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            match provider.read(offset, length, watch).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "file provider read failed");
                    FileReadResponse::status(StatusCode::InternalError)
                }
            }
        })
    }

    pub fn file_write(
        self: &Arc<Self>,
        id: FileId,
        offset: u64,
        data: Vec<u8>,
    ) -> ServiceFuture<Response> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch.clone(), async move {
            let Some((lookup, lane)) = service.lookup_file(&id).await else {
                return Response::status(StatusCode::UnknownFileId);
            };
            let provider = match lookup {
                FileLookup::Registered(entry) => entry.provider,
                FileLookup::Upload(upload) => upload.target,
            };
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            match provider.write(offset, data, watch).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "file provider write failed");
                    Response::status(StatusCode::InternalError)
                }
            }
        })
    }

    pub fn file_get_info(self: &Arc<Self>, id: FileId) -> ServiceFuture<FileInfoResponse> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let Some((lookup, lane)) = service.lookup_file(&id).await else {
                return FileInfoResponse::status(StatusCode::UnknownFileId);
            };
            let provider = match lookup {
                FileLookup::Registered(entry) => entry.provider,
                FileLookup::Upload(upload) => upload.target,
            };
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            match provider.get_file_info().await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "file provider info failed");
                    FileInfoResponse::status(StatusCode::InternalError)
                }
            }
        })
    }

    pub fn file_create(self: &Arc<Self>, id: FileId, capacity: u64) -> ServiceFuture<Response> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let Some((lookup, lane)) = service.lookup_file(&id).await else {
                return Response::status(StatusCode::UnknownFileId);
            };
            let provider = match lookup {
                FileLookup::Registered(entry) => entry.provider,
                FileLookup::Upload(upload) => upload.target,
            };
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            match provider.create(capacity).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "file provider create failed");
                    Response::status(StatusCode::InternalError)
                }
            }
        })
    }

    pub fn create_parameter_upload_id(
        self: &Arc<Self>,
        context: ParameterInstancePath,
        timeout_seconds: u16,
    ) -> ServiceFuture<FileIdResponse> {
        let service = self.clone();
        let watch = DismissWatch::new();
        self.spawn_dispatch(watch, async move {
            let prepared = {
                let state = service.state.lock().unwrap();
                match resolver::resolve_path(&state, &context) {
                    Err(status) => Err(status),
                    Ok(instance)
                        if state.model.definition(instance.def).value_type
                            != devparam_domain::ValueType::FileId =>
                    {
                        Err(StatusCode::NotAFileId)
                    }
                    Ok(instance) => match instance
                        .provider
                        .and_then(|id| state.parameter_providers.get(id))
                        .map(|entry| entry.provider.clone())
                    {
                        Some(provider) => Ok((instance.id, provider)),
                        None => Err(StatusCode::ParameterNotProvided),
                    },
                }
            };
            let (instance_id, provider) = match prepared {
                Ok(prepared) => prepared,
                Err(status) => return FileIdResponse::status(status),
            };

            match provider.create_parameter_upload_id(instance_id).await {
                Ok(target) => {
                    let mut files = service.files.lock().unwrap();
                    let file_id = files.add_upload(
                        target,
                        instance_id,
                        provider,
                        timeout_seconds,
                        service.clock.now(),
                    );
                    FileIdResponse {
                        status: StatusCode::Success,
                        file_id: Some(file_id),
                        ..FileIdResponse::default()
                    }
                }
                Err(error) => {
                    warn!(%error, "provider rejected upload id creation");
                    FileIdResponse::status(StatusCode::ProviderNotOperational)
                }
            }
        })
    }

    // ── Lapse checks ───────────────────────────────────────────────────────

    /// Run every timeout-based cleanup immediately.
    pub fn trigger_lapse_checks(self: &Arc<Self>) {
        self.monitoring.lock().unwrap().cleanup();
        let expired = {
            let mut files = self.files.lock().unwrap();
            files.expire_lapsed_except(None, self.clock.now())
        };
        if expired.is_empty() {
            return;
        }
        self.runtime.spawn(async move {
            for (file_id, entry) in expired {
                debug!(file_id = %file_id, "upload id lapsed");
                if let Err(error) = entry
                    .creator
                    .remove_parameter_upload_id(file_id, entry.context)
                    .await
                {
                    warn!(%error, "creator rejected upload id removal");
                }
            }
        });
    }
}
