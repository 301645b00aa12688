//! Ready-made providers for tests and examples: fixed value tables, gated
//! (manually released) calls for cancellation tests, and an in-memory file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

use devparam_domain::{
    DeviceSelector, FileId, FileInfoResponse, FileReadResponse, ParameterInstanceId,
    ParameterSelector, ParameterValue, Response, SetParameterResponse, StatusCode,
};

use crate::dismiss::DismissWatch;
use crate::provider::{
    DeviceDescriptionProvider, FileProvider, MethodInvocationResponse, ModelProvider,
    ParameterProvider, SetRequest, ValueResponse,
};

/// Serves a fixed value per definition id; records every write it accepts.
pub struct StaticParameterProvider {
    name: String,
    selectors: Vec<ParameterSelector>,
    values: Mutex<HashMap<u32, ParameterValue>>,
    method_results: Mutex<HashMap<u32, Vec<ParameterValue>>>,
    sets: Mutex<Vec<SetRequest>>,
    set_failure: Option<SetParameterResponse>,
    upload_target: Mutex<Option<std::sync::Arc<dyn FileProvider>>>,
    removed_upload_ids: Mutex<Vec<FileId>>,
}

impl StaticParameterProvider {
    pub fn new(name: impl Into<String>, selectors: Vec<ParameterSelector>) -> Self {
        StaticParameterProvider {
            name: name.into(),
            selectors,
            values: Mutex::new(HashMap::new()),
            method_results: Mutex::new(HashMap::new()),
            sets: Mutex::new(Vec::new()),
            set_failure: None,
            upload_target: Mutex::new(None),
            removed_upload_ids: Mutex::new(Vec::new()),
        }
    }

    /// Serve upload ids through this file target.
    pub fn with_upload_target(self, target: std::sync::Arc<dyn FileProvider>) -> Self {
        *self.upload_target.lock().unwrap() = Some(target);
        self
    }

    /// Upload ids the service reported as lapsed or removed.
    pub fn removed_upload_ids(&self) -> Vec<FileId> {
        self.removed_upload_ids.lock().unwrap().clone()
    }

    pub fn with_value(self, definition_id: u32, value: ParameterValue) -> Self {
        self.values.lock().unwrap().insert(definition_id, value);
        self
    }

    pub fn with_method_result(self, definition_id: u32, out_args: Vec<ParameterValue>) -> Self {
        self.method_results
            .lock()
            .unwrap()
            .insert(definition_id, out_args);
        self
    }

    /// Every accepted write will answer with this response instead of
    /// `SUCCESS`.
    pub fn with_set_failure(mut self, response: SetParameterResponse) -> Self {
        self.set_failure = Some(response);
        self
    }

    /// The writes this provider has been asked to perform, in arrival order.
    pub fn recorded_sets(&self) -> Vec<SetRequest> {
        self.sets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParameterProvider for StaticParameterProvider {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn get_provided_parameters(&self) -> Vec<ParameterSelector> {
        self.selectors.clone()
    }

    async fn get_parameter_values(
        &self,
        ids: Vec<ParameterInstanceId>,
        _watch: DismissWatch,
    ) -> Result<Vec<ValueResponse>> {
        let values = self.values.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| match values.get(&id.parameter_id) {
                Some(value) => ValueResponse::ok(value.clone()),
                None => ValueResponse::status(StatusCode::ParameterValueUnavailable),
            })
            .collect())
    }

    async fn set_parameter_values(
        &self,
        requests: Vec<SetRequest>,
        _watch: DismissWatch,
    ) -> Result<Vec<SetParameterResponse>> {
        let count = requests.len();
        self.sets.lock().unwrap().extend(requests.iter().cloned());
        let mut values = self.values.lock().unwrap();
        for request in &requests {
            if self.set_failure.is_none() {
                values.insert(request.definition_id, request.value.clone());
            }
        }
        let response = self
            .set_failure
            .clone()
            .unwrap_or_else(|| SetParameterResponse::status(StatusCode::Success));
        Ok(vec![response; count])
    }

    async fn invoke_method(
        &self,
        id: ParameterInstanceId,
        _in_args: Vec<ParameterValue>,
        _watch: DismissWatch,
    ) -> Result<MethodInvocationResponse> {
        match self.method_results.lock().unwrap().get(&id.parameter_id) {
            Some(out_args) => Ok(MethodInvocationResponse::ok(out_args.clone())),
            None => Ok(MethodInvocationResponse::status(
                StatusCode::ParameterValueUnavailable,
            )),
        }
    }

    async fn create_parameter_upload_id(
        &self,
        _context: ParameterInstanceId,
    ) -> Result<std::sync::Arc<dyn FileProvider>> {
        match self.upload_target.lock().unwrap().clone() {
            Some(target) => Ok(target),
            None => anyhow::bail!("provider does not support upload ids"),
        }
    }

    async fn remove_parameter_upload_id(
        &self,
        file_id: FileId,
        _context: ParameterInstanceId,
    ) -> Result<()> {
        self.removed_upload_ids.lock().unwrap().push(file_id);
        Ok(())
    }
}

/// Holds every read until [`release`](GatedParameterProvider::release) —
/// the building block of the dismissal tests.
pub struct GatedParameterProvider {
    selectors: Vec<ParameterSelector>,
    value: ParameterValue,
    released: AtomicBool,
    gate: Notify,
    last_watch: Mutex<Option<DismissWatch>>,
}

impl GatedParameterProvider {
    pub fn new(selectors: Vec<ParameterSelector>, value: ParameterValue) -> Self {
        GatedParameterProvider {
            selectors,
            value,
            released: AtomicBool::new(false),
            gate: Notify::new(),
            last_watch: Mutex::new(None),
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.gate.notify_waiters();
    }

    /// The dismiss watch observed by the most recent call, if any.
    pub fn observed_watch(&self) -> Option<DismissWatch> {
        self.last_watch.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParameterProvider for GatedParameterProvider {
    fn display_name(&self) -> String {
        "gated".to_string()
    }

    fn get_provided_parameters(&self) -> Vec<ParameterSelector> {
        self.selectors.clone()
    }

    async fn get_parameter_values(
        &self,
        ids: Vec<ParameterInstanceId>,
        watch: DismissWatch,
    ) -> Result<Vec<ValueResponse>> {
        *self.last_watch.lock().unwrap() = Some(watch);
        loop {
            let notified = self.gate.notified();
            if self.released.load(Ordering::Acquire) {
                break;
            }
            notified.await;
        }
        Ok(ids.iter().map(|_| ValueResponse::ok(self.value.clone())).collect())
    }

    async fn set_parameter_values(
        &self,
        requests: Vec<SetRequest>,
        _watch: DismissWatch,
    ) -> Result<Vec<SetParameterResponse>> {
        Ok(vec![
            SetParameterResponse::status(StatusCode::Success);
            requests.len()
        ])
    }

    async fn invoke_method(
        &self,
        _id: ParameterInstanceId,
        _in_args: Vec<ParameterValue>,
        _watch: DismissWatch,
    ) -> Result<MethodInvocationResponse> {
        Ok(MethodInvocationResponse::status(StatusCode::NotImplemented))
    }
}

/// Returns one fixed model document.
pub struct StaticModelProvider {
    document: String,
}

impl StaticModelProvider {
    pub fn new(document: impl Into<String>) -> Self {
        StaticModelProvider {
            document: document.into(),
        }
    }
}

#[async_trait]
impl ModelProvider for StaticModelProvider {
    async fn get_model_information(&self) -> Result<String> {
        Ok(self.document.clone())
    }
}

/// Serves description documents from a `(order number, firmware)` table.
pub struct StaticDescriptionProvider {
    selectors: Vec<DeviceSelector>,
    documents: Mutex<HashMap<(String, String), String>>,
}

impl StaticDescriptionProvider {
    pub fn new(selectors: Vec<DeviceSelector>) -> Self {
        StaticDescriptionProvider {
            selectors,
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_document(
        self,
        order_number: impl Into<String>,
        firmware_version: impl Into<String>,
        document: impl Into<String>,
    ) -> Self {
        self.documents.lock().unwrap().insert(
            (order_number.into(), firmware_version.into()),
            document.into(),
        );
        self
    }
}

#[async_trait]
impl DeviceDescriptionProvider for StaticDescriptionProvider {
    fn get_provided_devices(&self) -> Vec<DeviceSelector> {
        self.selectors.clone()
    }

    async fn get_device_information(
        &self,
        order_number: &str,
        firmware_version: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&(order_number.to_string(), firmware_version.to_string()))
            .cloned())
    }
}

/// A growable in-memory file.
pub struct InMemoryFileProvider {
    data: Mutex<Vec<u8>>,
    capacity: Mutex<u64>,
}

impl InMemoryFileProvider {
    pub fn new(initial: Vec<u8>) -> Self {
        let capacity = initial.len() as u64;
        InMemoryFileProvider {
            data: Mutex::new(initial),
            capacity: Mutex::new(capacity),
        }
    }
}

#[async_trait]
impl FileProvider for InMemoryFileProvider {
    async fn read(
        &self,
        offset: u64,
        length: usize,
        _watch: DismissWatch,
    ) -> Result<FileReadResponse> {
        let data = self.data.lock().unwrap();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length).min(data.len());
        Ok(FileReadResponse {
            status: StatusCode::Success,
            data: data[start..end].to_vec(),
            ..FileReadResponse::default()
        })
    }

    async fn write(&self, offset: u64, incoming: Vec<u8>, _watch: DismissWatch) -> Result<Response> {
        let mut data = self.data.lock().unwrap();
        let end = offset as usize + incoming.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(&incoming);
        Ok(Response::ok())
    }

    async fn get_file_info(&self) -> Result<FileInfoResponse> {
        Ok(FileInfoResponse {
            status: StatusCode::Success,
            size: self.data.lock().unwrap().len() as u64,
            capacity: *self.capacity.lock().unwrap(),
            ..FileInfoResponse::default()
        })
    }

    async fn create(&self, capacity: u64) -> Result<Response> {
        *self.capacity.lock().unwrap() = capacity;
        self.data.lock().unwrap().clear();
        Ok(Response::ok())
    }
}
