//! The permission filter: a decorator over the service that fetches the
//! user's permission set once per call and turns it into either a bulk-query
//! filter or per-instance `UNAUTHORIZED` slots. `root` (and `admin` when the
//! `admin-bypass` feature is on) skip every check.

use std::collections::BTreeMap;
use std::sync::Arc;

use devparam_domain::{
    DeviceCollectionResponse, DeviceId, DeviceResponse, EnumDefinitionResponse, FeatureListResponse,
    FeatureResponse, FileId, FileIdResponse, FileInfoResponse, FileReadResponse,
    MethodInvocationNamedResponse, MonitoringListId, MonitoringListResponse,
    MonitoringListValuesResponse, MonitoringListsResponse, ParameterFilter, ParameterInstanceId,
    ParameterInstancePath, ParameterResponse, ParameterResponseListResponse, ParameterValue,
    PermissionType, Response, SetParameterResponse, StatusCode, UserPermissions, ValuePathRequest,
    ValueRequest,
};

use crate::future::{resolved_future, ServiceFuture};
use crate::permissions::is_bypass_user;
use crate::service::ParameterService;

/// The front end as seen by one authenticated user.
pub struct Authorized {
    service: Arc<ParameterService>,
    user_name: String,
}

impl ParameterService {
    pub fn authorized(self: &Arc<Self>, user_name: impl Into<String>) -> Authorized {
        Authorized {
            service: self.clone(),
            user_name: user_name.into(),
        }
    }
}

impl Authorized {
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    fn fetch_permissions(&self) -> UserPermissions {
        self.service.permissions.get_user_permissions(&self.user_name)
    }

    fn is_bypass(&self) -> bool {
        is_bypass_user(&self.user_name)
    }

    // ── Value and method operations ────────────────────────────────────────

    pub fn get_parameters(
        &self,
        ids: Vec<ParameterInstanceId>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.service
            .get_parameters_impl(ids, Some(self.fetch_permissions()))
    }

    pub fn get_parameters_by_path(
        &self,
        paths: Vec<ParameterInstancePath>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.service
            .get_parameters_by_path_impl(paths, Some(self.fetch_permissions()))
    }

    pub fn get_parameter_definitions(
        &self,
        ids: Vec<ParameterInstanceId>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.service.get_parameter_definitions(ids)
    }

    pub fn get_parameter_definitions_by_path(
        &self,
        paths: Vec<ParameterInstancePath>,
    ) -> ServiceFuture<Vec<ParameterResponse>> {
        self.service.get_parameter_definitions_by_path(paths)
    }

    pub fn set_parameter_values(
        &self,
        requests: Vec<ValueRequest>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.service
            .set_parameter_values_impl(requests, Some(self.fetch_permissions()))
    }

    pub fn set_parameter_values_by_path(
        &self,
        requests: Vec<ValuePathRequest>,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.service.set_parameter_values_by_path_impl(
            requests,
            None,
            Some(self.fetch_permissions()),
        )
    }

    pub fn set_parameter_values_by_path_connection_aware(
        &self,
        requests: Vec<ValuePathRequest>,
        defer_wda_web_connection_changes: bool,
    ) -> ServiceFuture<Vec<SetParameterResponse>> {
        self.service.set_parameter_values_by_path_impl(
            requests,
            Some(defer_wda_web_connection_changes),
            Some(self.fetch_permissions()),
        )
    }

    pub fn invoke_method(
        &self,
        method_id: ParameterInstanceId,
        in_args: BTreeMap<String, ParameterValue>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        self.service
            .invoke_method_impl(method_id, in_args, Some(self.fetch_permissions()))
    }

    pub fn invoke_method_by_path(
        &self,
        method_path: ParameterInstancePath,
        in_args: BTreeMap<String, ParameterValue>,
    ) -> ServiceFuture<MethodInvocationNamedResponse> {
        self.service.invoke_method_by_path_impl(
            method_path,
            in_args,
            Some(self.fetch_permissions()),
        )
    }

    // ── Bulk queries ───────────────────────────────────────────────────────

    fn filtered_bulk(
        &self,
        filter: ParameterFilter,
    ) -> Result<ParameterFilter, ParameterResponseListResponse> {
        if self.is_bypass() {
            return Ok(filter);
        }
        let permissions = self.fetch_permissions();
        if permissions.read_permissions.is_empty() {
            // Nothing readable: an empty, successful response.
            return Err(ParameterResponseListResponse::status(StatusCode::Success));
        }
        Ok(filter.and_merge(ParameterFilter::only_features(
            permissions.read_permissions.iter().cloned(),
        )))
    }

    pub fn get_all_parameters(
        &self,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        match self.filtered_bulk(filter) {
            Ok(filter) => self
                .service
                .get_all_parameters(filter, paging_offset, paging_limit),
            Err(response) => resolved_future(response),
        }
    }

    pub fn get_all_parameter_definitions(
        &self,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        match self.filtered_bulk(filter) {
            Ok(filter) => {
                self.service
                    .get_all_parameter_definitions(filter, paging_offset, paging_limit)
            }
            Err(response) => resolved_future(response),
        }
    }

    pub fn get_all_method_definitions(
        &self,
        filter: ParameterFilter,
        paging_offset: usize,
        paging_limit: usize,
    ) -> ServiceFuture<ParameterResponseListResponse> {
        match self.filtered_bulk(filter) {
            Ok(filter) => {
                self.service
                    .get_all_method_definitions(filter, paging_offset, paging_limit)
            }
            Err(response) => resolved_future(response),
        }
    }

    // ── Devices and model introspection (read-open) ────────────────────────

    pub fn get_device(&self, device: DeviceId) -> ServiceFuture<DeviceResponse> {
        self.service.get_device(device)
    }

    pub fn get_all_devices(&self) -> ServiceFuture<DeviceCollectionResponse> {
        self.service.get_all_devices()
    }

    pub fn get_subdevices(&self, device_collection_id: u8) -> ServiceFuture<DeviceCollectionResponse> {
        self.service.get_subdevices(device_collection_id)
    }

    pub fn get_subdevices_by_collection_name(
        &self,
        name: &str,
    ) -> ServiceFuture<DeviceCollectionResponse> {
        self.service.get_subdevices_by_collection_name(name)
    }

    pub fn get_features(&self, device_paths: Vec<String>) -> ServiceFuture<Vec<FeatureListResponse>> {
        self.service.get_features(device_paths)
    }

    pub fn get_feature_definition(
        &self,
        device_path: &str,
        feature_name: &str,
    ) -> ServiceFuture<FeatureResponse> {
        self.service.get_feature_definition(device_path, feature_name)
    }

    pub fn get_enum_definition(&self, enum_name: &str) -> ServiceFuture<EnumDefinitionResponse> {
        self.service.get_enum_definition(enum_name)
    }

    pub fn get_all_enum_definitions(&self) -> ServiceFuture<Vec<EnumDefinitionResponse>> {
        self.service.get_all_enum_definitions()
    }

    // ── Monitoring lists ───────────────────────────────────────────────────

    pub fn create_monitoring_list(
        &self,
        ids: Vec<ParameterInstanceId>,
        timeout_seconds: u16,
    ) -> ServiceFuture<MonitoringListResponse> {
        self.service.create_monitoring_list(ids, timeout_seconds)
    }

    pub fn create_monitoring_list_with_paths(
        &self,
        paths: Vec<ParameterInstancePath>,
        timeout_seconds: u16,
    ) -> ServiceFuture<MonitoringListResponse> {
        self.service
            .create_monitoring_list_with_paths(paths, timeout_seconds)
    }

    /// Monitoring reads apply the per-instance read check like any other
    /// read; unauthorized entries come back marked, the rest are dispatched.
    pub fn get_values_for_monitoring_list(
        &self,
        id: MonitoringListId,
    ) -> ServiceFuture<MonitoringListValuesResponse> {
        self.service
            .get_values_for_monitoring_list_impl(id, Some(self.fetch_permissions()))
    }

    pub fn get_monitoring_list(&self, id: MonitoringListId) -> ServiceFuture<MonitoringListResponse> {
        self.service.get_monitoring_list(id)
    }

    pub fn get_all_monitoring_lists(&self) -> ServiceFuture<MonitoringListsResponse> {
        self.service.get_all_monitoring_lists()
    }

    pub fn delete_monitoring_list(&self, id: MonitoringListId) -> ServiceFuture<Response> {
        self.service.delete_monitoring_list(id)
    }

    // ── File API ───────────────────────────────────────────────────────────

    fn file_permission_denied(&self, id: &FileId, needed: PermissionType) -> Option<String> {
        if self.is_bypass() {
            return None;
        }
        let (feature, _path) = self.service.file_feature_context(id)?;
        let permissions = self.fetch_permissions();
        if permissions.has(&feature, needed) {
            return None;
        }
        let name = self.service.permissions.get_permission_name(&feature, needed);
        Some(format!("Permission \"{name}\" is missing."))
    }

    pub fn file_read(
        &self,
        id: FileId,
        offset: u64,
        length: usize,
    ) -> ServiceFuture<FileReadResponse> {
        if let Some(message) = self.file_permission_denied(&id, PermissionType::Read) {
            return resolved_future(FileReadResponse::with_message(
                StatusCode::Unauthorized,
                message,
            ));
        }
        self.service.file_read(id, offset, length)
    }

    pub fn file_write(&self, id: FileId, offset: u64, data: Vec<u8>) -> ServiceFuture<Response> {
        if let Some(message) = self.file_permission_denied(&id, PermissionType::Write) {
            return resolved_future(Response::with_message(StatusCode::Unauthorized, message));
        }
        self.service.file_write(id, offset, data)
    }

    pub fn file_get_info(&self, id: FileId) -> ServiceFuture<FileInfoResponse> {
        if let Some(message) = self.file_permission_denied(&id, PermissionType::Read) {
            return resolved_future(FileInfoResponse::with_message(
                StatusCode::Unauthorized,
                message,
            ));
        }
        self.service.file_get_info(id)
    }

    pub fn file_create(&self, id: FileId, capacity: u64) -> ServiceFuture<Response> {
        if let Some(message) = self.file_permission_denied(&id, PermissionType::Write) {
            return resolved_future(Response::with_message(StatusCode::Unauthorized, message));
        }
        self.service.file_create(id, capacity)
    }

    pub fn create_parameter_upload_id(
        &self,
        context: ParameterInstancePath,
        timeout_seconds: u16,
    ) -> ServiceFuture<FileIdResponse> {
        if !self.is_bypass() {
            if let Some(feature) = self.service.feature_of_path(&context) {
                let permissions = self.fetch_permissions();
                if !permissions.has(&feature, PermissionType::Write) {
                    let name = self
                        .service
                        .permissions
                        .get_permission_name(&feature, PermissionType::Write);
                    return resolved_future(FileIdResponse::with_message(
                        StatusCode::Unauthorized,
                        format!("Permission \"{name}\" is missing."),
                    ));
                }
            }
        }
        self.service.create_parameter_upload_id(context, timeout_seconds)
    }
}
