//! The provider traits the core dispatches against. Implementations may fail
//! with any `anyhow::Error`; the dispatcher catches those at the boundary,
//! logs them, and degrades the affected entries to `INTERNAL_ERROR` without
//! contaminating the rest of the batch.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use devparam_domain::{
    DeviceSelector, FileId, FileInfoResponse, FileReadResponse, ParameterInstanceId,
    ParameterSelector, ParameterValue, Response, SetParameterResponse, StatusCode,
};

use crate::dismiss::DismissWatch;

/// One value read answer, positionally matched to the asked id list.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueResponse {
    pub status: StatusCode,
    pub value: Option<ParameterValue>,
    pub domain_specific_status_code: Option<i32>,
    pub message: Option<String>,
}

impl ValueResponse {
    pub fn ok(value: ParameterValue) -> Self {
        ValueResponse {
            status: StatusCode::Success,
            value: Some(value),
            domain_specific_status_code: None,
            message: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        ValueResponse {
            status,
            value: None,
            domain_specific_status_code: None,
            message: None,
        }
    }
}

/// One write entry as handed to a provider: the value has already been
/// validated and typed against the definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub id: ParameterInstanceId,
    pub definition_id: u32,
    pub value: ParameterValue,
}

/// Provider-side method answer; out-args are positional, ordered like the
/// definition's out-arg list. The front end maps them back to names.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInvocationResponse {
    pub status: StatusCode,
    pub out_args: Vec<ParameterValue>,
    pub domain_specific_status_code: Option<i32>,
    pub message: Option<String>,
}

impl MethodInvocationResponse {
    pub fn ok(out_args: Vec<ParameterValue>) -> Self {
        MethodInvocationResponse {
            status: StatusCode::Success,
            out_args,
            domain_specific_status_code: None,
            message: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        MethodInvocationResponse {
            status,
            out_args: Vec::new(),
            domain_specific_status_code: None,
            message: None,
        }
    }
}

#[async_trait]
pub trait ParameterProvider: Send + Sync {
    fn display_name(&self) -> String;

    /// Which parameters this provider serves. Consulted at registration and
    /// whenever the device table changes.
    fn get_provided_parameters(&self) -> Vec<ParameterSelector>;

    async fn get_parameter_values(
        &self,
        ids: Vec<ParameterInstanceId>,
        watch: DismissWatch,
    ) -> Result<Vec<ValueResponse>>;

    async fn set_parameter_values(
        &self,
        requests: Vec<SetRequest>,
        watch: DismissWatch,
    ) -> Result<Vec<SetParameterResponse>>;

    /// Connection-aware variant; the default ignores the defer flag.
    async fn set_parameter_values_connection_aware(
        &self,
        requests: Vec<SetRequest>,
        _defer_connection_changes: bool,
        watch: DismissWatch,
    ) -> Result<Vec<SetParameterResponse>> {
        self.set_parameter_values(requests, watch).await
    }

    async fn invoke_method(
        &self,
        id: ParameterInstanceId,
        in_args: Vec<ParameterValue>,
        watch: DismissWatch,
    ) -> Result<MethodInvocationResponse>;

    /// Hand out a file target serving an upload for `context`. Providers
    /// without file-transfer parameters keep the default.
    async fn create_parameter_upload_id(
        &self,
        context: ParameterInstanceId,
    ) -> Result<Arc<dyn FileProvider>> {
        let _ = context;
        anyhow::bail!("provider does not support upload ids")
    }

    /// The upload id lapsed or was removed; release provider-side state.
    async fn remove_parameter_upload_id(
        &self,
        file_id: FileId,
        context: ParameterInstanceId,
    ) -> Result<()> {
        let _ = (file_id, context);
        Ok(())
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// The provider's model document (JSON, one blob).
    async fn get_model_information(&self) -> Result<String>;
}

#[async_trait]
pub trait DeviceDescriptionProvider: Send + Sync {
    /// Which devices this provider can describe.
    fn get_provided_devices(&self) -> Vec<DeviceSelector>;

    /// The description document for one `(order number, firmware)` pair, or
    /// `None` when the pair is unknown to this provider.
    async fn get_device_information(
        &self,
        order_number: &str,
        firmware_version: &str,
    ) -> Result<Option<String>>;
}

/// Additional features grafted onto matching devices.
#[derive(Debug, Clone)]
pub struct DeviceExtension {
    pub selector: DeviceSelector,
    pub features: Vec<String>,
}

#[async_trait]
pub trait DeviceExtensionProvider: Send + Sync {
    async fn get_device_extensions(&self) -> Result<Vec<DeviceExtension>>;
}

#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn read(
        &self,
        offset: u64,
        length: usize,
        watch: DismissWatch,
    ) -> Result<FileReadResponse>;

    async fn write(&self, offset: u64, data: Vec<u8>, watch: DismissWatch) -> Result<Response>;

    async fn get_file_info(&self) -> Result<FileInfoResponse>;

    async fn create(&self, capacity: u64) -> Result<Response>;
}
