//! Shared domain types of the device parameter service: identifiers, status
//! codes, the tagged value container, filters, and every request/response
//! shape that crosses the service boundary.

pub mod error;
pub mod filter;
pub mod ids;
pub mod permissions;
pub mod requests;
pub mod responses;
pub mod selector;
pub mod status;
pub mod value;

pub use error::DomainError;
pub use filter::ParameterFilter;
pub use ids::{
    DeviceCollection, DeviceId, FileId, MonitoringListId, ParameterInstanceId,
    ParameterInstancePath,
};
pub use permissions::{PermissionType, UserPermissions};
pub use requests::{RegisterDeviceRequest, ValuePathRequest, ValueRequest};
pub use responses::{
    AllowedLength, AllowedValues, ArgumentInfo, ClassInfo, DeleteMonitoringListResponse,
    DeviceCollectionResponse, DeviceFeatureInfo, DeviceInfo, DeviceResponse,
    EnumDefinitionResponse, EnumInfo, EnumMemberInfo, FeatureInfo, FeatureListResponse,
    FeatureResponse, FileIdResponse, FileInfoResponse, FileReadResponse,
    MethodInvocationNamedResponse, MonitoringListInfo, MonitoringListResponse,
    MonitoringListValuesResponse, MonitoringListsResponse, ParameterDefinitionInfo,
    ParameterResponse, ParameterResponseListResponse, RegisterFileProviderResponse, Response,
    SetParameterResponse,
};
pub use selector::{DeviceSelector, ParameterSelector};
pub use status::StatusCode;
pub use value::{
    ClassInstantiation, InstantiationEntry, ParameterValue, ParameterValueEntry, Rank, ValueError,
    ValueType,
};
