use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, FileId, MonitoringListId, ParameterInstanceId};
use crate::status::StatusCode;
use crate::value::{ParameterValue, Rank, ValueType};

// ── Definition snapshots ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllowedValues {
    pub list: Vec<ParameterValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AllowedLength {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArgumentInfo {
    pub name: String,
    #[serde(rename = "Type")]
    pub value_type: ValueType,
}

/// Which class a definition belongs to, as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClassInfo {
    pub name: String,
    pub base_path: String,
    #[serde(rename = "BaseID")]
    pub base_id: u32,
}

/// Client-facing image of one compiled parameter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterDefinitionInfo {
    #[serde(rename = "ID")]
    pub id: u32,
    pub path: String,
    #[serde(rename = "Type")]
    pub value_type: ValueType,
    pub rank: Rank,
    pub writeable: bool,
    pub user_setting: bool,
    pub only_online: bool,
    pub beta: bool,
    pub deprecated: bool,
    pub inactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<AllowedValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_length: Option<AllowedLength>,
    #[serde(rename = "Enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ref_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_args: Vec<ArgumentInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_args: Vec<ArgumentInfo>,
}

// ── Generic response ─────────────────────────────────────────────────────────

/// Base response: a status, plus an optional provider-defined code/message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub status: StatusCode,
    #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
    pub domain_specific_status_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Response::status(StatusCode::Success)
    }

    pub fn status(status: StatusCode) -> Self {
        Response {
            status,
            ..Response::default()
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Response {
            status,
            message: Some(message.into()),
            ..Response::default()
        }
    }
}

macro_rules! status_response {
    ($name:ident { $($(#[$attr:meta])* $field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        pub struct $name {
            pub status: StatusCode,
            #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
            pub domain_specific_status_code: Option<i32>,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub message: Option<String>,
            $($(#[$attr])* pub $field: $ty,)*
        }

        impl $name {
            pub fn status(status: StatusCode) -> Self {
                $name { status, ..$name::default() }
            }

            pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
                $name { status, message: Some(message.into()), ..$name::default() }
            }
        }
    };
}

// ── Parameter operations ─────────────────────────────────────────────────────

status_response!(ParameterResponse {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    id: Option<ParameterInstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    definition: Option<ParameterDefinitionInfo>,
});

impl ParameterResponse {
    pub fn success_value(id: ParameterInstanceId, value: ParameterValue) -> Self {
        ParameterResponse {
            status: StatusCode::Success,
            id: Some(id),
            value: Some(value),
            ..ParameterResponse::default()
        }
    }
}

status_response!(SetParameterResponse {});

status_response!(MethodInvocationNamedResponse {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    out_args: BTreeMap<String, ParameterValue>,
});

status_response!(ParameterResponseListResponse {
    #[serde(default)]
    parameters: Vec<ParameterResponse>,
    #[serde(default)]
    total_count: u64,
});

// ── Devices ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(rename = "ID")]
    pub id: DeviceId,
    pub order_number: String,
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

status_response!(DeviceResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device: Option<DeviceInfo>,
});

status_response!(DeviceCollectionResponse {
    #[serde(default)]
    devices: Vec<DeviceInfo>,
});

// ── Model introspection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceFeatureInfo {
    pub name: String,
    pub beta: bool,
    pub deprecated: bool,
}

status_response!(FeatureListResponse {
    #[serde(rename = "DeviceID", default, skip_serializing_if = "Option::is_none")]
    device: Option<DeviceId>,
    #[serde(default)]
    features: Vec<DeviceFeatureInfo>,
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureInfo {
    pub name: String,
    pub beta: bool,
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_ids: Vec<u32>,
}

status_response!(FeatureResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feature: Option<FeatureInfo>,
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumMemberInfo {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumInfo {
    pub name: String,
    pub members: Vec<EnumMemberInfo>,
}

status_response!(EnumDefinitionResponse {
    #[serde(rename = "Enum", default, skip_serializing_if = "Option::is_none")]
    enum_definition: Option<EnumInfo>,
});

// ── Monitoring ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitoringListInfo {
    #[serde(rename = "ID")]
    pub id: MonitoringListId,
    pub one_off: bool,
    pub timeout_seconds: u16,
}

status_response!(MonitoringListResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list: Option<MonitoringListInfo>,
});

status_response!(MonitoringListValuesResponse {
    #[serde(default)]
    values: Vec<ParameterResponse>,
});

status_response!(MonitoringListsResponse {
    #[serde(default)]
    lists: Vec<MonitoringListInfo>,
});

pub type DeleteMonitoringListResponse = Response;

// ── Files ────────────────────────────────────────────────────────────────────

fn serialize_bytes<S: serde::Serializer>(data: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    use base64::Engine as _;
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn deserialize_bytes<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    use base64::Engine as _;
    let s = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(&s)
        .map_err(serde::de::Error::custom)
}

status_response!(FileReadResponse {
    #[serde(
        default,
        serialize_with = "serialize_bytes",
        deserialize_with = "deserialize_bytes"
    )]
    data: Vec<u8>,
});

status_response!(FileInfoResponse {
    #[serde(default)]
    size: u64,
    #[serde(default)]
    capacity: u64,
});

status_response!(FileIdResponse {
    #[serde(rename = "FileID", default, skip_serializing_if = "Option::is_none")]
    file_id: Option<FileId>,
});

status_response!(RegisterFileProviderResponse {
    #[serde(rename = "FileID", default, skip_serializing_if = "Option::is_none")]
    file_id: Option<FileId>,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_wire_keys_are_pascal_case() {
        let r = ParameterResponse {
            status: StatusCode::Success,
            id: Some(ParameterInstanceId::headstation(42)),
            value: Some(ParameterValue::Bool(true)),
            ..ParameterResponse::default()
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["Status"], "SUCCESS");
        assert_eq!(json["ID"], "0-0-42-0");
        assert_eq!(json["Value"], true);
    }

    #[test]
    fn responses_round_trip() {
        let r = SetParameterResponse::with_message(StatusCode::CouldNotSetParameter, "Mein Fehlertext");
        let r = SetParameterResponse {
            domain_specific_status_code: Some(43),
            ..r
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: SetParameterResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn file_data_travels_as_base64() {
        let r = FileReadResponse {
            status: StatusCode::Success,
            data: vec![1, 2, 3],
            ..FileReadResponse::default()
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["Data"], "AQID");
        let back: FileReadResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, vec![1, 2, 3]);
    }

    #[test]
    fn monitoring_list_response_round_trips() {
        let r = MonitoringListResponse {
            status: StatusCode::Success,
            list: Some(MonitoringListInfo {
                id: MonitoringListId(3),
                one_off: false,
                timeout_seconds: 5,
            }),
            ..MonitoringListResponse::default()
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: MonitoringListResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
