use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, ParameterInstanceId, ParameterInstancePath};
use crate::value::ParameterValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterDeviceRequest {
    #[serde(rename = "DeviceID")]
    pub device_id: DeviceId,
    pub order_number: String,
    pub firmware_version: String,
}

impl RegisterDeviceRequest {
    pub fn new(
        device_id: DeviceId,
        order_number: impl Into<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        RegisterDeviceRequest {
            device_id,
            order_number: order_number.into(),
            firmware_version: firmware_version.into(),
        }
    }
}

/// One write entry addressed by numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValueRequest {
    #[serde(rename = "ID")]
    pub id: ParameterInstanceId,
    pub value: ParameterValue,
}

impl ValueRequest {
    pub fn new(id: ParameterInstanceId, value: ParameterValue) -> Self {
        ValueRequest { id, value }
    }
}

/// One write entry addressed by textual path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValuePathRequest {
    pub path: ParameterInstancePath,
    pub value: ParameterValue,
}

impl ValuePathRequest {
    pub fn new(path: ParameterInstancePath, value: ParameterValue) -> Self {
        ValuePathRequest { path, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceCollection;

    #[test]
    fn register_request_round_trips() {
        let req = RegisterDeviceRequest::new(
            DeviceId::new(DeviceCollection::Rlb, 1),
            "0763-1108",
            "01.00.00",
        );
        let json = serde_json::to_string(&req).unwrap();
        let back: RegisterDeviceRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn value_path_request_round_trips() {
        let req = ValuePathRequest::new(
            "Test/WriteableParamWithPattern".parse().unwrap(),
            ParameterValue::String("Hallo Du".into()),
        );
        let json = serde_json::to_string(&req).unwrap();
        let back: ValuePathRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.path, req.path);
        // values stay raw after deserialization
        assert!(matches!(back.value, ParameterValue::Unknown(_)));
    }
}
