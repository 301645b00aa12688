use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// Outcome of one request entry. Every public response slot carries exactly
/// one of these; errors are values, never panics or `Err` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    Success,
    #[default]
    NoErrorYet,
    InternalError,
    NotImplemented,
    UnknownDevice,
    UnknownDeviceCollection,
    InvalidDeviceCollection,
    InvalidDeviceSlot,
    DeviceAlreadyExists,
    UnknownParameterId,
    UnknownParameterPath,
    UnknownFeatureName,
    FeatureNotAvailable,
    ParameterNotProvided,
    ParameterValueUnavailable,
    StatusValueUnavailable,
    ParameterNotWriteable,
    CouldNotSetParameter,
    WrongValueType,
    WrongValuePattern,
    WrongValueRepresentation,
    ValueNull,
    ValueNotPossible,
    InvalidValue,
    OtherInvalidValueInSet,
    MissingArgument,
    MissingParameterForInstantiation,
    MethodsDoNotHaveValue,
    NotExistingForInstance,
    Unauthorized,
    OtherUnauthorizedRequestInSet,
    UnknownMonitoringList,
    MonitoringListMaxExceeded,
    UnknownFileId,
    NotAFileId,
    ProviderNotOperational,
    WdaConnectionChangesDeferred,
}

impl StatusCode {
    /// Every status code, in declaration order. Drives the wire round-trip test.
    pub const ALL: [StatusCode; 37] = [
        StatusCode::Success,
        StatusCode::NoErrorYet,
        StatusCode::InternalError,
        StatusCode::NotImplemented,
        StatusCode::UnknownDevice,
        StatusCode::UnknownDeviceCollection,
        StatusCode::InvalidDeviceCollection,
        StatusCode::InvalidDeviceSlot,
        StatusCode::DeviceAlreadyExists,
        StatusCode::UnknownParameterId,
        StatusCode::UnknownParameterPath,
        StatusCode::UnknownFeatureName,
        StatusCode::FeatureNotAvailable,
        StatusCode::ParameterNotProvided,
        StatusCode::ParameterValueUnavailable,
        StatusCode::StatusValueUnavailable,
        StatusCode::ParameterNotWriteable,
        StatusCode::CouldNotSetParameter,
        StatusCode::WrongValueType,
        StatusCode::WrongValuePattern,
        StatusCode::WrongValueRepresentation,
        StatusCode::ValueNull,
        StatusCode::ValueNotPossible,
        StatusCode::InvalidValue,
        StatusCode::OtherInvalidValueInSet,
        StatusCode::MissingArgument,
        StatusCode::MissingParameterForInstantiation,
        StatusCode::MethodsDoNotHaveValue,
        StatusCode::NotExistingForInstance,
        StatusCode::Unauthorized,
        StatusCode::OtherUnauthorizedRequestInSet,
        StatusCode::UnknownMonitoringList,
        StatusCode::MonitoringListMaxExceeded,
        StatusCode::UnknownFileId,
        StatusCode::NotAFileId,
        StatusCode::ProviderNotOperational,
        StatusCode::WdaConnectionChangesDeferred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::NoErrorYet => "NO_ERROR_YET",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::NotImplemented => "NOT_IMPLEMENTED",
            StatusCode::UnknownDevice => "UNKNOWN_DEVICE",
            StatusCode::UnknownDeviceCollection => "UNKNOWN_DEVICE_COLLECTION",
            StatusCode::InvalidDeviceCollection => "INVALID_DEVICE_COLLECTION",
            StatusCode::InvalidDeviceSlot => "INVALID_DEVICE_SLOT",
            StatusCode::DeviceAlreadyExists => "DEVICE_ALREADY_EXISTS",
            StatusCode::UnknownParameterId => "UNKNOWN_PARAMETER_ID",
            StatusCode::UnknownParameterPath => "UNKNOWN_PARAMETER_PATH",
            StatusCode::UnknownFeatureName => "UNKNOWN_FEATURE_NAME",
            StatusCode::FeatureNotAvailable => "FEATURE_NOT_AVAILABLE",
            StatusCode::ParameterNotProvided => "PARAMETER_NOT_PROVIDED",
            StatusCode::ParameterValueUnavailable => "PARAMETER_VALUE_UNAVAILABLE",
            StatusCode::StatusValueUnavailable => "STATUS_VALUE_UNAVAILABLE",
            StatusCode::ParameterNotWriteable => "PARAMETER_NOT_WRITEABLE",
            StatusCode::CouldNotSetParameter => "COULD_NOT_SET_PARAMETER",
            StatusCode::WrongValueType => "WRONG_VALUE_TYPE",
            StatusCode::WrongValuePattern => "WRONG_VALUE_PATTERN",
            StatusCode::WrongValueRepresentation => "WRONG_VALUE_REPRESENTATION",
            StatusCode::ValueNull => "VALUE_NULL",
            StatusCode::ValueNotPossible => "VALUE_NOT_POSSIBLE",
            StatusCode::InvalidValue => "INVALID_VALUE",
            StatusCode::OtherInvalidValueInSet => "OTHER_INVALID_VALUE_IN_SET",
            StatusCode::MissingArgument => "MISSING_ARGUMENT",
            StatusCode::MissingParameterForInstantiation => {
                "MISSING_PARAMETER_FOR_INSTANTIATION"
            }
            StatusCode::MethodsDoNotHaveValue => "METHODS_DO_NOT_HAVE_VALUE",
            StatusCode::NotExistingForInstance => "NOT_EXISTING_FOR_INSTANCE",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::OtherUnauthorizedRequestInSet => "OTHER_UNAUTHORIZED_REQUEST_IN_SET",
            StatusCode::UnknownMonitoringList => "UNKNOWN_MONITORING_LIST",
            StatusCode::MonitoringListMaxExceeded => "MONITORING_LIST_MAX_EXCEEDED",
            StatusCode::UnknownFileId => "UNKNOWN_FILE_ID",
            StatusCode::NotAFileId => "NOT_A_FILE_ID",
            StatusCode::ProviderNotOperational => "PROVIDER_NOT_OPERATIONAL",
            StatusCode::WdaConnectionChangesDeferred => "WDA_CONNECTION_CHANGES_DEFERRED",
        }
    }

    pub fn parse(s: &str) -> Result<StatusCode, DomainError> {
        StatusCode::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatusCode(s.to_string()))
    }

    /// Success family: the request took effect (or was deliberately deferred).
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::Success | StatusCode::WdaConnectionChangesDeferred
        )
    }

    /// A determined slot will not be touched by later dispatch phases.
    pub fn is_determined(&self) -> bool {
        *self != StatusCode::NoErrorYet
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StatusCode::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for code in StatusCode::ALL {
            assert_eq!(StatusCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn wire_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in StatusCode::ALL {
            assert!(seen.insert(code.as_str()), "duplicate name {}", code);
        }
    }

    #[test]
    fn success_family() {
        assert!(StatusCode::Success.is_success());
        assert!(StatusCode::WdaConnectionChangesDeferred.is_success());
        assert!(!StatusCode::NoErrorYet.is_success());
        assert!(!StatusCode::InternalError.is_success());
    }

    #[test]
    fn serde_uses_wire_form() {
        let json = serde_json::to_string(&StatusCode::ParameterNotProvided).unwrap();
        assert_eq!(json, "\"PARAMETER_NOT_PROVIDED\"");
        let back: StatusCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StatusCode::ParameterNotProvided);
    }
}
