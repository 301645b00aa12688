use thiserror::Error;

use crate::status::StatusCode;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device collection: {0}")]
    InvalidDeviceCollection(String),

    #[error("invalid device slot: {0}")]
    InvalidDeviceSlot(String),

    #[error("malformed device id: {0}")]
    MalformedDeviceId(String),

    #[error("malformed parameter instance id: {0}")]
    MalformedInstanceId(String),

    #[error("unknown status code: {0}")]
    UnknownStatusCode(String),

    #[error("unknown value type: {0}")]
    UnknownValueType(String),
}

impl DomainError {
    /// The status code a front-end call reports when this parse error occurs.
    pub fn status(&self) -> StatusCode {
        match self {
            DomainError::InvalidDeviceCollection(_) => StatusCode::InvalidDeviceCollection,
            DomainError::InvalidDeviceSlot(_) => StatusCode::InvalidDeviceSlot,
            DomainError::MalformedDeviceId(_) => StatusCode::UnknownDevice,
            DomainError::MalformedInstanceId(_) => StatusCode::UnknownParameterId,
            DomainError::UnknownStatusCode(_) => StatusCode::InternalError,
            DomainError::UnknownValueType(_) => StatusCode::WrongValueType,
        }
    }
}
