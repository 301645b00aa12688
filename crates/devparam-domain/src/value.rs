use std::net::Ipv4Addr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use thiserror::Error;

use crate::error::DomainError;
use crate::ids::FileId;
use crate::status::StatusCode;

// ── Value types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Ipv4Address,
    Bytes,
    FileId,
    Enum,
    InstanceRef,
    Instantiations,
    Method,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "Boolean",
            ValueType::Int8 => "Int8",
            ValueType::Int16 => "Int16",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::UInt8 => "UInt8",
            ValueType::UInt16 => "UInt16",
            ValueType::UInt32 => "UInt32",
            ValueType::UInt64 => "UInt64",
            ValueType::Float32 => "Float32",
            ValueType::Float64 => "Float64",
            ValueType::String => "String",
            ValueType::Ipv4Address => "IPv4Address",
            ValueType::Bytes => "Bytes",
            ValueType::FileId => "FileID",
            ValueType::Enum => "Enum",
            ValueType::InstanceRef => "InstanceRef",
            ValueType::Instantiations => "Instantiations",
            ValueType::Method => "Method",
        }
    }

    pub fn parse(s: &str) -> Result<ValueType, DomainError> {
        match s {
            "Boolean" => Ok(ValueType::Boolean),
            "Int8" => Ok(ValueType::Int8),
            "Int16" => Ok(ValueType::Int16),
            "Int32" => Ok(ValueType::Int32),
            "Int64" => Ok(ValueType::Int64),
            "UInt8" => Ok(ValueType::UInt8),
            "UInt16" => Ok(ValueType::UInt16),
            "UInt32" => Ok(ValueType::UInt32),
            "UInt64" => Ok(ValueType::UInt64),
            "Float32" => Ok(ValueType::Float32),
            "Float64" => Ok(ValueType::Float64),
            "String" => Ok(ValueType::String),
            "IPv4Address" => Ok(ValueType::Ipv4Address),
            "Bytes" => Ok(ValueType::Bytes),
            "FileID" => Ok(ValueType::FileId),
            "Enum" => Ok(ValueType::Enum),
            "InstanceRef" => Ok(ValueType::InstanceRef),
            "Instantiations" => Ok(ValueType::Instantiations),
            "Method" => Ok(ValueType::Method),
            other => Err(DomainError::UnknownValueType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ValueType::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rank {
    #[default]
    Scalar,
    Array,
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Rank::Scalar => "Scalar",
            Rank::Array => "Array",
        })
    }
}

impl<'de> Deserialize<'de> for Rank {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "Scalar" => Ok(Rank::Scalar),
            "Array" => Ok(Rank::Array),
            other => Err(serde::de::Error::custom(format!("unknown rank {other}"))),
        }
    }
}

// ── Promotion errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value is null")]
    Null,

    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: ValueType, got: String },

    #[error("value not representable as {expected}: {detail}")]
    Representation { expected: ValueType, detail: String },
}

impl ValueError {
    pub fn status(&self) -> StatusCode {
        match self {
            ValueError::Null => StatusCode::ValueNull,
            ValueError::TypeMismatch { .. } => StatusCode::WrongValueType,
            ValueError::Representation { .. } => StatusCode::WrongValueRepresentation,
        }
    }
}

// ── Instantiation payloads ───────────────────────────────────────────────────

/// One `(parameter id, value)` pair inside an instantiation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValueEntry {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Value")]
    pub value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiationEntry {
    #[serde(rename = "ID")]
    pub id: u16,
    #[serde(rename = "ParameterValues", default)]
    pub parameter_values: Vec<ParameterValueEntry>,
}

/// Desired set of instances for one class, as carried by an
/// `Instantiations`-typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInstantiation {
    #[serde(rename = "Class")]
    pub class: String,
    #[serde(rename = "Instances", default)]
    pub instances: Vec<InstantiationEntry>,
}

// ── Parameter value ──────────────────────────────────────────────────────────

/// Tagged value container. Values arriving from JSON stay `Unknown` until the
/// responsible definition is known; `promote` then validates and reinterprets
/// the raw form. Serialization is lossless given the type: bytes travel as
/// base64, addresses as dotted quads, enum members as numeric ids.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Unknown(Json),
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Ipv4Address(Ipv4Addr),
    Bytes(Vec<u8>),
    FileId(FileId),
    EnumValue(u32),
    InstanceRef(u16),
    Array(ValueType, Vec<ParameterValue>),
    Instantiations(Vec<ClassInstantiation>),
}

impl ParameterValue {
    pub fn null() -> Self {
        ParameterValue::Unknown(Json::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParameterValue::Unknown(Json::Null))
    }

    /// The concrete type tag, or `None` while the value is still raw.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            ParameterValue::Unknown(_) => None,
            ParameterValue::Bool(_) => Some(ValueType::Boolean),
            ParameterValue::Int8(_) => Some(ValueType::Int8),
            ParameterValue::Int16(_) => Some(ValueType::Int16),
            ParameterValue::Int32(_) => Some(ValueType::Int32),
            ParameterValue::Int64(_) => Some(ValueType::Int64),
            ParameterValue::UInt8(_) => Some(ValueType::UInt8),
            ParameterValue::UInt16(_) => Some(ValueType::UInt16),
            ParameterValue::UInt32(_) => Some(ValueType::UInt32),
            ParameterValue::UInt64(_) => Some(ValueType::UInt64),
            ParameterValue::Float32(_) => Some(ValueType::Float32),
            ParameterValue::Float64(_) => Some(ValueType::Float64),
            ParameterValue::String(_) => Some(ValueType::String),
            ParameterValue::Ipv4Address(_) => Some(ValueType::Ipv4Address),
            ParameterValue::Bytes(_) => Some(ValueType::Bytes),
            ParameterValue::FileId(_) => Some(ValueType::FileId),
            ParameterValue::EnumValue(_) => Some(ValueType::Enum),
            ParameterValue::InstanceRef(_) => Some(ValueType::InstanceRef),
            ParameterValue::Array(t, _) => Some(*t),
            ParameterValue::Instantiations(_) => Some(ValueType::Instantiations),
        }
    }

    pub fn rank(&self) -> Rank {
        match self {
            ParameterValue::Array(_, _) => Rank::Array,
            _ => Rank::Scalar,
        }
    }

    /// Validate and reinterpret against a known definition type. Already-typed
    /// values must match exactly; raw JSON is converted.
    pub fn promote(&self, ty: ValueType, rank: Rank) -> Result<ParameterValue, ValueError> {
        if rank == Rank::Array {
            return self.promote_array(ty);
        }
        match self {
            ParameterValue::Unknown(Json::Null) => Err(ValueError::Null),
            ParameterValue::Unknown(raw) => reinterpret(raw, ty),
            ParameterValue::Array(_, _) => Err(ValueError::TypeMismatch {
                expected: ty,
                got: "array".to_string(),
            }),
            typed => match typed.value_type() {
                Some(have) if have == ty => Ok(typed.clone()),
                Some(have) => Err(ValueError::TypeMismatch {
                    expected: ty,
                    got: have.to_string(),
                }),
                None => unreachable!("Unknown handled above"),
            },
        }
    }

    fn promote_array(&self, ty: ValueType) -> Result<ParameterValue, ValueError> {
        let elements: Vec<ParameterValue> = match self {
            ParameterValue::Unknown(Json::Null) => return Err(ValueError::Null),
            ParameterValue::Unknown(Json::Array(raw)) => raw
                .iter()
                .map(|v| {
                    if v.is_null() {
                        Err(ValueError::Null)
                    } else {
                        reinterpret(v, ty)
                    }
                })
                .collect::<Result<_, _>>()?,
            ParameterValue::Unknown(other) => {
                return Err(ValueError::TypeMismatch {
                    expected: ty,
                    got: json_kind(other).to_string(),
                });
            }
            ParameterValue::Array(have, items) if *have == ty => {
                items.iter().map(|v| v.promote(ty, Rank::Scalar)).collect::<Result<_, _>>()?
            }
            ParameterValue::Array(have, _) => {
                return Err(ValueError::TypeMismatch {
                    expected: ty,
                    got: have.to_string(),
                });
            }
            scalar => {
                return Err(ValueError::TypeMismatch {
                    expected: ty,
                    got: scalar
                        .value_type()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "scalar".to_string()),
                });
            }
        };
        Ok(ParameterValue::Array(ty, elements))
    }

    /// Lossless JSON image of this value.
    pub fn to_json(&self) -> Json {
        match self {
            ParameterValue::Unknown(raw) => raw.clone(),
            ParameterValue::Bool(v) => Json::Bool(*v),
            ParameterValue::Int8(v) => Json::from(*v),
            ParameterValue::Int16(v) => Json::from(*v),
            ParameterValue::Int32(v) => Json::from(*v),
            ParameterValue::Int64(v) => Json::from(*v),
            ParameterValue::UInt8(v) => Json::from(*v),
            ParameterValue::UInt16(v) => Json::from(*v),
            ParameterValue::UInt32(v) => Json::from(*v),
            ParameterValue::UInt64(v) => Json::from(*v),
            ParameterValue::Float32(v) => {
                serde_json::Number::from_f64(*v as f64).map(Json::Number).unwrap_or(Json::Null)
            }
            ParameterValue::Float64(v) => {
                serde_json::Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null)
            }
            ParameterValue::String(v) => Json::String(v.clone()),
            ParameterValue::Ipv4Address(v) => Json::String(v.to_string()),
            ParameterValue::Bytes(v) => Json::String(BASE64.encode(v)),
            ParameterValue::FileId(v) => Json::String(v.0.clone()),
            ParameterValue::EnumValue(v) => Json::from(*v),
            ParameterValue::InstanceRef(v) => Json::from(*v),
            ParameterValue::Array(_, items) => {
                Json::Array(items.iter().map(|v| v.to_json()).collect())
            }
            ParameterValue::Instantiations(list) => {
                serde_json::to_value(list).unwrap_or(Json::Null)
            }
        }
    }
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn representation(ty: ValueType, detail: impl Into<String>) -> ValueError {
    ValueError::Representation {
        expected: ty,
        detail: detail.into(),
    }
}

fn as_i64(raw: &Json, ty: ValueType) -> Result<i64, ValueError> {
    match raw {
        Json::Number(n) => n
            .as_i64()
            .ok_or_else(|| representation(ty, format!("{} out of range", n))),
        other => Err(ValueError::TypeMismatch {
            expected: ty,
            got: json_kind(other).to_string(),
        }),
    }
}

fn as_u64(raw: &Json, ty: ValueType) -> Result<u64, ValueError> {
    match raw {
        Json::Number(n) => n
            .as_u64()
            .ok_or_else(|| representation(ty, format!("{} out of range", n))),
        other => Err(ValueError::TypeMismatch {
            expected: ty,
            got: json_kind(other).to_string(),
        }),
    }
}

fn as_str<'a>(raw: &'a Json, ty: ValueType) -> Result<&'a str, ValueError> {
    match raw {
        Json::String(s) => Ok(s.as_str()),
        other => Err(ValueError::TypeMismatch {
            expected: ty,
            got: json_kind(other).to_string(),
        }),
    }
}

macro_rules! ranged_int {
    ($raw:expr, $ty:expr, $conv:ident, $prim:ty, $variant:ident) => {{
        let wide = $conv($raw, $ty)?;
        <$prim>::try_from(wide)
            .map(ParameterValue::$variant)
            .map_err(|_| representation($ty, format!("{} out of range", wide)))
    }};
}

fn reinterpret(raw: &Json, ty: ValueType) -> Result<ParameterValue, ValueError> {
    match ty {
        ValueType::Boolean => match raw {
            Json::Bool(v) => Ok(ParameterValue::Bool(*v)),
            other => Err(ValueError::TypeMismatch {
                expected: ty,
                got: json_kind(other).to_string(),
            }),
        },
        ValueType::Int8 => ranged_int!(raw, ty, as_i64, i8, Int8),
        ValueType::Int16 => ranged_int!(raw, ty, as_i64, i16, Int16),
        ValueType::Int32 => ranged_int!(raw, ty, as_i64, i32, Int32),
        ValueType::Int64 => as_i64(raw, ty).map(ParameterValue::Int64),
        ValueType::UInt8 => ranged_int!(raw, ty, as_u64, u8, UInt8),
        ValueType::UInt16 => ranged_int!(raw, ty, as_u64, u16, UInt16),
        ValueType::UInt32 => ranged_int!(raw, ty, as_u64, u32, UInt32),
        ValueType::UInt64 => as_u64(raw, ty).map(ParameterValue::UInt64),
        ValueType::Float32 => match raw {
            Json::Number(n) => Ok(ParameterValue::Float32(
                n.as_f64().ok_or_else(|| representation(ty, "not a float"))? as f32,
            )),
            other => Err(ValueError::TypeMismatch {
                expected: ty,
                got: json_kind(other).to_string(),
            }),
        },
        ValueType::Float64 => match raw {
            Json::Number(n) => Ok(ParameterValue::Float64(
                n.as_f64().ok_or_else(|| representation(ty, "not a float"))?,
            )),
            other => Err(ValueError::TypeMismatch {
                expected: ty,
                got: json_kind(other).to_string(),
            }),
        },
        ValueType::String => as_str(raw, ty).map(|s| ParameterValue::String(s.to_string())),
        ValueType::Ipv4Address => {
            let s = as_str(raw, ty)?;
            s.parse::<Ipv4Addr>()
                .map(ParameterValue::Ipv4Address)
                .map_err(|_| representation(ty, s.to_string()))
        }
        ValueType::Bytes => {
            let s = as_str(raw, ty)?;
            BASE64
                .decode(s)
                .map(ParameterValue::Bytes)
                .map_err(|e| representation(ty, e.to_string()))
        }
        ValueType::FileId => as_str(raw, ty).map(|s| ParameterValue::FileId(FileId::new(s))),
        ValueType::Enum => ranged_int!(raw, ty, as_u64, u32, EnumValue),
        ValueType::InstanceRef => ranged_int!(raw, ty, as_u64, u16, InstanceRef),
        ValueType::Instantiations => serde_json::from_value::<Vec<ClassInstantiation>>(raw.clone())
            .map(ParameterValue::Instantiations)
            .map_err(|e| representation(ty, e.to_string())),
        ValueType::Method => Err(ValueError::TypeMismatch {
            expected: ty,
            got: json_kind(raw).to_string(),
        }),
    }
}

impl Serialize for ParameterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParameterValue {
    /// Typing is deferred: incoming values stay raw until a definition is
    /// known and `promote` is called.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ParameterValue::Unknown(Json::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: ParameterValue, ty: ValueType, rank: Rank) {
        let json = serde_json::to_string(&value).unwrap();
        let raw: ParameterValue = serde_json::from_str(&json).unwrap();
        assert!(matches!(raw, ParameterValue::Unknown(_)));
        assert_eq!(raw.promote(ty, rank).unwrap(), value);
    }

    #[test]
    fn scalars_survive_json() {
        round_trip(ParameterValue::Bool(true), ValueType::Boolean, Rank::Scalar);
        round_trip(ParameterValue::UInt16(42), ValueType::UInt16, Rank::Scalar);
        round_trip(ParameterValue::Int8(-3), ValueType::Int8, Rank::Scalar);
        round_trip(
            ParameterValue::String("Hallo Du".into()),
            ValueType::String,
            Rank::Scalar,
        );
        round_trip(
            ParameterValue::Ipv4Address("192.168.1.17".parse().unwrap()),
            ValueType::Ipv4Address,
            Rank::Scalar,
        );
        round_trip(
            ParameterValue::Bytes(vec![0, 1, 2, 254, 255]),
            ValueType::Bytes,
            Rank::Scalar,
        );
        round_trip(ParameterValue::EnumValue(7), ValueType::Enum, Rank::Scalar);
        round_trip(
            ParameterValue::FileId(FileId::new("fid-1")),
            ValueType::FileId,
            Rank::Scalar,
        );
    }

    #[test]
    fn arrays_survive_json() {
        round_trip(
            ParameterValue::Array(
                ValueType::String,
                vec![
                    ParameterValue::String("a".into()),
                    ParameterValue::String("b".into()),
                ],
            ),
            ValueType::String,
            Rank::Array,
        );
    }

    #[test]
    fn instantiations_survive_json() {
        round_trip(
            ParameterValue::Instantiations(vec![ClassInstantiation {
                class: "TestClass".into(),
                instances: vec![InstantiationEntry {
                    id: 2,
                    parameter_values: vec![ParameterValueEntry {
                        id: 20008,
                        value: ParameterValue::Unknown(serde_json::json!("Test2")),
                    }],
                }],
            }]),
            ValueType::Instantiations,
            Rank::Scalar,
        );
    }

    #[test]
    fn null_is_rejected() {
        let err = ParameterValue::null()
            .promote(ValueType::Boolean, Rank::Scalar)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ValueNull);
    }

    #[test]
    fn type_mismatch_is_detected() {
        let raw = ParameterValue::Unknown(serde_json::json!("yes"));
        let err = raw.promote(ValueType::Boolean, Rank::Scalar).unwrap_err();
        assert_eq!(err.status(), StatusCode::WrongValueType);
    }

    #[test]
    fn overflow_is_a_representation_error() {
        let raw = ParameterValue::Unknown(serde_json::json!(300));
        let err = raw.promote(ValueType::UInt8, Rank::Scalar).unwrap_err();
        assert_eq!(err.status(), StatusCode::WrongValueRepresentation);
    }

    #[test]
    fn typed_value_must_match_definition() {
        let err = ParameterValue::Bool(true)
            .promote(ValueType::UInt16, Rank::Scalar)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::WrongValueType);
    }

    #[test]
    fn bad_ipv4_is_a_representation_error() {
        let raw = ParameterValue::Unknown(serde_json::json!("192.168.300.1"));
        let err = raw
            .promote(ValueType::Ipv4Address, Rank::Scalar)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::WrongValueRepresentation);
    }
}
