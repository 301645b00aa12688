use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

// ── Device collections ───────────────────────────────────────────────────────

/// Closed namespace of device collections. Unknown collection ids are rejected
/// at the boundary with `INVALID_DEVICE_COLLECTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceCollection {
    /// Contains only the headstation at slot 0.
    Root = 0,
    Rlb = 1,
    Kbus = 2,
}

impl DeviceCollection {
    pub const ALL: [DeviceCollection; 3] = [
        DeviceCollection::Root,
        DeviceCollection::Rlb,
        DeviceCollection::Kbus,
    ];

    pub fn from_id(id: u8) -> Result<DeviceCollection, DomainError> {
        match id {
            0 => Ok(DeviceCollection::Root),
            1 => Ok(DeviceCollection::Rlb),
            2 => Ok(DeviceCollection::Kbus),
            other => Err(DomainError::InvalidDeviceCollection(other.to_string())),
        }
    }

    pub fn from_name(name: &str) -> Result<DeviceCollection, DomainError> {
        match name.to_ascii_lowercase().as_str() {
            "root" => Ok(DeviceCollection::Root),
            "rlb" => Ok(DeviceCollection::Rlb),
            "kbus" => Ok(DeviceCollection::Kbus),
            other => Err(DomainError::InvalidDeviceCollection(other.to_string())),
        }
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceCollection::Root => "root",
            DeviceCollection::Rlb => "rlb",
            DeviceCollection::Kbus => "kbus",
        }
    }
}

impl std::fmt::Display for DeviceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Device id ────────────────────────────────────────────────────────────────

/// `(collection, slot)` pair. Wire form `"C-S"`, both decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub collection: DeviceCollection,
    pub slot: u16,
}

impl DeviceId {
    /// The headstation singleton lives at `(root, 0)`.
    pub const HEADSTATION: DeviceId = DeviceId {
        collection: DeviceCollection::Root,
        slot: 0,
    };

    pub fn new(collection: DeviceCollection, slot: u16) -> Self {
        DeviceId { collection, slot }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.collection.id(), self.slot)
    }
}

fn parse_collection(part: &str) -> Result<DeviceCollection, DomainError> {
    let raw: u32 = part
        .parse()
        .map_err(|_| DomainError::MalformedDeviceId(part.to_string()))?;
    if raw > u8::MAX as u32 {
        return Err(DomainError::InvalidDeviceCollection(part.to_string()));
    }
    DeviceCollection::from_id(raw as u8)
}

fn parse_slot(part: &str) -> Result<u16, DomainError> {
    let raw: u64 = part
        .parse()
        .map_err(|_| DomainError::MalformedDeviceId(part.to_string()))?;
    if raw > u16::MAX as u64 {
        return Err(DomainError::InvalidDeviceSlot(part.to_string()));
    }
    Ok(raw as u16)
}

impl FromStr for DeviceId {
    type Err = DomainError;

    /// Accepts both wire spellings, `"2-3"` and `"2/3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ['-', '/']);
        let collection = parts
            .next()
            .ok_or_else(|| DomainError::MalformedDeviceId(s.to_string()))?;
        let slot = parts
            .next()
            .ok_or_else(|| DomainError::MalformedDeviceId(s.to_string()))?;
        Ok(DeviceId {
            collection: parse_collection(collection)?,
            slot: parse_slot(slot)?,
        })
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Parameter instance id ────────────────────────────────────────────────────

/// `(parameter, instance, device)` triple. Wire form `"C-S-P-I"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterInstanceId {
    pub device: DeviceId,
    pub parameter_id: u32,
    pub instance_id: u16,
}

impl ParameterInstanceId {
    pub fn new(parameter_id: u32, instance_id: u16, device: DeviceId) -> Self {
        ParameterInstanceId {
            device,
            parameter_id,
            instance_id,
        }
    }

    /// Instance 0 of a parameter on the headstation.
    pub fn headstation(parameter_id: u32) -> Self {
        ParameterInstanceId::new(parameter_id, 0, DeviceId::HEADSTATION)
    }
}

impl std::fmt::Display for ParameterInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.device.collection.id(),
            self.device.slot,
            self.parameter_id,
            self.instance_id
        )
    }
}

impl FromStr for ParameterInstanceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 4 {
            return Err(DomainError::MalformedInstanceId(s.to_string()));
        }
        let device = DeviceId {
            collection: parse_collection(parts[0])?,
            slot: parse_slot(parts[1])?,
        };
        let parameter_id: u32 = parts[2]
            .parse()
            .map_err(|_| DomainError::MalformedInstanceId(s.to_string()))?;
        let instance_id: u16 = parts[3]
            .parse()
            .map_err(|_| DomainError::MalformedInstanceId(s.to_string()))?;
        Ok(ParameterInstanceId {
            device,
            parameter_id,
            instance_id,
        })
    }
}

impl Serialize for ParameterInstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ParameterInstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Parameter instance path ──────────────────────────────────────────────────

/// A textual parameter reference: `/`-separated path segments, optionally
/// suffixed with `@<device>` (`"Channels/2/Value/IoValue@2-1"`). Without a
/// device suffix the headstation is addressed. Lookup is case-insensitive;
/// the canonical spelling is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterInstancePath {
    pub path: String,
    pub device: String,
}

impl ParameterInstancePath {
    pub fn new(path: impl Into<String>, device: impl Into<String>) -> Self {
        ParameterInstancePath {
            path: path.into(),
            device: device.into(),
        }
    }

    /// Headstation-scoped path.
    pub fn headstation(path: impl Into<String>) -> Self {
        ParameterInstancePath::new(path, "0-0")
    }

    pub fn device_id(&self) -> Result<DeviceId, DomainError> {
        self.device.parse()
    }
}

impl std::fmt::Display for ParameterInstancePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.device)
    }
}

impl FromStr for ParameterInstancePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((path, device)) => Ok(ParameterInstancePath::new(path, device)),
            None => Ok(ParameterInstancePath::headstation(s)),
        }
    }
}

impl Serialize for ParameterInstancePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ParameterInstancePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Other handles ────────────────────────────────────────────────────────────

/// Monotonic monitoring list handle, starting at 1. Ids are never reused
/// within a process lifetime; the counter wraps silently at `u64::MAX`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct MonitoringListId(pub u64);

impl std::fmt::Display for MonitoringListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new(s: impl Into<String>) -> Self {
        FileId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_round_trips() {
        let id = DeviceId::new(DeviceCollection::Rlb, 3);
        assert_eq!(id.to_string(), "1-3");
        assert_eq!("1-3".parse::<DeviceId>().unwrap(), id);
        assert_eq!("1/3".parse::<DeviceId>().unwrap(), id);
    }

    #[test]
    fn headstation_is_root_slot_zero() {
        assert_eq!(
            DeviceId::HEADSTATION,
            DeviceId::new(DeviceCollection::Root, 0)
        );
        assert_eq!("0-0".parse::<DeviceId>().unwrap(), DeviceId::HEADSTATION);
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let err = "9-0".parse::<DeviceId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidDeviceCollection(_)));
        let err = "300-0".parse::<DeviceId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidDeviceCollection(_)));
    }

    #[test]
    fn slot_overflow_is_rejected() {
        let err = "1-70000".parse::<DeviceId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidDeviceSlot(_)));
    }

    #[test]
    fn instance_id_round_trips() {
        let id = ParameterInstanceId::new(20001, 2, DeviceId::HEADSTATION);
        assert_eq!(id.to_string(), "0-0-20001-2");
        assert_eq!("0-0-20001-2".parse::<ParameterInstanceId>().unwrap(), id);
    }

    #[test]
    fn path_parses_device_suffix() {
        let p: ParameterInstancePath = "Channels/2/Value/IoValue@2-1".parse().unwrap();
        assert_eq!(p.path, "Channels/2/Value/IoValue");
        assert_eq!(
            p.device_id().unwrap(),
            DeviceId::new(DeviceCollection::Kbus, 1)
        );
        assert_eq!(p.to_string(), "Channels/2/Value/IoValue@2-1");
    }

    #[test]
    fn path_defaults_to_headstation() {
        let p: ParameterInstancePath = "Identity/OrderNumber".parse().unwrap();
        assert_eq!(p.device_id().unwrap(), DeviceId::HEADSTATION);
    }
}
