use serde::{Deserialize, Serialize};

use crate::ids::{DeviceCollection, DeviceId};

/// Which devices a provider registration claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    Any,
    WholeCollection(DeviceCollection),
    Specific(DeviceId),
}

impl DeviceSelector {
    pub fn headstation() -> Self {
        DeviceSelector::Specific(DeviceId::HEADSTATION)
    }

    pub fn matches(&self, device: DeviceId) -> bool {
        match self {
            DeviceSelector::Any => true,
            DeviceSelector::WholeCollection(c) => device.collection == *c,
            DeviceSelector::Specific(id) => device == *id,
        }
    }

    /// Higher wins when two providers claim the same device.
    pub fn specificity(&self) -> u8 {
        match self {
            DeviceSelector::Any => 0,
            DeviceSelector::WholeCollection(_) => 1,
            DeviceSelector::Specific(_) => 2,
        }
    }
}

impl serde::Serialize for DeviceCollection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for DeviceCollection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DeviceCollection::from_name(&s).map_err(serde::de::Error::custom)
    }
}

/// Which parameters a provider registration claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSelector {
    AllWithDefinitionId(u32),
    AllOfFeature(String),
    AllOfDevice(DeviceSelector),
}

impl ParameterSelector {
    /// Provider resolution order: definition id beats feature beats specific
    /// device beats whole collection beats any-device.
    pub fn specificity(&self) -> u8 {
        match self {
            ParameterSelector::AllWithDefinitionId(_) => 4,
            ParameterSelector::AllOfFeature(_) => 3,
            ParameterSelector::AllOfDevice(d) => d.specificity(),
        }
    }
}
