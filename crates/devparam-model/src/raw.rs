//! Serde mirror of the metadata documents supplied by model and
//! device-description providers. Unknown fields are ignored for forward
//! compatibility; almost everything is optional here — validation happens
//! during compilation, where a missing field downgrades to a recorded
//! diagnostic instead of a parse failure.

use serde::Deserialize;
use serde_json::Value as Json;

use devparam_domain::responses::AllowedLength;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawModel {
    #[serde(rename = "WDMMVersion")]
    pub wdmm_version: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub features: Vec<RawFeature>,
    #[serde(default)]
    pub classes: Vec<RawClass>,
    #[serde(default)]
    pub enums: Vec<RawEnum>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawFeature {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    #[serde(default)]
    pub overrides: Vec<RawOverride>,
    #[serde(default)]
    pub beta: bool,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawClass {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    pub base_path: Option<String>,
    #[serde(rename = "BaseID")]
    pub base_id: Option<u32>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    #[serde(default)]
    pub overrides: Vec<RawOverride>,
    /// Inherited from the first include when absent.
    pub dynamic: Option<bool>,
    /// Inherited from the first include when absent.
    pub writeable: Option<bool>,
    #[serde(default)]
    pub beta: bool,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawParameter {
    #[serde(rename = "ID")]
    pub id: Option<u32>,
    pub path: Option<String>,
    /// Missing `Type` is fatal for this definition only: it is recorded and
    /// skipped during compilation.
    #[serde(rename = "Type")]
    pub value_type: Option<String>,
    pub rank: Option<String>,
    pub writeable: Option<bool>,
    pub user_setting: Option<bool>,
    pub only_online: Option<bool>,
    pub pattern: Option<String>,
    pub default_value: Option<Json>,
    pub allowed_values: Option<RawAllowedValues>,
    pub allowed_length: Option<AllowedLength>,
    #[serde(rename = "Enum")]
    pub enum_name: Option<String>,
    pub ref_class: Option<String>,
    #[serde(default)]
    pub ref_classes: Vec<String>,
    #[serde(default)]
    pub in_args: Vec<RawArgument>,
    #[serde(default)]
    pub out_args: Vec<RawArgument>,
    pub instance_key: Option<bool>,
    pub connection_changing: Option<bool>,
    pub beta: Option<bool>,
    pub deprecated: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawAllowedValues {
    #[serde(default)]
    pub list: Vec<Json>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawArgument {
    pub name: String,
    #[serde(rename = "Type")]
    pub value_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEnum {
    pub name: String,
    #[serde(default)]
    pub members: Vec<RawEnumMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEnumMember {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
}

/// A patch onto an already-declared parameter definition.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawOverride {
    #[serde(rename = "ID")]
    pub id: Option<u32>,
    pub inactive: Option<bool>,
    pub default_value: Option<Json>,
    pub pattern: Option<String>,
    pub allowed_values: Option<RawAllowedValues>,
    pub allowed_length: Option<AllowedLength>,
}

// ── Per-device descriptions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RawDeviceDescription {
    #[serde(rename = "WDMMVersion")]
    pub wdmm_version: Option<String>,
    pub model_reference: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub overrides: Vec<RawOverride>,
    #[serde(default)]
    pub instantiations: Vec<RawInstantiation>,
    #[serde(default)]
    pub parameter_values: Vec<RawParameterValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawInstantiation {
    pub class: String,
    #[serde(default)]
    pub instances: Vec<RawInstance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawInstance {
    #[serde(rename = "ID")]
    pub id: u16,
    #[serde(default)]
    pub parameter_values: Vec<RawParameterValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawParameterValue {
    #[serde(rename = "ID")]
    pub id: u32,
    pub value: Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = r#"{
            "WDMMVersion": "1.3.0",
            "Name": "Test",
            "FutureField": {"nested": true},
            "Features": [{"ID": "F", "Parameters": [{"ID": 1, "Path": "A/B", "Type": "String", "Unit": "mA"}]}]
        }"#;
        let raw: RawModel = serde_json::from_str(doc).unwrap();
        assert_eq!(raw.features.len(), 1);
        assert_eq!(raw.features[0].parameters[0].path.as_deref(), Some("A/B"));
    }

    #[test]
    fn description_parses_instantiations() {
        let doc = r#"{
            "ModelReference": "Test",
            "Features": ["TestFeature"],
            "Instantiations": [
                {"Class": "TestClass", "Instances": [
                    {"ID": 2, "ParameterValues": [{"ID": 20008, "Value": "Test2"}]}
                ]}
            ]
        }"#;
        let raw: RawDeviceDescription = serde_json::from_str(doc).unwrap();
        assert_eq!(raw.instantiations[0].instances[0].id, 2);
        assert_eq!(raw.features, vec!["TestFeature"]);
    }
}
