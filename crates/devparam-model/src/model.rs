//! The compiled, immutable device model: arenas of features, classes, enums,
//! and parameter definitions with index handles for every cross-link. The
//! model is shared behind an `Arc` and never mutated in place — recompilation
//! produces a fresh instance.

use std::collections::HashMap;

use regex::Regex;

use devparam_domain::responses::{
    AllowedLength, AllowedValues, ArgumentInfo, ClassInfo, ParameterDefinitionInfo,
};
use devparam_domain::{ParameterValue, Rank, ValueType};

// ── Arena handles ────────────────────────────────────────────────────────────

macro_rules! arena_index {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_index!(FeatureIdx);
arena_index!(ClassIdx);
arena_index!(EnumIdx);
arena_index!(DefIdx);

// ── Definition pieces ────────────────────────────────────────────────────────

/// A `Pattern` constraint, kept with its source string so definitions stay
/// comparable and serializable.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub regex: Regex,
}

impl CompiledPattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(CompiledPattern {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    /// Whole-string match, as the original pattern checks behave.
    pub fn matches(&self, value: &str) -> bool {
        self.regex
            .find(value)
            .is_some_and(|m| m.start() == 0 && m.end() == value.len())
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodArgument {
    pub name: String,
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub id: u32,
    /// Feature parameters carry their full path; class parameters carry the
    /// member path below the instance segment.
    pub path: String,
    pub value_type: ValueType,
    pub rank: Rank,
    pub writeable: bool,
    pub user_setting: bool,
    pub only_online: bool,
    pub beta: bool,
    pub deprecated: bool,
    pub inactive: bool,
    pub instance_key: bool,
    pub connection_changing: bool,
    pub default_value: Option<ParameterValue>,
    pub pattern: Option<CompiledPattern>,
    pub allowed_values: Option<Vec<ParameterValue>>,
    pub allowed_length: Option<AllowedLength>,
    pub enum_ref: Option<EnumIdx>,
    pub ref_classes: Vec<ClassIdx>,
    pub in_args: Vec<MethodArgument>,
    pub out_args: Vec<MethodArgument>,
    pub feature: Option<FeatureIdx>,
    pub class: Option<ClassIdx>,
}

impl ParameterDefinition {
    pub fn is_method(&self) -> bool {
        self.value_type == ValueType::Method
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub beta: bool,
    pub deprecated: bool,
    pub includes: Vec<FeatureIdx>,
    pub classes: Vec<ClassIdx>,
    /// Effective set after include resolution and overrides.
    pub parameters: Vec<DefIdx>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub name: String,
    pub base_path: String,
    pub base_id: u32,
    pub dynamic: bool,
    pub writeable: bool,
    pub beta: bool,
    pub deprecated: bool,
    pub parameters: Vec<DefIdx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDefinition {
    pub name: String,
    pub members: Vec<EnumMember>,
}

impl EnumDefinition {
    pub fn contains(&self, member_id: u32) -> bool {
        self.members.iter().any(|m| m.id == member_id)
    }
}

// ── Per-device override patches ──────────────────────────────────────────────

/// A device-scoped patch onto a shared definition. The compiled model is
/// never mutated; devices hold their patches and validation reads through
/// [`EffectiveDefinition`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverridePatch {
    pub inactive: Option<bool>,
    pub default_value: Option<ParameterValue>,
    pub pattern: Option<CompiledPattern>,
    pub allowed_values: Option<Vec<ParameterValue>>,
    pub allowed_length: Option<AllowedLength>,
}

/// A definition as seen through a device's override patch.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveDefinition<'a> {
    pub base: &'a ParameterDefinition,
    pub patch: Option<&'a OverridePatch>,
}

impl<'a> EffectiveDefinition<'a> {
    pub fn unpatched(base: &'a ParameterDefinition) -> Self {
        EffectiveDefinition { base, patch: None }
    }

    pub fn inactive(&self) -> bool {
        self.patch
            .and_then(|p| p.inactive)
            .unwrap_or(self.base.inactive)
    }

    pub fn default_value(&self) -> Option<&'a ParameterValue> {
        self.patch
            .and_then(|p| p.default_value.as_ref())
            .or(self.base.default_value.as_ref())
    }

    pub fn pattern(&self) -> Option<&'a CompiledPattern> {
        self.patch
            .and_then(|p| p.pattern.as_ref())
            .or(self.base.pattern.as_ref())
    }

    pub fn allowed_values(&self) -> Option<&'a Vec<ParameterValue>> {
        self.patch
            .and_then(|p| p.allowed_values.as_ref())
            .or(self.base.allowed_values.as_ref())
    }

    pub fn allowed_length(&self) -> Option<AllowedLength> {
        self.patch
            .and_then(|p| p.allowed_length)
            .or(self.base.allowed_length)
    }
}

// ── The model ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DeviceModel {
    pub features: Vec<Feature>,
    pub classes: Vec<Class>,
    pub enums: Vec<EnumDefinition>,
    pub definitions: Vec<ParameterDefinition>,
    pub(crate) feature_names: HashMap<String, FeatureIdx>,
    pub(crate) class_names: HashMap<String, ClassIdx>,
    pub(crate) enum_names: HashMap<String, EnumIdx>,
    pub(crate) def_ids: HashMap<u32, DefIdx>,
}

impl DeviceModel {
    /// The model in place before any model provider registered.
    pub fn empty() -> Self {
        DeviceModel::default()
    }

    pub fn feature(&self, idx: FeatureIdx) -> &Feature {
        &self.features[idx.index()]
    }

    pub fn class(&self, idx: ClassIdx) -> &Class {
        &self.classes[idx.index()]
    }

    pub fn enum_definition(&self, idx: EnumIdx) -> &EnumDefinition {
        &self.enums[idx.index()]
    }

    pub fn definition(&self, idx: DefIdx) -> &ParameterDefinition {
        &self.definitions[idx.index()]
    }

    pub fn find_feature(&self, name: &str) -> Option<FeatureIdx> {
        self.feature_names.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn find_class(&self, name: &str) -> Option<ClassIdx> {
        self.class_names.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn find_enum(&self, name: &str) -> Option<EnumIdx> {
        self.enum_names.get(&name.to_ascii_lowercase()).copied()
    }

    /// The first-registered definition carrying this numeric id.
    pub fn find_definition_by_id(&self, id: u32) -> Option<DefIdx> {
        self.def_ids.get(&id).copied()
    }

    /// Name of the feature a definition belongs to, walking through its class
    /// when the definition is a class member.
    pub fn feature_name_of(&self, idx: DefIdx) -> Option<&str> {
        let def = self.definition(idx);
        if let Some(f) = def.feature {
            return Some(self.feature(f).name.as_str());
        }
        let class = def.class?;
        self.features
            .iter()
            .find(|f| f.classes.contains(&class))
            .map(|f| f.name.as_str())
    }

    /// Client-facing snapshot of a definition, optionally merged with a
    /// device's override patch.
    pub fn definition_info(
        &self,
        idx: DefIdx,
        patch: Option<&OverridePatch>,
    ) -> ParameterDefinitionInfo {
        let def = self.definition(idx);
        let eff = EffectiveDefinition { base: def, patch };
        ParameterDefinitionInfo {
            id: def.id,
            path: def.path.clone(),
            value_type: def.value_type,
            rank: def.rank,
            writeable: def.writeable,
            user_setting: def.user_setting,
            only_online: def.only_online,
            beta: def.beta,
            deprecated: def.deprecated,
            inactive: eff.inactive(),
            default_value: eff.default_value().cloned(),
            pattern: eff.pattern().map(|p| p.source.clone()),
            allowed_values: eff.allowed_values().map(|list| AllowedValues {
                list: list.clone(),
            }),
            allowed_length: eff.allowed_length(),
            enum_name: def.enum_ref.map(|e| self.enum_definition(e).name.clone()),
            ref_classes: def
                .ref_classes
                .iter()
                .map(|c| self.class(*c).name.clone())
                .collect(),
            feature: def.feature.map(|f| self.feature(f).name.clone()),
            class: def.class.map(|c| {
                let class = self.class(c);
                ClassInfo {
                    name: class.name.clone(),
                    base_path: class.base_path.clone(),
                    base_id: class.base_id,
                }
            }),
            in_args: def
                .in_args
                .iter()
                .map(|a| ArgumentInfo {
                    name: a.name.clone(),
                    value_type: a.value_type,
                })
                .collect(),
            out_args: def
                .out_args
                .iter()
                .map(|a| ArgumentInfo {
                    name: a.name.clone(),
                    value_type: a.value_type,
                })
                .collect(),
        }
    }
}

// ── Compiled device descriptions ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInstance {
    pub id: u16,
    pub values: Vec<(u32, ParameterValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInstantiation {
    pub class: String,
    pub instances: Vec<CompiledInstance>,
}

/// A device description compiled against a model: claimed features, override
/// patches, instantiation tables, and fixed parameter values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceDescription {
    pub model_reference: Option<String>,
    pub features: Vec<String>,
    pub overrides: HashMap<u32, OverridePatch>,
    pub instantiations: Vec<CompiledInstantiation>,
    pub parameter_values: Vec<(u32, ParameterValue)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_whole_string_only() {
        let p = CompiledPattern::new("Hallo (Du|Sie)").unwrap();
        assert!(p.matches("Hallo Du"));
        assert!(p.matches("Hallo Sie"));
        assert!(!p.matches("Hallo Welt"));
        assert!(!p.matches("xHallo Du"));
        assert!(!p.matches("Hallo Du!"));
    }

    #[test]
    fn effective_definition_prefers_patch() {
        let def = ParameterDefinition {
            id: 1,
            path: "A".into(),
            value_type: ValueType::UInt16,
            rank: Rank::Scalar,
            writeable: true,
            user_setting: false,
            only_online: false,
            beta: false,
            deprecated: false,
            inactive: false,
            instance_key: false,
            connection_changing: false,
            default_value: Some(ParameterValue::UInt16(1)),
            pattern: None,
            allowed_values: None,
            allowed_length: None,
            enum_ref: None,
            ref_classes: vec![],
            in_args: vec![],
            out_args: vec![],
            feature: None,
            class: None,
        };
        let patch = OverridePatch {
            inactive: Some(true),
            default_value: Some(ParameterValue::UInt16(5)),
            ..OverridePatch::default()
        };
        let eff = EffectiveDefinition {
            base: &def,
            patch: Some(&patch),
        };
        assert!(eff.inactive());
        assert_eq!(eff.default_value(), Some(&ParameterValue::UInt16(5)));
        let plain = EffectiveDefinition::unpatched(&def);
        assert!(!plain.inactive());
        assert_eq!(plain.default_value(), Some(&ParameterValue::UInt16(1)));
    }
}
