//! Metadata compilation: raw documents in, immutable [`DeviceModel`] out.
//!
//! Passes: parse → include resolution (toposort over the include graph) →
//! override application → cross-linking of enum and class references.
//! Structural faults (cycles, redefinitions) fail the whole compilation;
//! local faults (a parameter without a `Type`, a dangling reference) are
//! downgraded to diagnostics and the offending piece is skipped.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use devparam_domain::{ParameterValue, Rank, ValueType};

use crate::error::ModelError;
use crate::model::{
    Class, ClassIdx, CompiledInstance, CompiledInstantiation, CompiledPattern, DefIdx,
    DeviceDescription, DeviceModel, EnumDefinition, EnumMember, Feature, FeatureIdx,
    MethodArgument, OverridePatch, ParameterDefinition,
};
use crate::raw::{
    RawClass, RawDeviceDescription, RawFeature, RawModel, RawOverride, RawParameter,
};

/// A recorded, non-fatal compilation fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub scope: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct CompiledModel {
    pub model: Arc<DeviceModel>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

struct Compiler {
    model: DeviceModel,
    diagnostics: Vec<CompileDiagnostic>,
}

impl Compiler {
    fn diagnose(&mut self, scope: &str, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(scope, %detail, "model compile diagnostic");
        self.diagnostics.push(CompileDiagnostic {
            scope: scope.to_string(),
            detail,
        });
    }
}

/// Compile the concatenation of every registered model provider's document.
pub fn compile_model(documents: &[String]) -> Result<CompiledModel, ModelError> {
    let mut raws = Vec::new();
    for (n, doc) in documents.iter().enumerate() {
        let raw: RawModel = serde_json::from_str(doc).map_err(|source| ModelError::Parse {
            scope: format!("model document {n}"),
            source,
        })?;
        raws.push(raw);
    }

    let mut compiler = Compiler {
        model: DeviceModel::empty(),
        diagnostics: Vec::new(),
    };

    compile_enums(&mut compiler, &raws)?;
    compile_classes(&mut compiler, &raws)?;
    compile_features(&mut compiler, &raws)?;

    debug!(
        features = compiler.model.features.len(),
        classes = compiler.model.classes.len(),
        definitions = compiler.model.definitions.len(),
        "model compiled"
    );
    Ok(CompiledModel {
        model: Arc::new(compiler.model),
        diagnostics: compiler.diagnostics,
    })
}

fn compile_enums(compiler: &mut Compiler, raws: &[RawModel]) -> Result<(), ModelError> {
    for raw in raws {
        for e in &raw.enums {
            let key = e.name.to_ascii_lowercase();
            if compiler.model.enum_names.contains_key(&key) {
                return Err(ModelError::DuplicateName {
                    kind: "enum",
                    name: e.name.clone(),
                });
            }
            let idx = crate::model::EnumIdx(compiler.model.enums.len() as u32);
            compiler.model.enums.push(EnumDefinition {
                name: e.name.clone(),
                members: e
                    .members
                    .iter()
                    .map(|m| EnumMember {
                        id: m.id,
                        name: m.name.clone(),
                    })
                    .collect(),
            });
            compiler.model.enum_names.insert(key, idx);
        }
    }
    Ok(())
}

/// Topological order over an include graph; nodes are container names.
fn include_order<'a>(
    kind: &'static str,
    names: &[&'a str],
    includes_of: impl Fn(&str) -> &'a [String],
) -> Result<Vec<&'a str>, ModelError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let node_map: HashMap<&str, NodeIndex> =
        names.iter().map(|n| (*n, graph.add_node(*n))).collect();
    let lower: HashMap<String, &str> = names
        .iter()
        .map(|n| (n.to_ascii_lowercase(), *n))
        .collect();

    for name in names {
        for include in includes_of(name) {
            let target = lower.get(&include.to_ascii_lowercase()).ok_or_else(|| {
                ModelError::UnknownInclude {
                    kind,
                    name: name.to_string(),
                    include: include.clone(),
                }
            })?;
            // include must be compiled before its includer
            graph.add_edge(node_map[target], node_map[*name], ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| ModelError::IncludeCycle {
        kind,
        name: graph[cycle.node_id()].to_string(),
    })?;
    Ok(order.into_iter().map(|idx| graph[idx]).collect())
}

fn compile_classes(compiler: &mut Compiler, raws: &[RawModel]) -> Result<(), ModelError> {
    let mut by_name: HashMap<&str, &RawClass> = HashMap::new();
    let mut names: Vec<&str> = Vec::new();
    for raw in raws {
        for class in &raw.classes {
            let Some(name) = class.id.as_deref() else {
                compiler.diagnose("classes", "class without ID skipped");
                continue;
            };
            if by_name.insert(name, class).is_some() {
                return Err(ModelError::DuplicateName {
                    kind: "class",
                    name: name.to_string(),
                });
            }
            names.push(name);
        }
    }

    let order = include_order("class", &names, |n| by_name[n].includes.as_slice())?;
    for name in order {
        let raw = by_name[name];
        let includes: Vec<ClassIdx> = raw
            .includes
            .iter()
            .filter_map(|i| compiler.model.find_class(i))
            .collect();

        // Inherit the instantiation scope from the first include when the
        // derived class declares none of its own.
        let first = includes.first().map(|i| compiler.model.class(*i));
        let base_path = raw
            .base_path
            .clone()
            .or_else(|| first.map(|c| c.base_path.clone()));
        let base_id = raw.base_id.or_else(|| first.map(|c| c.base_id));
        let dynamic = raw.dynamic.unwrap_or_else(|| first.is_some_and(|c| c.dynamic));
        let writeable = raw
            .writeable
            .unwrap_or_else(|| first.is_some_and(|c| c.writeable));

        let (Some(base_path), Some(base_id)) = (base_path, base_id) else {
            compiler.diagnose(name, "class without BasePath/BaseID skipped");
            continue;
        };

        let idx = ClassIdx(compiler.model.classes.len() as u32);
        let inherited: Vec<DefIdx> = includes
            .iter()
            .flat_map(|i| compiler.model.class(*i).parameters.clone())
            .collect();
        let parameters = compile_parameter_set(
            compiler,
            name,
            inherited,
            &raw.parameters,
            &raw.overrides,
            None,
            Some(idx),
        )?;

        compiler.model.classes.push(Class {
            name: name.to_string(),
            base_path,
            base_id,
            dynamic,
            writeable,
            beta: raw.beta,
            deprecated: raw.deprecated,
            parameters,
        });
        compiler
            .model
            .class_names
            .insert(name.to_ascii_lowercase(), idx);
    }
    Ok(())
}

fn compile_features(compiler: &mut Compiler, raws: &[RawModel]) -> Result<(), ModelError> {
    let mut by_name: HashMap<&str, &RawFeature> = HashMap::new();
    let mut names: Vec<&str> = Vec::new();
    for raw in raws {
        for feature in &raw.features {
            let Some(name) = feature.id.as_deref() else {
                compiler.diagnose("features", "feature without ID skipped");
                continue;
            };
            if by_name.insert(name, feature).is_some() {
                return Err(ModelError::DuplicateName {
                    kind: "feature",
                    name: name.to_string(),
                });
            }
            names.push(name);
        }
    }

    let order = include_order("feature", &names, |n| by_name[n].includes.as_slice())?;
    for name in order {
        let raw = by_name[name];
        let includes: Vec<FeatureIdx> = raw
            .includes
            .iter()
            .filter_map(|i| compiler.model.find_feature(i))
            .collect();
        let mut classes: Vec<ClassIdx> = includes
            .iter()
            .flat_map(|i| compiler.model.feature(*i).classes.clone())
            .collect();
        for class_name in &raw.classes {
            match compiler.model.find_class(class_name) {
                Some(c) if !classes.contains(&c) => classes.push(c),
                Some(_) => {}
                None => compiler.diagnose(name, format!("unknown class '{class_name}'")),
            }
        }

        let idx = FeatureIdx(compiler.model.features.len() as u32);
        let inherited: Vec<DefIdx> = includes
            .iter()
            .flat_map(|i| compiler.model.feature(*i).parameters.clone())
            .collect();
        let parameters = compile_parameter_set(
            compiler,
            name,
            inherited,
            &raw.parameters,
            &raw.overrides,
            Some(idx),
            None,
        )?;

        compiler.model.features.push(Feature {
            name: name.to_string(),
            beta: raw.beta,
            deprecated: raw.deprecated,
            includes,
            classes,
            parameters,
        });
        compiler
            .model
            .feature_names
            .insert(name.to_ascii_lowercase(), idx);
    }
    Ok(())
}

/// Merge inherited definitions with a container's own, then apply the
/// container's explicit overrides. Plain redefinition of an inherited id or
/// path is a compilation error; only `Overrides` entries may touch them.
fn compile_parameter_set(
    compiler: &mut Compiler,
    scope: &str,
    inherited: Vec<DefIdx>,
    own: &[RawParameter],
    overrides: &[RawOverride],
    feature: Option<FeatureIdx>,
    class: Option<ClassIdx>,
) -> Result<Vec<DefIdx>, ModelError> {
    let mut effective: Vec<DefIdx> = Vec::new();
    let mut by_id: HashMap<u32, usize> = HashMap::new();
    let mut by_path: HashMap<String, u32> = HashMap::new();

    for idx in inherited {
        let def = compiler.model.definition(idx);
        let (id, path) = (def.id, def.path.to_ascii_lowercase());
        if let Some(pos) = by_id.get(&id) {
            // Diamond inheritance of the very same definition is fine.
            if effective[*pos] == idx {
                continue;
            }
            return Err(ModelError::ConflictingDefinition {
                id,
                path: def.path.clone(),
            });
        }
        by_id.insert(id, effective.len());
        by_path.insert(path, id);
        effective.push(idx);
    }

    for raw in own {
        let Some(def) = build_definition(compiler, scope, raw, feature, class) else {
            continue;
        };
        if by_id.contains_key(&def.id) || by_path.contains_key(&def.path.to_ascii_lowercase()) {
            return Err(ModelError::ConflictingDefinition {
                id: def.id,
                path: def.path,
            });
        }
        let idx = push_definition(compiler, def, true);
        let def = compiler.model.definition(idx);
        by_id.insert(def.id, effective.len());
        by_path.insert(def.path.to_ascii_lowercase(), def.id);
        effective.push(idx);
    }

    for patch in overrides {
        let Some(id) = patch.id else {
            compiler.diagnose(scope, "override without ID skipped");
            continue;
        };
        let Some(pos) = by_id.get(&id).copied() else {
            compiler.diagnose(scope, format!("override targets unknown parameter {id}"));
            continue;
        };
        let base = compiler.model.definition(effective[pos]).clone();
        match apply_override(compiler, scope, &base, patch) {
            Some(patched) => {
                // The base definition stays untouched for other containers;
                // this container sees a patched copy.
                effective[pos] = push_definition(compiler, patched, false);
            }
            None => continue,
        }
    }

    Ok(effective)
}

fn push_definition(compiler: &mut Compiler, def: ParameterDefinition, register_id: bool) -> DefIdx {
    let idx = DefIdx(compiler.model.definitions.len() as u32);
    if register_id {
        compiler.model.def_ids.entry(def.id).or_insert(idx);
    }
    compiler.model.definitions.push(def);
    idx
}

fn build_definition(
    compiler: &mut Compiler,
    scope: &str,
    raw: &RawParameter,
    feature: Option<FeatureIdx>,
    class: Option<ClassIdx>,
) -> Option<ParameterDefinition> {
    let Some(id) = raw.id else {
        compiler.diagnose(scope, "parameter without ID skipped");
        return None;
    };
    let Some(path) = raw.path.clone() else {
        compiler.diagnose(scope, format!("parameter {id} without Path skipped"));
        return None;
    };
    let Some(type_name) = raw.value_type.as_deref() else {
        compiler.diagnose(scope, format!("parameter {id} ('{path}') without Type skipped"));
        return None;
    };
    let value_type = match ValueType::parse(type_name) {
        Ok(t) => t,
        Err(_) => {
            compiler.diagnose(
                scope,
                format!("parameter {id} ('{path}') has unknown type '{type_name}', skipped"),
            );
            return None;
        }
    };
    let rank = match raw.rank.as_deref() {
        Some("Array") => Rank::Array,
        _ => Rank::Scalar,
    };

    let pattern = raw.pattern.as_deref().and_then(|p| {
        CompiledPattern::new(p)
            .map_err(|e| compiler.diagnose(scope, format!("parameter {id}: bad pattern: {e}")))
            .ok()
    });
    let default_value = raw.default_value.as_ref().and_then(|v| {
        promote_raw(v, value_type, rank)
            .map_err(|e| {
                compiler.diagnose(scope, format!("parameter {id}: bad default value: {e}"))
            })
            .ok()
    });
    let allowed_values = raw.allowed_values.as_ref().map(|av| {
        av.list
            .iter()
            .filter_map(|v| {
                promote_raw(v, value_type, Rank::Scalar)
                    .map_err(|e| {
                        compiler
                            .diagnose(scope, format!("parameter {id}: bad allowed value: {e}"))
                    })
                    .ok()
            })
            .collect::<Vec<_>>()
    });

    let enum_ref = raw.enum_name.as_deref().and_then(|name| {
        let found = compiler.model.find_enum(name);
        if found.is_none() {
            compiler.diagnose(scope, format!("parameter {id}: unknown enum '{name}'"));
        }
        found
    });
    let mut ref_classes = Vec::new();
    for name in raw.ref_class.iter().chain(raw.ref_classes.iter()) {
        match compiler.model.find_class(name) {
            Some(c) => ref_classes.push(c),
            None => compiler.diagnose(scope, format!("parameter {id}: unknown class '{name}'")),
        }
    }

    let mut build_args = |raw_args: &[crate::raw::RawArgument]| {
        raw_args
            .iter()
            .filter_map(|a| match ValueType::parse(&a.value_type) {
                Ok(t) => Some(MethodArgument {
                    name: a.name.clone(),
                    value_type: t,
                }),
                Err(_) => {
                    compiler.diagnose(
                        scope,
                        format!("parameter {id}: argument '{}' has unknown type", a.name),
                    );
                    None
                }
            })
            .collect::<Vec<_>>()
    };
    let in_args = build_args(&raw.in_args);
    let out_args = build_args(&raw.out_args);

    Some(ParameterDefinition {
        id,
        path,
        value_type,
        rank,
        writeable: raw.writeable.unwrap_or(false),
        user_setting: raw.user_setting.unwrap_or(false),
        only_online: raw.only_online.unwrap_or(false),
        beta: raw.beta.unwrap_or(false),
        deprecated: raw.deprecated.unwrap_or(false),
        inactive: false,
        instance_key: raw.instance_key.unwrap_or(false),
        connection_changing: raw.connection_changing.unwrap_or(false),
        default_value,
        pattern,
        allowed_values,
        allowed_length: raw.allowed_length,
        enum_ref,
        ref_classes,
        in_args,
        out_args,
        feature,
        class,
    })
}

/// Build the override patch for a definition, rejecting constraint widening.
fn compile_override_patch(
    compiler: &mut Compiler,
    scope: &str,
    base: &ParameterDefinition,
    raw: &RawOverride,
) -> Option<OverridePatch> {
    let id = base.id;

    let pattern = raw.pattern.as_deref().and_then(|p| {
        CompiledPattern::new(p)
            .map_err(|e| compiler.diagnose(scope, format!("override {id}: bad pattern: {e}")))
            .ok()
    });

    let default_value = raw.default_value.as_ref().and_then(|v| {
        promote_raw(v, base.value_type, base.rank)
            .map_err(|e| compiler.diagnose(scope, format!("override {id}: bad default: {e}")))
            .ok()
    });

    let allowed_values = match raw.allowed_values.as_ref() {
        None => None,
        Some(av) => {
            let values: Vec<ParameterValue> = av
                .list
                .iter()
                .filter_map(|v| promote_raw(v, base.value_type, Rank::Scalar).ok())
                .collect();
            if let Some(base_list) = &base.allowed_values {
                if values.iter().any(|v| !base_list.contains(v)) {
                    compiler.diagnose(
                        scope,
                        format!("override {id}: widening of allowed values rejected"),
                    );
                    return None;
                }
            }
            Some(values)
        }
    };

    let allowed_length = match raw.allowed_length {
        None => None,
        Some(patch) => {
            if let Some(base_len) = base.allowed_length {
                let widens_min = match (patch.min, base_len.min) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(p), Some(b)) => p < b,
                };
                let widens_max = match (patch.max, base_len.max) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(p), Some(b)) => p > b,
                };
                if widens_min || widens_max {
                    compiler.diagnose(
                        scope,
                        format!("override {id}: widening of allowed length rejected"),
                    );
                    return None;
                }
            }
            Some(patch)
        }
    };

    Some(OverridePatch {
        inactive: raw.inactive,
        default_value,
        pattern,
        allowed_values,
        allowed_length,
    })
}

fn apply_override(
    compiler: &mut Compiler,
    scope: &str,
    base: &ParameterDefinition,
    raw: &RawOverride,
) -> Option<ParameterDefinition> {
    let patch = compile_override_patch(compiler, scope, base, raw)?;
    let mut def = base.clone();
    if let Some(inactive) = patch.inactive {
        def.inactive = inactive;
    }
    if patch.default_value.is_some() {
        def.default_value = patch.default_value;
    }
    if patch.pattern.is_some() {
        def.pattern = patch.pattern;
    }
    if patch.allowed_values.is_some() {
        def.allowed_values = patch.allowed_values;
    }
    if patch.allowed_length.is_some() {
        def.allowed_length = patch.allowed_length;
    }
    Some(def)
}

fn promote_raw(
    raw: &serde_json::Value,
    ty: ValueType,
    rank: Rank,
) -> Result<ParameterValue, devparam_domain::ValueError> {
    ParameterValue::Unknown(raw.clone()).promote(ty, rank)
}

// ── Device descriptions ──────────────────────────────────────────────────────

/// Compile one device description against an already-compiled model.
pub fn compile_device_description(
    model: &DeviceModel,
    document: &str,
    scope: &str,
) -> Result<(DeviceDescription, Vec<CompileDiagnostic>), ModelError> {
    let raw: RawDeviceDescription =
        serde_json::from_str(document).map_err(|source| ModelError::Parse {
            scope: scope.to_string(),
            source,
        })?;

    let mut compiler = Compiler {
        model: DeviceModel::empty(),
        diagnostics: Vec::new(),
    };

    let mut overrides = HashMap::new();
    for patch in &raw.overrides {
        let Some(id) = patch.id else {
            compiler.diagnose(scope, "override without ID skipped");
            continue;
        };
        let Some(def_idx) = model.find_definition_by_id(id) else {
            compiler.diagnose(scope, format!("override targets unknown parameter {id}"));
            continue;
        };
        let base = model.definition(def_idx).clone();
        if let Some(compiled) = compile_override_patch(&mut compiler, scope, &base, patch) {
            overrides.insert(id, compiled);
        }
    }

    let promote_values = |compiler: &mut Compiler,
                          values: &[crate::raw::RawParameterValue]|
     -> Vec<(u32, ParameterValue)> {
        values
            .iter()
            .filter_map(|pv| {
                let value = match model.find_definition_by_id(pv.id) {
                    Some(idx) => {
                        let def = model.definition(idx);
                        match promote_raw(&pv.value, def.value_type, def.rank) {
                            Ok(v) => v,
                            Err(e) => {
                                compiler.diagnose(
                                    scope,
                                    format!("value for parameter {}: {e}", pv.id),
                                );
                                return None;
                            }
                        }
                    }
                    // Definition not in the model yet; keep the raw form.
                    None => ParameterValue::Unknown(pv.value.clone()),
                };
                Some((pv.id, value))
            })
            .collect()
    };

    let instantiations = raw
        .instantiations
        .iter()
        .map(|inst| CompiledInstantiation {
            class: inst.class.clone(),
            instances: inst
                .instances
                .iter()
                .map(|i| CompiledInstance {
                    id: i.id,
                    values: promote_values(&mut compiler, &i.parameter_values),
                })
                .collect(),
        })
        .collect();

    let parameter_values = promote_values(&mut compiler, &raw.parameter_values);

    Ok((
        DeviceDescription {
            model_reference: raw.model_reference,
            features: raw.features,
            overrides,
            instantiations,
            parameter_values,
        },
        compiler.diagnostics,
    ))
}
