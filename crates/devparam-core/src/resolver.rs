//! Mapping `(id)` and `(path, device)` references onto live parameter
//! instances. Resolution happens under the already-held param mutex and
//! copies the small instance handle out, so nothing borrows past the lock.

use devparam_domain::{
    ParameterInstanceId, ParameterInstancePath, ParameterValue, StatusCode,
};
use devparam_model::{DefIdx, OverridePatch};
use devparam_provider::ProviderId;

use crate::device::{CoreState, Device};

/// Owned snapshot of one resolved instance, enough to plan a dispatch
/// without holding borrows into the device table.
#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub id: ParameterInstanceId,
    pub def: DefIdx,
    pub provider: Option<ProviderId>,
    pub fixed_value: Option<ParameterValue>,
    pub status_unavailable_if_not_provided: bool,
    pub patch: Option<OverridePatch>,
}

fn snapshot(device: &Device, parameter_id: u32, instance_id: u16) -> Option<ResolvedInstance> {
    let instance = device.instance(parameter_id, instance_id)?;
    Some(ResolvedInstance {
        id: instance.id,
        def: instance.def,
        provider: instance.provider,
        fixed_value: instance.fixed_value.clone(),
        status_unavailable_if_not_provided: instance.status_unavailable_if_not_provided,
        patch: device.override_patch(parameter_id).cloned(),
    })
}

pub fn resolve_id(state: &CoreState, id: ParameterInstanceId) -> Result<ResolvedInstance, StatusCode> {
    let device = state.device(id.device).ok_or(StatusCode::UnknownDevice)?;
    snapshot(device, id.parameter_id, id.instance_id).ok_or(StatusCode::UnknownParameterId)
}

pub fn resolve_path(
    state: &CoreState,
    path: &ParameterInstancePath,
) -> Result<ResolvedInstance, StatusCode> {
    let device_id = path.device_id().map_err(|e| e.status())?;
    let device = state.device(device_id).ok_or(StatusCode::UnknownDevice)?;
    let model = &state.model;

    // Feature-level parameters live at instance 0 under their full path.
    for feature_idx in &device.features {
        for def_idx in &model.feature(*feature_idx).parameters {
            let def = model.definition(*def_idx);
            if def.path.eq_ignore_ascii_case(&path.path) {
                return snapshot(device, def.id, 0).ok_or(StatusCode::UnknownParameterPath);
            }
        }
    }

    // Class members: `<base path>/<instance>/<member path>`.
    for feature_idx in &device.features {
        for class_idx in &model.feature(*feature_idx).classes {
            let class = model.class(*class_idx);
            let Some(rest) = strip_prefix_path(&path.path, &class.base_path) else {
                continue;
            };
            let Some((instance_segment, member)) = rest.split_once('/') else {
                continue;
            };
            let Ok(instance_id) = instance_segment.parse::<u16>() else {
                continue;
            };
            for def_idx in &class.parameters {
                let def = model.definition(*def_idx);
                if def.path.eq_ignore_ascii_case(member) {
                    return snapshot(device, def.id, instance_id)
                        .ok_or(StatusCode::UnknownParameterPath);
                }
            }
        }
    }

    Err(StatusCode::UnknownParameterPath)
}

/// Case-insensitive `prefix + "/"` strip.
fn strip_prefix_path<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path.len() <= prefix.len() + 1 {
        return None;
    }
    let (head, tail) = path.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) && tail.starts_with('/') {
        Some(&tail[1..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_strip_requires_segment_boundary() {
        assert_eq!(strip_prefix_path("TestClasses/2/Other", "TestClasses"), Some("2/Other"));
        assert_eq!(strip_prefix_path("testclasses/2/Other", "TestClasses"), Some("2/Other"));
        assert_eq!(strip_prefix_path("TestClassesX/2/Other", "TestClasses"), None);
        assert_eq!(strip_prefix_path("TestClasses", "TestClasses"), None);
    }
}
