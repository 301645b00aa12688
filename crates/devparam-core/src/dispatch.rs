//! Batch dispatch: partition a request list into per-provider portions,
//! launch the provider calls outside the param mutex, and scatter the
//! answers back into the caller's slots in original order.
//!
//! Validation failures before launch poison every still-undetermined sibling
//! bound for the same provider — providers commit per batch, so a write that
//! is known to fail must not let its siblings through alone.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use devparam_domain::{
    ClassInstantiation, DeviceId, ParameterInstanceId, ParameterResponse, ParameterValue,
    SetParameterResponse, StatusCode, ValueType,
};
use devparam_model::{DefIdx, DeviceModel, EffectiveDefinition};
use devparam_provider::{
    DismissWatch, ParameterProvider, SerialLane, SetRequest, ValueResponse,
};

use crate::device::CoreState;
use crate::resolver::ResolvedInstance;

/// Statuses that poison same-provider siblings when detected before launch.
const POISONING: [StatusCode; 6] = [
    StatusCode::WrongValueType,
    StatusCode::WrongValuePattern,
    StatusCode::WrongValueRepresentation,
    StatusCode::ValueNull,
    StatusCode::InvalidValue,
    StatusCode::ValueNotPossible,
];

pub(crate) trait StatusSlot {
    fn status(&self) -> StatusCode;
    fn set_status(&mut self, status: StatusCode);
    fn set_message(&mut self, message: Option<String>);
}

macro_rules! status_slot {
    ($ty:ty) => {
        impl StatusSlot for $ty {
            fn status(&self) -> StatusCode {
                self.status
            }
            fn set_status(&mut self, status: StatusCode) {
                self.status = status;
            }
            fn set_message(&mut self, message: Option<String>) {
                self.message = message;
            }
        }
    };
}

status_slot!(ParameterResponse);
status_slot!(SetParameterResponse);
status_slot!(devparam_domain::MethodInvocationNamedResponse);

// ── Reads ────────────────────────────────────────────────────────────────────

pub(crate) struct ReadPortion {
    pub provider: Arc<dyn ParameterProvider>,
    pub provider_name: String,
    pub lane: Option<SerialLane>,
    pub ids: Vec<ParameterInstanceId>,
    pub defs: Vec<DefIdx>,
    pub positions: Vec<usize>,
}

pub(crate) struct ReadPlan {
    pub model: Arc<DeviceModel>,
    pub portions: Vec<ReadPortion>,
}

/// Step through every undetermined slot and either settle it locally
/// (methods, inactive, fixed values, unprovided) or queue it for its
/// provider. Runs under the param mutex.
pub(crate) fn plan_read(
    state: &CoreState,
    resolved: &[Option<ResolvedInstance>],
    responses: &mut [ParameterResponse],
) -> ReadPlan {
    let model = state.model.clone();
    let mut portions: HashMap<devparam_provider::ProviderId, ReadPortion> = HashMap::new();
    let mut order = Vec::new();

    for (position, slot) in resolved.iter().enumerate() {
        if responses[position].status.is_determined() {
            continue;
        }
        let Some(instance) = slot else {
            responses[position].status = StatusCode::InternalError;
            continue;
        };
        responses[position].id = Some(instance.id);

        let def = model.definition(instance.def);
        let effective = EffectiveDefinition {
            base: def,
            patch: instance.patch.as_ref(),
        };
        if def.is_method() {
            responses[position].status = StatusCode::MethodsDoNotHaveValue;
            continue;
        }
        if effective.inactive() {
            responses[position].status = StatusCode::StatusValueUnavailable;
            continue;
        }
        if let Some(value) = &instance.fixed_value {
            responses[position].status = StatusCode::Success;
            responses[position].value = Some(value.clone());
            continue;
        }
        let Some(provider_id) = instance.provider else {
            responses[position].status = if instance.status_unavailable_if_not_provided {
                StatusCode::StatusValueUnavailable
            } else {
                StatusCode::ParameterNotProvided
            };
            continue;
        };
        let Some(entry) = state.parameter_providers.get(provider_id) else {
            responses[position].status = StatusCode::ParameterNotProvided;
            continue;
        };

        let portion = portions.entry(provider_id).or_insert_with(|| {
            order.push(provider_id);
            ReadPortion {
                provider: entry.provider.clone(),
                provider_name: entry.provider.display_name(),
                lane: entry.data.lane.clone(),
                ids: Vec::new(),
                defs: Vec::new(),
                positions: Vec::new(),
            }
        });
        portion.ids.push(instance.id);
        portion.defs.push(instance.def);
        portion.positions.push(position);
    }

    let portions = order
        .into_iter()
        .filter_map(|id| portions.remove(&id))
        .collect();
    ReadPlan { model, portions }
}

/// Launch every portion (serialized providers through their lane), then
/// scatter and validate the answers. Runs outside any lock.
pub(crate) async fn execute_read(
    plan: ReadPlan,
    mut responses: Vec<ParameterResponse>,
    watch: DismissWatch,
) -> Vec<ParameterResponse> {
    let model = plan.model;
    let calls = plan.portions.into_iter().map(|portion| {
        let watch = watch.clone();
        let lane = portion.lane.clone();
        async move {
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            let result = portion
                .provider
                .get_parameter_values(portion.ids.clone(), watch.clone())
                .await;
            (portion, result)
        }
    });

    for (portion, result) in join_all(calls).await {
        integrate_read_portion(&model, portion, result, &mut responses);
    }
    responses
}

fn integrate_read_portion(
    model: &DeviceModel,
    portion: ReadPortion,
    result: anyhow::Result<Vec<ValueResponse>>,
    responses: &mut [ParameterResponse],
) {
    let values = match result {
        Ok(values) => values,
        Err(error) => {
            warn!(provider = %portion.provider_name, %error, "provider read failed");
            for position in &portion.positions {
                responses[*position].status = StatusCode::InternalError;
            }
            return;
        }
    };
    if values.len() != portion.ids.len() {
        warn!(
            provider = %portion.provider_name,
            expected = portion.ids.len(),
            got = values.len(),
            "provider answered with wrong entry count"
        );
        for position in &portion.positions {
            responses[*position].status = StatusCode::InternalError;
        }
        return;
    }

    for ((position, def_idx), answer) in portion
        .positions
        .iter()
        .zip(portion.defs.iter())
        .zip(values.into_iter())
    {
        let def = model.definition(*def_idx);
        let slot = &mut responses[*position];
        slot.domain_specific_status_code = answer.domain_specific_status_code;
        slot.message = answer.message;

        match answer.status {
            StatusCode::Success => match answer.value {
                None => {
                    warn!(
                        provider = %portion.provider_name,
                        id = %slot.id.map(|i| i.to_string()).unwrap_or_default(),
                        "provider reported success without a value"
                    );
                    slot.status = StatusCode::InternalError;
                }
                Some(value) => match value.promote(def.value_type, def.rank) {
                    Ok(value) => {
                        slot.status = StatusCode::Success;
                        slot.value = Some(value);
                    }
                    Err(error) => {
                        warn!(
                            provider = %portion.provider_name,
                            %error,
                            "provider value does not match the definition"
                        );
                        slot.status = StatusCode::InternalError;
                    }
                },
            },
            StatusCode::StatusValueUnavailable if !def.only_online => {
                warn!(
                    provider = %portion.provider_name,
                    "status-unavailable answer for an offline-capable parameter"
                );
                slot.status = StatusCode::InternalError;
            }
            other => {
                slot.status = other;
            }
        }
    }
}

// ── Writes ───────────────────────────────────────────────────────────────────

pub(crate) struct WritePortion {
    pub provider: Arc<dyn ParameterProvider>,
    pub provider_name: String,
    pub lane: Option<SerialLane>,
    pub requests: Vec<SetRequest>,
    pub positions: Vec<usize>,
    /// Slots carrying instantiation changes, applied to the device table
    /// after the provider confirms them.
    pub instantiations: Vec<(usize, DeviceId, Vec<ClassInstantiation>)>,
}

pub(crate) struct WritePlan {
    pub portions: Vec<WritePortion>,
    /// `Some(defer)` for connection-aware calls.
    pub defer_connection_changes: Option<bool>,
}

/// Validate every undetermined entry against its effective definition, poison
/// same-provider siblings of invalid entries, then partition. Instantiation
/// changes sort to the front of their portion so member writes targeting the
/// new instances land after them.
pub(crate) fn plan_write(
    state: &CoreState,
    resolved: &[Option<ResolvedInstance>],
    values: &[ParameterValue],
    responses: &mut [SetParameterResponse],
    defer_connection_changes: Option<bool>,
) -> WritePlan {
    let model = state.model.clone();

    struct Staged {
        position: usize,
        provider: devparam_provider::ProviderId,
        request: SetRequest,
        instantiation: Option<Vec<ClassInstantiation>>,
        device: DeviceId,
    }
    let mut staged: Vec<Staged> = Vec::new();
    // provider of every entry that got this far, for sibling poisoning
    let mut entry_provider: Vec<Option<devparam_provider::ProviderId>> =
        vec![None; resolved.len()];

    for (position, slot) in resolved.iter().enumerate() {
        let Some(instance) = slot else { continue };
        entry_provider[position] = instance.provider;
        if responses[position].status.is_determined() {
            continue;
        }

        let def = model.definition(instance.def);
        let effective = EffectiveDefinition {
            base: def,
            patch: instance.patch.as_ref(),
        };

        if def.is_method() || !def.writeable || effective.inactive() {
            responses[position].status = StatusCode::ParameterNotWriteable;
            continue;
        }
        if defer_connection_changes == Some(true) && def.connection_changing {
            responses[position].status = StatusCode::WdaConnectionChangesDeferred;
            continue;
        }

        let value = match values[position].promote(def.value_type, def.rank) {
            Ok(value) => value,
            Err(error) => {
                responses[position].status = error.status();
                continue;
            }
        };
        if let Some(status) = check_constraints(&model, effective, &value) {
            responses[position].status = status;
            continue;
        }

        let instantiation = match &value {
            ParameterValue::Instantiations(changes) => {
                if let Some(status) = check_instantiations(&model, changes) {
                    responses[position].status = status;
                    continue;
                }
                Some(changes.clone())
            }
            _ => None,
        };

        let Some(provider_id) = instance.provider else {
            responses[position].status = StatusCode::ParameterNotProvided;
            continue;
        };
        if state.parameter_providers.get(provider_id).is_none() {
            responses[position].status = StatusCode::ParameterNotProvided;
            continue;
        }

        staged.push(Staged {
            position,
            provider: provider_id,
            request: SetRequest {
                id: instance.id,
                definition_id: def.id,
                value,
            },
            instantiation,
            device: instance.id.device,
        });
    }

    // Sibling poisoning: an invalid or unauthorized entry takes down every
    // still-staged entry bound for the same provider.
    let mut poisoned: HashMap<devparam_provider::ProviderId, StatusCode> = HashMap::new();
    for (position, provider) in entry_provider.iter().enumerate() {
        let Some(provider) = provider else { continue };
        let status = responses[position].status;
        if POISONING.contains(&status) {
            poisoned.entry(*provider).or_insert(StatusCode::OtherInvalidValueInSet);
        } else if status == StatusCode::Unauthorized {
            poisoned
                .entry(*provider)
                .or_insert(StatusCode::OtherUnauthorizedRequestInSet);
        }
    }
    staged.retain(|entry| match poisoned.get(&entry.provider) {
        Some(status) => {
            responses[entry.position].status = *status;
            false
        }
        None => true,
    });

    // Instantiation changes first within each provider portion.
    staged.sort_by_key(|entry| (entry.provider, entry.instantiation.is_none()));

    let mut portions: Vec<WritePortion> = Vec::new();
    for entry in staged {
        let Some(provider_entry) = state.parameter_providers.get(entry.provider) else {
            responses[entry.position].status = StatusCode::ParameterNotProvided;
            continue;
        };
        let portion = match portions
            .iter_mut()
            .find(|p| Arc::ptr_eq(&p.provider, &provider_entry.provider))
        {
            Some(portion) => portion,
            None => {
                portions.push(WritePortion {
                    provider: provider_entry.provider.clone(),
                    provider_name: provider_entry.provider.display_name(),
                    lane: provider_entry.data.lane.clone(),
                    requests: Vec::new(),
                    positions: Vec::new(),
                    instantiations: Vec::new(),
                });
                portions.last_mut().unwrap()
            }
        };
        if let Some(changes) = entry.instantiation {
            portion
                .instantiations
                .push((entry.position, entry.device, changes));
        }
        portion.requests.push(entry.request);
        portion.positions.push(entry.position);
    }

    WritePlan {
        portions,
        defer_connection_changes,
    }
}

fn check_constraints(
    model: &DeviceModel,
    effective: EffectiveDefinition<'_>,
    value: &ParameterValue,
) -> Option<StatusCode> {
    if let Some(pattern) = effective.pattern() {
        let violated = match value {
            ParameterValue::String(s) => !pattern.matches(s),
            ParameterValue::Array(ValueType::String, items) => items.iter().any(|item| {
                matches!(item, ParameterValue::String(s) if !pattern.matches(s))
            }),
            _ => false,
        };
        if violated {
            return Some(StatusCode::WrongValuePattern);
        }
    }

    if let Some(allowed) = effective.allowed_values() {
        let violated = match value {
            ParameterValue::Array(_, items) => items.iter().any(|item| !allowed.contains(item)),
            scalar => !allowed.contains(scalar),
        };
        if violated {
            return Some(StatusCode::InvalidValue);
        }
    }

    if let Some(length) = effective.allowed_length() {
        let measured = match value {
            ParameterValue::String(s) => Some(s.chars().count() as u64),
            ParameterValue::Bytes(b) => Some(b.len() as u64),
            ParameterValue::Array(_, items) => Some(items.len() as u64),
            _ => None,
        };
        if let Some(measured) = measured {
            if length.min.is_some_and(|min| measured < min)
                || length.max.is_some_and(|max| measured > max)
            {
                return Some(StatusCode::ValueNotPossible);
            }
        }
    }

    if let Some(enum_idx) = effective.base.enum_ref {
        if let ParameterValue::EnumValue(member) = value {
            if !model.enum_definition(enum_idx).contains(*member) {
                return Some(StatusCode::ValueNotPossible);
            }
        }
    }

    None
}

/// An instantiation change must name known classes and supply every
/// instance-key member of each new instance.
fn check_instantiations(
    model: &DeviceModel,
    changes: &[ClassInstantiation],
) -> Option<StatusCode> {
    for change in changes {
        let Some(class_idx) = model.find_class(&change.class) else {
            return Some(StatusCode::InvalidValue);
        };
        let class = model.class(class_idx);
        let key_members: Vec<u32> = class
            .parameters
            .iter()
            .map(|idx| model.definition(*idx))
            .filter(|def| def.instance_key)
            .map(|def| def.id)
            .collect();
        for instance in &change.instances {
            for key in &key_members {
                if !instance.parameter_values.iter().any(|pv| pv.id == *key) {
                    return Some(StatusCode::MissingParameterForInstantiation);
                }
            }
        }
    }
    None
}

/// Confirmed instantiation changes, handed back so the service can update
/// the device table under the param mutex.
pub(crate) type ConfirmedInstantiations = Vec<(DeviceId, Vec<ClassInstantiation>)>;

pub(crate) async fn execute_write(
    plan: WritePlan,
    mut responses: Vec<SetParameterResponse>,
    watch: DismissWatch,
) -> (Vec<SetParameterResponse>, ConfirmedInstantiations) {
    let defer = plan.defer_connection_changes;
    let calls = plan.portions.into_iter().map(|portion| {
        let watch = watch.clone();
        let lane = portion.lane.clone();
        async move {
            let _slot = match &lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            let result = match defer {
                Some(defer) => {
                    portion
                        .provider
                        .set_parameter_values_connection_aware(
                            portion.requests.clone(),
                            defer,
                            watch.clone(),
                        )
                        .await
                }
                None => {
                    portion
                        .provider
                        .set_parameter_values(portion.requests.clone(), watch.clone())
                        .await
                }
            };
            (portion, result)
        }
    });

    let mut confirmed: ConfirmedInstantiations = Vec::new();
    for (portion, result) in join_all(calls).await {
        let answers = match result {
            Ok(answers) => answers,
            Err(error) => {
                warn!(provider = %portion.provider_name, %error, "provider write failed");
                for position in &portion.positions {
                    responses[*position].status = StatusCode::InternalError;
                }
                continue;
            }
        };
        if answers.len() != portion.requests.len() {
            warn!(
                provider = %portion.provider_name,
                expected = portion.requests.len(),
                got = answers.len(),
                "provider answered with wrong entry count"
            );
            for position in &portion.positions {
                responses[*position].status = StatusCode::InternalError;
            }
            continue;
        }
        for (position, answer) in portion.positions.iter().zip(answers.into_iter()) {
            responses[*position] = answer;
        }
        for (position, device, changes) in portion.instantiations {
            if responses[position].status.is_success() {
                confirmed.push((device, changes));
            }
        }
    }
    (responses, confirmed)
}
