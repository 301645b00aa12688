mod support;

use std::sync::Arc;

use devparam_core::{ManualClock, StaticPermissions};
use devparam_domain::{
    ParameterFilter, ParameterInstanceId, ParameterSelector, ParameterValue, StatusCode,
    UserPermissions, ValuePathRequest,
};
use devparam_provider::testing::StaticParameterProvider;
use devparam_provider::{CallMode, ParameterProvider};

use support::{headstation_service_with, wait};

fn permissions() -> Arc<StaticPermissions> {
    Arc::new(
        StaticPermissions::new()
            .with_user(
                UserPermissions::new("reader")
                    .with_read("MyFeature")
                    .with_read("TestFeature"),
            )
            .with_user(
                UserPermissions::new("operator")
                    .with_read("MyFeature")
                    .with_read("TestFeature")
                    .with_write("TestFeature"),
            )
            .with_user(UserPermissions::new("nobody")),
    )
}

async fn service_with_rocket_provider() -> Arc<devparam_core::ParameterService> {
    let service =
        headstation_service_with(permissions(), Arc::new(ManualClock::new())).await;
    let provider = Arc::new(
        StaticParameterProvider::new(
            "rocket",
            vec![
                ParameterSelector::AllWithDefinitionId(42),
                ParameterSelector::AllOfFeature("TestFeature".into()),
                ParameterSelector::AllOfFeature("SecondFeature".into()),
            ],
        )
        .with_value(42, ParameterValue::Bool(true)),
    );
    wait(service.register_parameter_providers(
        vec![provider as Arc<dyn ParameterProvider>],
        CallMode::Concurrent,
    ))
    .await;
    service
}

#[tokio::test]
async fn root_sees_exactly_the_unfiltered_result() {
    let service = service_with_rocket_provider().await;
    let ids = vec![
        ParameterInstanceId::headstation(42),
        ParameterInstanceId::headstation(10000),
    ];

    let plain = wait(service.get_parameters(ids.clone())).await;
    let as_root = wait(service.authorized("root").get_parameters(ids)).await;
    assert_eq!(plain, as_root);
}

#[tokio::test]
async fn missing_read_permission_marks_the_slot() {
    let service = service_with_rocket_provider().await;
    let authorized = service.authorized("nobody");

    let responses = wait(authorized.get_parameters(vec![ParameterInstanceId::headstation(42)])).await;
    assert_eq!(responses[0].status, StatusCode::Unauthorized);
    assert!(responses[0]
        .message
        .as_deref()
        .unwrap()
        .contains("myfeature.read"));
}

#[tokio::test]
async fn granted_read_permission_passes_through() {
    let service = service_with_rocket_provider().await;
    let authorized = service.authorized("reader");

    let responses = wait(authorized.get_parameters(vec![ParameterInstanceId::headstation(42)])).await;
    assert_eq!(responses[0].status, StatusCode::Success);
    assert_eq!(responses[0].value, Some(ParameterValue::Bool(true)));
}

#[tokio::test]
async fn write_without_permission_poisons_provider_siblings() {
    let service = service_with_rocket_provider().await;
    // operator may write TestFeature but not SecondFeature; both land on the
    // same provider.
    let authorized = service.authorized("operator");

    let responses = wait(authorized.set_parameter_values_by_path(vec![
        ValuePathRequest::new(
            "Second/Writeable".parse().unwrap(),
            ParameterValue::String("x".into()),
        ),
        ValuePathRequest::new(
            "Test/WriteableParamWithPattern".parse().unwrap(),
            ParameterValue::String("Hallo Du".into()),
        ),
    ]))
    .await;

    assert_eq!(responses[0].status, StatusCode::Unauthorized);
    assert_eq!(responses[1].status, StatusCode::OtherUnauthorizedRequestInSet);
}

#[tokio::test]
async fn reads_are_not_write_gated() {
    let service = service_with_rocket_provider().await;
    // reader has no write permissions at all
    let authorized = service.authorized("reader");

    let write = wait(authorized.set_parameter_values_by_path(vec![ValuePathRequest::new(
        "Test/WriteableParamWithPattern".parse().unwrap(),
        ParameterValue::String("Hallo Du".into()),
    )]))
    .await;
    assert_eq!(write[0].status, StatusCode::Unauthorized);

    let read = wait(
        authorized.get_parameters_by_path(vec!["Test/WriteableParamWithPattern".parse().unwrap()]),
    )
    .await;
    assert_ne!(read[0].status, StatusCode::Unauthorized);
}

#[tokio::test]
async fn empty_read_set_short_circuits_bulk_queries() {
    let service = service_with_rocket_provider().await;
    let authorized = service.authorized("nobody");

    let all = wait(authorized.get_all_parameters(ParameterFilter::any(), 0, usize::MAX)).await;
    assert_eq!(all.status, StatusCode::Success);
    assert!(all.parameters.is_empty());
    assert_eq!(all.total_count, 0);
}

#[tokio::test]
async fn bulk_queries_are_filtered_to_readable_features() {
    let service = service_with_rocket_provider().await;

    let everything = wait(service.get_all_parameter_definitions(ParameterFilter::any(), 0, usize::MAX)).await;
    let filtered = wait(
        service
            .authorized("reader")
            .get_all_parameter_definitions(ParameterFilter::any(), 0, usize::MAX),
    )
    .await;
    assert!(filtered.total_count < everything.total_count);
    for response in &filtered.parameters {
        let feature = response.definition.as_ref().unwrap().feature.clone();
        let class = response.definition.as_ref().unwrap().class.clone();
        // every surviving entry belongs to a readable feature, directly or
        // through its class
        assert!(
            feature.as_deref() == Some("MyFeature")
                || feature.as_deref() == Some("TestFeature")
                || class.is_some(),
            "unexpected entry {:?}",
            response.path
        );
    }
}

#[tokio::test]
async fn monitoring_reads_apply_the_read_check() {
    let service = service_with_rocket_provider().await;
    let authorized = service.authorized("nobody");

    let created = wait(authorized.create_monitoring_list(
        vec![ParameterInstanceId::headstation(42)],
        5,
    ))
    .await;
    let list = created.list.unwrap();

    let values = wait(authorized.get_values_for_monitoring_list(list.id)).await;
    assert_eq!(values.status, StatusCode::Success);
    assert_eq!(values.values[0].status, StatusCode::Unauthorized);
}
