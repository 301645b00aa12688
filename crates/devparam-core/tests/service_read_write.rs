mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use devparam_core::ParameterService;
use devparam_domain::{
    DeviceId, ParameterInstanceId, ParameterInstancePath, ParameterSelector, ParameterValue,
    SetParameterResponse, StatusCode, ValuePathRequest, ValueRequest,
};
use devparam_provider::testing::StaticParameterProvider;
use devparam_provider::{CallMode, ParameterProvider};

use support::{headstation_service, wait};

async fn register(service: &Arc<ParameterService>, provider: Arc<StaticParameterProvider>) {
    let responses = wait(service.register_parameter_providers(
        vec![provider as Arc<dyn ParameterProvider>],
        CallMode::Concurrent,
    ))
    .await;
    assert!(responses.iter().all(|r| r.status.is_success()));
}

#[tokio::test]
async fn round_trip_read_by_id() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(42)])
            .with_value(42, ParameterValue::Bool(true)),
    );
    register(&service, provider).await;

    let responses = wait(service.get_parameters(vec![ParameterInstanceId::headstation(42)])).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, StatusCode::Success);
    assert_eq!(responses[0].value, Some(ParameterValue::Bool(true)));
    assert_eq!(responses[0].id, Some(ParameterInstanceId::headstation(42)));
    assert_eq!(responses[0].id.unwrap().to_string(), "0-0-42-0");
}

#[tokio::test]
async fn class_instance_path_resolves() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllOfFeature("TestFeature".into())])
            .with_value(20001, ParameterValue::UInt16(7)),
    );
    register(&service, provider).await;

    let responses = wait(
        service.get_parameters_by_path(vec!["TestClasses/2/OtherParam".parse().unwrap()]),
    )
    .await;
    assert_eq!(responses[0].status, StatusCode::Success, "{:?}", responses[0]);
    assert_eq!(responses[0].value, Some(ParameterValue::UInt16(7)));
    assert_eq!(responses[0].id.unwrap().parameter_id, 20001);
    assert_eq!(responses[0].id.unwrap().instance_id, 2);

    // The definition is the same with or without a provider and points into
    // the owning class.
    let definitions = wait(
        service.get_parameter_definitions_by_path(vec![
            "TestClasses/2/OtherParam".parse().unwrap()
        ]),
    )
    .await;
    let definition = definitions[0].definition.as_ref().unwrap();
    assert_eq!(definition.id, 20001);
    let class = definition.class.as_ref().unwrap();
    assert_eq!(class.name, "TestClass");
    assert_eq!(class.base_id, 2007);
    assert_eq!(class.base_path, "TestClasses");
}

#[tokio::test]
async fn path_lookup_is_case_insensitive() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(42)])
            .with_value(42, ParameterValue::Bool(false)),
    );
    register(&service, provider).await;

    let responses = wait(
        service.get_parameters_by_path(vec!["myfeature/MYPARAMETER".parse().unwrap()]),
    )
    .await;
    assert_eq!(responses[0].status, StatusCode::Success);
}

#[tokio::test]
async fn resolution_errors_land_in_matching_slots() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(42)])
            .with_value(42, ParameterValue::Bool(true)),
    );
    register(&service, provider).await;

    let responses = wait(service.get_parameters_by_path(vec![
        "MyFeature/MyParameter".parse().unwrap(),
        "No/Such/Path".parse().unwrap(),
        "MyFeature/MyParameter@1-9".parse().unwrap(),
        "TestClasses/OtherParam".parse().unwrap(),
    ]))
    .await;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0].status, StatusCode::Success);
    assert_eq!(responses[1].status, StatusCode::UnknownParameterPath);
    assert_eq!(responses[2].status, StatusCode::UnknownDevice);
    // class member without an instance segment
    assert_eq!(responses[3].status, StatusCode::UnknownParameterPath);
}

#[tokio::test]
async fn fixed_values_answer_without_a_provider() {
    let service = headstation_service().await;

    let responses = wait(service.get_parameters_by_path(vec![
        "Identity/OrderNumber".parse().unwrap(),
        "Services/1/Name".parse().unwrap(),
    ]))
    .await;
    assert_eq!(responses[0].status, StatusCode::Success);
    assert_eq!(
        responses[0].value,
        Some(ParameterValue::String("0768-3301".into()))
    );
    assert_eq!(responses[1].status, StatusCode::Success);
    assert_eq!(responses[1].value, Some(ParameterValue::String("SSH".into())));
}

#[tokio::test]
async fn unprovided_parameter_is_reported() {
    let service = headstation_service().await;
    let responses =
        wait(service.get_parameters(vec![ParameterInstanceId::headstation(10000)])).await;
    assert_eq!(responses[0].status, StatusCode::ParameterNotProvided);
}

#[tokio::test]
async fn inactive_override_makes_value_unavailable() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(10006)])
            .with_value(10006, ParameterValue::UInt16(1)),
    );
    register(&service, provider).await;

    let read = wait(
        service.get_parameters_by_path(vec!["Test/OverriddenByDevice".parse().unwrap()]),
    )
    .await;
    assert_eq!(read[0].status, StatusCode::StatusValueUnavailable);

    let written = wait(service.set_parameter_values_by_path(vec![ValuePathRequest::new(
        "Test/OverriddenByDevice".parse().unwrap(),
        ParameterValue::UInt16(3),
    )]))
    .await;
    assert_eq!(written[0].status, StatusCode::ParameterNotWriteable);
}

#[tokio::test]
async fn write_batch_contamination() {
    let service = headstation_service().await;
    let provider = Arc::new(StaticParameterProvider::new(
        "rocket",
        vec![ParameterSelector::AllOfFeature("TestFeature".into())],
    ));
    register(&service, provider.clone()).await;

    let responses = wait(service.set_parameter_values_by_path(vec![
        ValuePathRequest::new(
            "Test/WriteableParamWithPattern".parse().unwrap(),
            ParameterValue::String("Hallo Welt".into()),
        ),
        ValuePathRequest::new(
            "Services/1/Enable".parse().unwrap(),
            ParameterValue::Bool(true),
        ),
        ValuePathRequest::new(
            "Test/WriteableParamWithPattern".parse().unwrap(),
            ParameterValue::String("Hallo Du".into()),
        ),
    ]))
    .await;

    assert_eq!(responses[0].status, StatusCode::WrongValuePattern);
    assert_eq!(responses[1].status, StatusCode::OtherInvalidValueInSet);
    assert_eq!(responses[2].status, StatusCode::OtherInvalidValueInSet);
    // the provider never saw any part of the contaminated batch
    assert!(provider.recorded_sets().is_empty());
}

#[tokio::test]
async fn valid_write_batch_reaches_the_provider_in_order() {
    let service = headstation_service().await;
    let provider = Arc::new(StaticParameterProvider::new(
        "rocket",
        vec![ParameterSelector::AllOfFeature("TestFeature".into())],
    ));
    register(&service, provider.clone()).await;

    let responses = wait(service.set_parameter_values_by_path(vec![
        ValuePathRequest::new(
            "Test/WriteableParamWithPattern".parse().unwrap(),
            ParameterValue::String("Hallo Sie".into()),
        ),
        ValuePathRequest::new(
            "Services/1/Enable".parse().unwrap(),
            ParameterValue::Bool(true),
        ),
    ]))
    .await;
    assert!(responses.iter().all(|r| r.status == StatusCode::Success));

    let sets = provider.recorded_sets();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].definition_id, 10001);
    assert_eq!(
        sets[0].value,
        ParameterValue::String("Hallo Sie".into())
    );
    assert_eq!(sets[1].definition_id, 2300);
}

#[tokio::test]
async fn provider_error_details_are_surfaced() {
    let service = headstation_service().await;
    let failure = SetParameterResponse {
        status: StatusCode::CouldNotSetParameter,
        domain_specific_status_code: Some(43),
        message: Some("Mein Fehlertext".into()),
        ..SetParameterResponse::default()
    };
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllOfFeature("TestFeature".into())])
            .with_set_failure(failure),
    );
    register(&service, provider).await;

    let responses = wait(service.set_parameter_values_by_path(vec![ValuePathRequest::new(
        "Test/WriteableParamWithPattern".parse().unwrap(),
        ParameterValue::String("Hallo Du".into()),
    )]))
    .await;
    assert_eq!(responses[0].status, StatusCode::CouldNotSetParameter);
    assert_eq!(responses[0].domain_specific_status_code, Some(43));
    assert_eq!(responses[0].message.as_deref(), Some("Mein Fehlertext"));
}

#[tokio::test]
async fn write_by_id_validates_enum_members() {
    let service = headstation_service().await;
    let provider = Arc::new(StaticParameterProvider::new(
        "rocket",
        vec![ParameterSelector::AllOfFeature("TestFeature".into())],
    ));
    register(&service, provider).await;

    let responses = wait(service.set_parameter_values(vec![
        ValueRequest::new(
            ParameterInstanceId::headstation(10003),
            ParameterValue::EnumValue(9),
        ),
    ]))
    .await;
    assert_eq!(responses[0].status, StatusCode::ValueNotPossible);

    let responses = wait(service.set_parameter_values(vec![
        ValueRequest::new(
            ParameterInstanceId::headstation(10003),
            ParameterValue::EnumValue(2),
        ),
    ]))
    .await;
    assert_eq!(responses[0].status, StatusCode::Success);
}

#[tokio::test]
async fn connection_aware_writes_can_defer() {
    let service = headstation_service().await;
    let provider = Arc::new(StaticParameterProvider::new(
        "rocket",
        vec![ParameterSelector::AllOfFeature("TestFeature".into())],
    ));
    register(&service, provider.clone()).await;

    let request = || {
        vec![ValuePathRequest::new(
            "Test/ConnectionParam".parse::<ParameterInstancePath>().unwrap(),
            ParameterValue::String("wss://next".into()),
        )]
    };

    let deferred =
        wait(service.set_parameter_values_by_path_connection_aware(request(), true)).await;
    assert_eq!(deferred[0].status, StatusCode::WdaConnectionChangesDeferred);
    assert!(deferred[0].status.is_success());
    assert!(provider.recorded_sets().is_empty());

    let applied =
        wait(service.set_parameter_values_by_path_connection_aware(request(), false)).await;
    assert_eq!(applied[0].status, StatusCode::Success);
    assert_eq!(provider.recorded_sets().len(), 1);
}

#[tokio::test]
async fn method_invocation_maps_named_out_args() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllOfFeature("TestFeature".into())])
            .with_method_result(10002, vec![ParameterValue::String("payload".into())]),
    );
    register(&service, provider).await;

    let response = wait(service.invoke_method_by_path(
        "Test/MethodWithOutArgs".parse().unwrap(),
        BTreeMap::new(),
    ))
    .await;
    assert_eq!(response.status, StatusCode::Success);
    assert_eq!(
        response.out_args.get("Data"),
        Some(&ParameterValue::String("payload".into()))
    );
}

#[tokio::test]
async fn reading_a_method_is_rejected() {
    let service = headstation_service().await;
    let responses =
        wait(service.get_parameters(vec![ParameterInstanceId::headstation(10002)])).await;
    assert_eq!(responses[0].status, StatusCode::MethodsDoNotHaveValue);
}

#[tokio::test]
async fn provider_unregistration_unlinks_and_reregistration_restores() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(42)])
            .with_value(42, ParameterValue::Bool(true)),
    );
    register(&service, provider.clone()).await;

    let id = ParameterInstanceId::headstation(42);
    let before = wait(service.get_parameters(vec![id])).await;
    assert_eq!(before[0].status, StatusCode::Success);

    service.unregister_parameter_providers(vec![provider.clone() as Arc<dyn ParameterProvider>]);
    let gone = wait(service.get_parameters(vec![id])).await;
    assert_eq!(gone[0].status, StatusCode::ParameterNotProvided);

    register(&service, provider).await;
    let back = wait(service.get_parameters(vec![id])).await;
    assert_eq!(back[0].status, StatusCode::Success);
    assert_eq!(back[0].value, Some(ParameterValue::Bool(true)));
}

#[tokio::test]
async fn device_lifecycle_statuses() {
    let service = headstation_service().await;

    let again = wait(service.register_devices(vec![
        devparam_domain::RegisterDeviceRequest::new(
            DeviceId::HEADSTATION,
            support::ORDER_NUMBER,
            support::FIRMWARE,
        ),
    ]))
    .await;
    assert_eq!(again[0].status, StatusCode::DeviceAlreadyExists);

    let gone = wait(service.unregister_devices(vec![DeviceId::HEADSTATION])).await;
    assert_eq!(gone[0].status, StatusCode::Success);

    let read = wait(service.get_parameters(vec![ParameterInstanceId::headstation(42)])).await;
    assert_eq!(read[0].status, StatusCode::UnknownDevice);
}

#[tokio::test]
async fn get_all_parameters_filters_and_pages() {
    let service = headstation_service().await;
    let provider = Arc::new(
        StaticParameterProvider::new("rocket", vec![ParameterSelector::AllWithDefinitionId(42)])
            .with_value(42, ParameterValue::Bool(true)),
    );
    register(&service, provider).await;

    let filter = devparam_domain::ParameterFilter::only_features(["MyFeature".to_string()]);
    let all = wait(service.get_all_parameters(filter.clone(), 0, usize::MAX)).await;
    assert_eq!(all.status, StatusCode::Success);
    assert_eq!(all.total_count, 1);
    assert_eq!(all.parameters[0].path.as_deref(), Some("MyFeature/MyParameter"));
    assert_eq!(all.parameters[0].value, Some(ParameterValue::Bool(true)));

    let paged = wait(service.get_all_parameters(filter, 1, usize::MAX)).await;
    assert_eq!(paged.total_count, 1);
    assert!(paged.parameters.is_empty());

    let methods =
        wait(service.get_all_method_definitions(devparam_domain::ParameterFilter::any(), 0, usize::MAX))
            .await;
    assert_eq!(methods.total_count, 1);
    assert_eq!(
        methods.parameters[0].path.as_deref(),
        Some("Test/MethodWithOutArgs")
    );
}

#[tokio::test]
async fn serialized_providers_see_one_call_at_a_time() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        active: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ParameterProvider for CountingProvider {
        fn display_name(&self) -> String {
            "counting".into()
        }
        fn get_provided_parameters(&self) -> Vec<ParameterSelector> {
            vec![ParameterSelector::AllWithDefinitionId(42)]
        }
        async fn get_parameter_values(
            &self,
            ids: Vec<ParameterInstanceId>,
            _watch: devparam_provider::DismissWatch,
        ) -> anyhow::Result<Vec<devparam_provider::ValueResponse>> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            if now_active > 1 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ids
                .iter()
                .map(|_| devparam_provider::ValueResponse::ok(ParameterValue::Bool(true)))
                .collect())
        }
        async fn set_parameter_values(
            &self,
            requests: Vec<devparam_provider::SetRequest>,
            _watch: devparam_provider::DismissWatch,
        ) -> anyhow::Result<Vec<SetParameterResponse>> {
            Ok(vec![SetParameterResponse::status(StatusCode::Success); requests.len()])
        }
        async fn invoke_method(
            &self,
            _id: ParameterInstanceId,
            _in_args: Vec<ParameterValue>,
            _watch: devparam_provider::DismissWatch,
        ) -> anyhow::Result<devparam_provider::MethodInvocationResponse> {
            Ok(devparam_provider::MethodInvocationResponse::status(
                StatusCode::NotImplemented,
            ))
        }
    }

    let service = headstation_service().await;
    let provider = Arc::new(CountingProvider {
        active: AtomicUsize::new(0),
        overlapped: AtomicUsize::new(0),
    });
    wait(service.register_parameter_providers(
        vec![provider.clone() as Arc<dyn ParameterProvider>],
        CallMode::Serialized,
    ))
    .await;

    let id = ParameterInstanceId::headstation(42);
    let first = service.get_parameters(vec![id]);
    let second = service.get_parameters(vec![id]);
    let third = service.get_parameters(vec![id]);
    for future in [first, second, third] {
        let responses = wait(future).await;
        assert_eq!(responses[0].status, StatusCode::Success);
    }
    assert_eq!(provider.overlapped.load(Ordering::SeqCst), 0);
}
