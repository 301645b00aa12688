//! Shared fixture: a small but representative model (features, class
//! inheritance, patterns, enums, a method, a file parameter) plus the
//! headstation description instantiating the test classes.
#![allow(dead_code)]

use std::sync::Arc;

use devparam_core::{Clock, ManualClock, ParameterService, Permissions, ServiceFuture, StaticPermissions};
use devparam_domain::{DeviceId, DeviceSelector, RegisterDeviceRequest};
use devparam_provider::testing::{StaticDescriptionProvider, StaticModelProvider};
use devparam_provider::{DeviceDescriptionProvider, ModelProvider};

pub const TEST_MODEL: &str = r#"{
    "WDMMVersion": "1.3.0",
    "Name": "Test",
    "Enums": [
        {"Name": "TestEnum", "Members": [{"ID": 1, "Name": "On"}, {"ID": 2, "Name": "Off"}]}
    ],
    "Classes": [
        {
            "ID": "IPService",
            "BasePath": "Services",
            "BaseID": 2010,
            "Parameters": [
                {"Path": "Port", "ID": 2302, "Type": "UInt16"},
                {"Path": "Enable", "ID": 2300, "Type": "Boolean", "Writeable": true},
                {"Path": "Name", "ID": 2301, "Type": "String"}
            ]
        },
        {
            "ID": "TestBaseClass",
            "BasePath": "TestClasses",
            "BaseID": 2007,
            "Parameters": [
                {"Path": "Param1", "ID": 20000, "Type": "String", "Pattern": "Hallo|Hello"},
                {"Path": "Name", "ID": 20008, "Type": "String", "InstanceKey": true}
            ]
        },
        {
            "ID": "TestClass",
            "Includes": ["TestBaseClass"],
            "Parameters": [
                {"Path": "OtherParam", "ID": 20001, "Type": "UInt16"}
            ]
        }
    ],
    "Features": [
        {
            "ID": "MyFeature",
            "Parameters": [
                {"ID": 42, "Path": "MyFeature/MyParameter", "Type": "Boolean"}
            ]
        },
        {
            "ID": "Identity",
            "Parameters": [
                {"ID": 1, "Path": "Identity/OrderNumber", "Type": "String"},
                {"ID": 2, "Path": "Identity/FirmwareVersion", "Type": "String"}
            ]
        },
        {
            "ID": "TestFeature",
            "Classes": ["TestClass", "TestBaseClass", "IPService"],
            "Parameters": [
                {"ID": 10000, "Path": "Test/ProvidedParam", "Type": "Boolean"},
                {"ID": 10001, "Path": "Test/WriteableParamWithPattern", "Type": "String",
                 "Writeable": true, "Pattern": "Hallo (Du|Sie)"},
                {"ID": 10002, "Path": "Test/MethodWithOutArgs", "Type": "Method",
                 "InArgs": [], "OutArgs": [{"Name": "Data", "Type": "String"}]},
                {"ID": 10003, "Path": "Test/EnumParam", "Type": "Enum", "Enum": "TestEnum",
                 "Writeable": true},
                {"ID": 10006, "Path": "Test/OverriddenByDevice", "Type": "UInt16",
                 "Writeable": true, "DefaultValue": 1},
                {"ID": 10010, "Path": "Test/ConnectionParam", "Type": "String",
                 "Writeable": true, "ConnectionChanging": true}
            ]
        },
        {
            "ID": "SecondFeature",
            "Parameters": [
                {"ID": 11000, "Path": "Second/Writeable", "Type": "String", "Writeable": true}
            ]
        },
        {
            "ID": "FileFeature",
            "Parameters": [
                {"ID": 4000, "Path": "File/ConfigFileParam", "Type": "FileID", "Writeable": true}
            ]
        }
    ]
}"#;

pub const TEST_WDD: &str = r#"{
    "WDMMVersion": "1.0.0",
    "ModelReference": "Test",
    "Features": ["MyFeature", "Identity", "TestFeature", "SecondFeature", "FileFeature"],
    "Overrides": [
        {"ID": 10006, "Inactive": true, "DefaultValue": 5}
    ],
    "Instantiations": [
        {"Class": "TestBaseClass", "Instances": [
            {"ID": 1, "ParameterValues": [{"ID": 20008, "Value": "Test1"}]}
        ]},
        {"Class": "TestClass", "Instances": [
            {"ID": 2, "ParameterValues": [{"ID": 20008, "Value": "Test2"}]}
        ]},
        {"Class": "IPService", "Instances": [
            {"ID": 1, "ParameterValues": [{"ID": 2301, "Value": "SSH"}]}
        ]}
    ],
    "ParameterValues": [
        {"ID": 1, "Value": "0768-3301"}
    ]
}"#;

pub const ORDER_NUMBER: &str = "0768-3301";
pub const FIRMWARE: &str = "01.02.03";

pub async fn wait<T: Send + 'static>(future: ServiceFuture<T>) -> T {
    future
        .await
        .expect("future was dismissed")
        .expect("future faulted")
}

/// Service with the test model compiled and the headstation registered.
pub async fn headstation_service_with(
    permissions: Arc<dyn Permissions>,
    clock: Arc<dyn Clock>,
) -> Arc<ParameterService> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let service = ParameterService::builder(permissions).clock(clock).build();

    let model: Arc<dyn ModelProvider> = Arc::new(StaticModelProvider::new(TEST_MODEL));
    wait(service.register_model_providers(vec![model])).await;

    let descriptions: Arc<dyn DeviceDescriptionProvider> = Arc::new(
        StaticDescriptionProvider::new(vec![DeviceSelector::Any])
            .with_document(ORDER_NUMBER, FIRMWARE, TEST_WDD),
    );
    wait(service.register_device_description_providers(vec![descriptions])).await;

    let registered = wait(service.register_devices(vec![RegisterDeviceRequest::new(
        DeviceId::HEADSTATION,
        ORDER_NUMBER,
        FIRMWARE,
    )]))
    .await;
    assert!(registered[0].status.is_success(), "{:?}", registered[0]);

    service
}

pub async fn headstation_service() -> Arc<ParameterService> {
    headstation_service_with(Arc::new(StaticPermissions::new()), Arc::new(ManualClock::new())).await
}
