mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devparam_domain::{ParameterInstanceId, ParameterSelector, ParameterValue};
use devparam_provider::testing::GatedParameterProvider;
use devparam_provider::{CallMode, ParameterProvider};

use support::{headstation_service, wait};

#[tokio::test]
async fn dismissal_reaches_the_provider_and_drops_the_answer() {
    let service = headstation_service().await;
    let gated = Arc::new(GatedParameterProvider::new(
        vec![ParameterSelector::AllWithDefinitionId(42)],
        ParameterValue::Bool(true),
    ));
    wait(service.register_parameter_providers(
        vec![gated.clone() as Arc<dyn ParameterProvider>],
        CallMode::Concurrent,
    ))
    .await;

    let future = service.get_parameters(vec![ParameterInstanceId::headstation(42)]);
    let notified = Arc::new(AtomicBool::new(false));
    {
        let notified = notified.clone();
        future.set_notifier(move |_| notified.store(true, Ordering::SeqCst));
    }

    // wait until the provider call is in flight
    for _ in 0..100 {
        if gated.observed_watch().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let watch = gated.observed_watch().expect("provider was never called");
    assert!(!watch.is_dismissed());

    future.dismiss();
    assert!(watch.is_dismissed(), "dismissal must reach the provider");

    // the provider answers anyway; the result is dropped
    gated.release();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!notified.load(Ordering::SeqCst), "notifier ran after dismissal");
    assert!(future.try_get().is_none());
}

#[tokio::test]
async fn undismissed_future_notifies_once_released() {
    let service = headstation_service().await;
    let gated = Arc::new(GatedParameterProvider::new(
        vec![ParameterSelector::AllWithDefinitionId(42)],
        ParameterValue::Bool(true),
    ));
    wait(service.register_parameter_providers(
        vec![gated.clone() as Arc<dyn ParameterProvider>],
        CallMode::Concurrent,
    ))
    .await;

    let future = service.get_parameters(vec![ParameterInstanceId::headstation(42)]);
    for _ in 0..100 {
        if gated.observed_watch().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    gated.release();

    let responses = wait(future).await;
    assert_eq!(responses[0].value, Some(ParameterValue::Bool(true)));
}
