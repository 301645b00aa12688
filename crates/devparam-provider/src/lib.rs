//! Provider contracts and registries: the traits the dispatcher calls into,
//! the selectors a registration claims, and the ordered collections that make
//! provider resolution deterministic.

pub mod dismiss;
pub mod provider;
pub mod registry;
pub mod testing;

pub use dismiss::DismissWatch;
pub use provider::{
    DeviceDescriptionProvider, DeviceExtension, DeviceExtensionProvider, FileProvider,
    MethodInvocationResponse, ModelProvider, ParameterProvider, SetRequest, ValueResponse,
};
pub use registry::{
    resolve_parameter_provider, CallMode, ParameterProviderData, ProviderCollection,
    ProviderEntry, ProviderId, SerialLane,
};
