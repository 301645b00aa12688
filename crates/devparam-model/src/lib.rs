//! Metadata compilation for the device parameter service: raw JSON documents
//! from model and device-description providers become an immutable, arena-
//! backed [`DeviceModel`] with all include and override chains resolved.

pub mod compile;
pub mod error;
pub mod model;
pub mod raw;

pub use compile::{compile_device_description, compile_model, CompileDiagnostic, CompiledModel};
pub use error::ModelError;
pub use model::{
    Class, ClassIdx, CompiledInstance, CompiledInstantiation, CompiledPattern, DefIdx,
    DeviceDescription, DeviceModel, EffectiveDefinition, EnumDefinition, EnumIdx, EnumMember,
    Feature, FeatureIdx, MethodArgument, OverridePatch, ParameterDefinition,
};
