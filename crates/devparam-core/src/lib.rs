//! The device parameter service core: request dispatch and provider
//! coordination over a compiled parameter model.
//!
//! A [`ParameterService`] owns the compiled model, the device and instance
//! tables, and the provider registries. Front-end calls resolve their targets
//! under the internal param mutex, partition the batch into per-provider
//! portions, release the lock, await the providers, and reassemble the
//! answers in request order. [`Authorized`] wraps the same surface with
//! per-user permission filtering.

pub mod authorized;
pub mod backend;
pub mod changelog;
pub mod clock;
pub mod device;
mod dispatch;
pub mod files;
pub mod future;
pub mod monitoring;
pub mod permissions;
mod resolver;
pub mod service;

pub use authorized::Authorized;
pub use backend::{RegisterFileProviderRequest, ReregisterFileProviderRequest};
pub use changelog::{ChangeEvent, ChangeSink, NullChangeSink, RecordingChangeSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use future::{resolved_future, ServiceFault, ServiceFuture, ServicePromise};
pub use permissions::{Permissions, StaticPermissions};
pub use service::{ParameterService, ParameterServiceBuilder};
