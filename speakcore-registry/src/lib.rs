//! A small in-process service registry (typed DI container) and a synchronous
//! event bus, shared by the runtime and application layers for wiring services
//! together and reacting to configuration/device changes without hard-coded
//! call graphs.

pub mod event_bus;
pub mod registry;

pub use event_bus::{EventBus, Subscription};
pub use registry::{ReleaseHook, RegistryError, Scope, ServiceLifetime, ServiceRegistry};
