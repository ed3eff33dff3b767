//! Tool capability model and provider abstraction.
//!
//! - [`entities`] — [`ToolCapability`], [`ParameterSchema`], [`CapabilityClass`]
//! - [`provider`] — [`ToolProvider`] trait, [`ProviderState`], [`TransportDescriptor`]
//! - [`validation`] — schema checks run before any dispatch
//!
//! The async gateway used by the engine lives in the application layer
//! (`ToolGateway` port); the registry implementing it lives in infrastructure.

pub mod entities;
pub mod provider;
pub mod validation;

pub use entities::{CapabilityClass, ParameterKind, ParameterSchema, ParameterSpec, ToolCapability};
pub use provider::{ProviderError, ProviderId, ProviderState, ToolProvider, TransportDescriptor};
pub use validation::{ParameterValidator, SchemaValidator, ValidationError, validate_parameters};
