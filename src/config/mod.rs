//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LinkConfig (validated, immutable)
//!     → lifecycle::startup builds the component graph from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; service descriptors are fixed at start
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthKind, AuthenticationConfig, CallDefaults, CircuitBreakerConfig,
    CredentialsConfig, EndpointConfig, FallbackConfig, FallbackStrategy, HealthCheckConfig,
    LinkConfig, LoadBalanceStrategy, LogFormat, ObservabilityConfig, ServiceConfig,
    DEFAULT_GROUP,
};
pub use validation::{validate_breaker, validate_config, ValidationError};
