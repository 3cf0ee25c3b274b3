//! Outbound call subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → service.rs (ServiceClient: retries, breaker, degradation)
//!     → context.rs (correlation ID, trace headers, deadline)
//!     → transport.rs (one HTTP attempt)
//! ```

pub mod context;
pub mod request;
pub mod service;
pub mod transport;

pub use context::RequestContext;
pub use request::{CallOptions, ServiceRequest, ServiceResponse};
pub use service::ServiceClient;
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportError, TransportResponse};
