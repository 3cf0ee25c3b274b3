//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceClient attempt
//!     → credentials.rs (cached credential still fresh? hand it out)
//!     → sources.rs (otherwise one refresh per service, shared by all waiters)
//!     → header attached to the outbound request
//! ```
//!
//! # Design Decisions
//! - Refresh happens a safety margin before hard expiry
//! - A failed refresh serves the old credential while it is not hard-expired
//! - A 401 from downstream invalidates the cached credential

pub mod credentials;
pub mod sources;

pub use credentials::{Credential, CredentialError, CredentialProvider, CredentialScheme, CredentialSource};
pub use sources::{RefreshEndpoint, StaticCredential};
