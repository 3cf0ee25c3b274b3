//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! monitor.rs (one probe loop per service)
//!     → GET <endpoint><health_path> with a bounded timeout
//!     → Endpoint::set_health
//!     → load_balancer picks only healthy endpoints
//! ```
//!
//! # Design Decisions
//! - Endpoints start healthy; the first probe runs immediately
//! - When every endpoint is unhealthy the balancer fails open

pub mod monitor;

pub use monitor::HealthMonitor;
