//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → snapshot registry
//!     → probe.rs: GET <url><path> per backend, concurrently
//!     → Backend::record_probe (healthy / last_checked / logged_healthy)
//!     → log once per transition
//! ```
//!
//! # Design Decisions
//! - Probe errors never escape the monitor; they only degrade a backend
//! - The probe timeout is clamped to the interval so rounds cannot overlap
//! - The same probe serves the admin layer's post-creation check

pub mod active;
pub mod probe;

pub use active::{probe_backend, FirstRound, HealthError, HealthMonitor};
pub use probe::{HealthProbe, ProbeFailure, ProbeOutcome};
