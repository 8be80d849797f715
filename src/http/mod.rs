//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, orchestration)
//!     → request.rs (add request ID)
//!     → [rate limiter admits client]
//!     → [load balancer picks backend]
//!     → forward.rs (proxy to backend)
//!     → response.rs (map failures to 429/503/502)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::{ForwardError, Forwarder};
pub use request::X_REQUEST_ID;
pub use response::{ErrorBody, ProxyError};
pub use server::{AppState, HttpServer};
