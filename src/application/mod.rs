//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic against the counter stores:
//! - Attempt gate (the allow/deny decision)
//! - Reset controller (clearing a key after success)
//! - Store failure routing and guard metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod errors;
pub mod gate;
pub mod metrics;
pub mod ports;
pub mod reset;
