//! Domain layer - pure lockout logic with no I/O.
//!
//! This layer contains the core concepts of brute-force protection:
//! - Escalating delay schedule
//! - Lookup key derivation
//! - Lockout policy and per-counter options
//! - Gate decisions
//!
//! All types in this layer are pure and easily testable.

pub mod decision;
pub mod key;
pub mod policy;
pub mod schedule;
