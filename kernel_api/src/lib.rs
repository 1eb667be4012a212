//! # Kernel API
//!
//! This crate defines the interface between a lesson front-end and the
//! simulation engines behind it.
//!
//! ## Philosophy
//!
//! The engine provides **state machines**, the front-end provides pacing:
//! - Time is explicit (a tick counter, not a wall clock)
//! - Stepping is explicit (nothing advances between calls)
//! - Misuse is explicit (contract violations are `Err`, never silent)
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A real-time kernel (no wall-clock guarantees)
//! - A rendering layer (snapshots are data, drawing happens elsewhere)

pub mod engine;
pub mod error;
pub mod time;

pub use engine::{Granularity, SimulationEngine};
pub use error::KernelError;
pub use time::Tick;
