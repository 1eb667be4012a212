//! # Core Types
//!
//! This crate defines the vocabulary shared by every part of the RTOS
//! simulator: who a task is, how important it is, and which state it is in.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **Explicit over implicit**: Identities and priorities are newtypes and
//!   cannot be confused with plain integers.
//! - **Legal transitions only**: Task state changes are checked against one
//!   transition table, shared by the kernel and the lifecycle lesson.
//! - **Serializable**: Everything here appears in state snapshots consumed
//!   by the view layer.
//!
//! ## Key Types
//!
//! - [`TaskId`]: Stable integer identifier of a simulated task
//! - [`Priority`]: Scheduling priority (higher value runs first)
//! - [`TaskState`]: READY / RUNNING / BLOCKED / SUSPENDED
//! - [`BlockReason`]: What a BLOCKED task is waiting for

pub mod ids;
pub mod task_state;

pub use ids::{Priority, TaskId};
pub use task_state::{BlockReason, TaskState};
