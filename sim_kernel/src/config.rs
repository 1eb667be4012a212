//! Kernel configuration

use crate::tick_source::TickSource;
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};

/// Tunables of one simulated kernel
///
/// Missing fields fall back to their defaults when deserialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// `configMAX_PRIORITIES`; user tasks use `1..max_priorities`
    pub max_priorities: u8,
    /// When SysTick fires
    pub tick_source: TickSource,
    /// Micro-step budget for one multi-instruction `step`
    pub max_steps_per_request: usize,
    /// Trace events kept in memory
    pub trace_capacity: usize,
    /// UART lines and received queue values kept; older ones are dropped
    pub output_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_priorities: 5,
            tick_source: TickSource::default(),
            max_steps_per_request: 1000,
            trace_capacity: 256,
            output_capacity: 256,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.max_priorities < 2 {
            return Err(KernelError::InvalidScenario(
                "max_priorities must leave room for idle and one user level".to_string(),
            ));
        }
        if self.max_steps_per_request == 0 {
            return Err(KernelError::InvalidScenario(
                "max_steps_per_request must be at least 1".to_string(),
            ));
        }
        self.tick_source.validate()
    }

    /// Same configuration with a different tick source
    pub fn with_tick_source(mut self, tick_source: TickSource) -> Self {
        self.tick_source = tick_source;
        self
    }
}
