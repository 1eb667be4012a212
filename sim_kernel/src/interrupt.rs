//! Interrupt masking and the pended-interrupt latch
//!
//! Models the NVIC behaviour the lessons rely on: an interrupt asserted
//! while masked (or while its handler is already running) is latched, not
//! lost, and taken exactly once as soon as it can be. Several assertions
//! while masked collapse into one pending flag.

use serde::{Deserialize, Serialize};

/// What happened to a raised interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptOutcome {
    /// The handler started immediately
    Serviced,
    /// The request was latched for later
    Pended,
}

/// Critical-section nesting plus the external interrupt's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptController {
    critical_nesting: u32,
    pending: bool,
    executing_isr: bool,
    serviced: u64,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// `taskENTER_CRITICAL()`
    pub fn enter_critical(&mut self) {
        self.critical_nesting += 1;
    }

    /// `taskEXIT_CRITICAL()`, clamped at zero
    pub fn exit_critical(&mut self) {
        self.critical_nesting = self.critical_nesting.saturating_sub(1);
    }

    /// Interrupts are masked while any critical section is open
    pub fn is_masked(&self) -> bool {
        self.critical_nesting > 0
    }

    pub fn critical_nesting(&self) -> u32 {
        self.critical_nesting
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_executing_isr(&self) -> bool {
        self.executing_isr
    }

    /// How many times the handler has started
    pub fn serviced_count(&self) -> u64 {
        self.serviced
    }

    /// Asserts the interrupt line
    ///
    /// A raise that finds a request already latched merges into it; if the
    /// latched request can be taken now, it is taken by this raise.
    pub fn raise_interrupt(&mut self) -> InterruptOutcome {
        if self.can_service() {
            self.begin_service();
            InterruptOutcome::Serviced
        } else {
            self.pending = true;
            InterruptOutcome::Pended
        }
    }

    /// Marks the handler as finished
    pub fn complete_isr(&mut self) {
        self.executing_isr = false;
    }

    /// Starts a latched interrupt if masking allows; returns true if started
    pub fn service_pending(&mut self) -> bool {
        if self.pending && self.can_service() {
            self.begin_service();
            true
        } else {
            false
        }
    }

    /// Returns true if a latched interrupt would be taken now
    pub fn has_serviceable_pending(&self) -> bool {
        self.pending && self.can_service()
    }

    fn can_service(&self) -> bool {
        !self.is_masked() && !self.executing_isr
    }

    fn begin_service(&mut self) {
        self.pending = false;
        self.executing_isr = true;
        self.serviced += 1;
    }
}
