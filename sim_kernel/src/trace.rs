//! Kernel Trace Log
//!
//! Records every state transition the simulated kernel performs, for test
//! verification and for the one-line log the front-end displays.
//! This is NOT authoritative state; nothing in the engine reads it back.

use kernel_api::Tick;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Category of a recorded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Kernel (re)initialised
    Reset,
    /// Tick counter advanced
    Tick,
    /// Task moved BLOCKED -> READY
    Unblock,
    /// Task moved to BLOCKED
    Block,
    /// Scheduler picked a task
    Schedule,
    /// Handler or ISR entered or returned
    Exception,
    /// Interrupt raised, pended or serviced
    Interrupt,
    /// Critical section entered or left
    Critical,
    /// Mutex taken, contended, boosted or released
    Mutex,
    /// Queue send or receive
    Queue,
    /// Semaphore take or give
    Semaphore,
    /// Base priority changed
    Priority,
    /// Task suspended or resumed
    Suspend,
    /// Ordinary task instruction
    Task,
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Micro-step counter when the event happened
    pub step: u64,
    /// Simulated time when the event happened
    pub tick: Tick,
    /// Category
    pub kind: TraceKind,
    /// Display text
    pub message: String,
}

/// Bounded trace log
///
/// Keeps the newest `capacity` events; older ones are dropped. Every event
/// is also forwarded to the `log` facade.
#[derive(Debug, Clone)]
pub struct TraceLog {
    events: VecDeque<TraceEvent>,
    capacity: usize,
    dropped: u64,
}

impl TraceLog {
    /// Creates an empty log holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Records an event
    pub fn record(&mut self, step: u64, tick: Tick, kind: TraceKind, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "sim_kernel", "[step {step} tick {tick}] {kind:?}: {message}");

        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(TraceEvent {
            step,
            tick,
            kind,
            message,
        });
    }

    /// Returns the recorded events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    /// Returns the newest event
    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.back()
    }

    /// Returns the newest message, or an empty string
    pub fn last_message(&self) -> &str {
        self.last().map(|e| e.message.as_str()).unwrap_or("")
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events evicted because of the capacity bound
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns events matching a predicate
    pub fn find_events<F>(&self, predicate: F) -> Vec<&TraceEvent>
    where
        F: Fn(&TraceEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).collect()
    }

    /// Checks if any event matches a predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&TraceEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TraceEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut log = TraceLog::new(8);
        log.record(0, Tick::ZERO, TraceKind::Reset, "reset");
        log.record(3, Tick::new(1), TraceKind::Tick, "tick -> 1");
        log.record(4, Tick::new(1), TraceKind::Unblock, "LED woke");

        assert_eq!(log.len(), 3);
        assert!(log.has_event(|e| e.kind == TraceKind::Unblock));
        assert_eq!(log.count_events(|e| e.tick == Tick::new(1)), 2);
        assert_eq!(log.find_events(|e| e.step > 0).len(), 2);
        assert_eq!(log.last_message(), "LED woke");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut log = TraceLog::new(2);
        for step in 0..5 {
            log.record(step, Tick::ZERO, TraceKind::Task, format!("op {step}"));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 3);
        let steps: Vec<u64> = log.events().map(|e| e.step).collect();
        assert_eq!(steps, vec![3, 4]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut log = TraceLog::new(0);
        log.record(0, Tick::ZERO, TraceKind::Reset, "reset");
        assert!(log.is_empty());
        assert_eq!(log.last_message(), "");
        assert_eq!(log.dropped(), 1);
    }
}
