//! Publish scheduling: bootstrap accumulation, steady-state debouncing,
//! and the watchlist bypass.
//!
//! The gate is a pure state machine over injected instants; the engine
//! owns the actual timer and feeds deadline expiries back in. This keeps
//! every timing rule testable without a clock.

use std::time::Duration;
use tokio::time::Instant;

/// What the engine should do after reporting an event to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Build and publish a snapshot now.
    PublishNow,
    /// A deadline is armed; wait for [`PublishGate::deadline`].
    Wait,
    /// Nothing armed and nothing to publish.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accumulating the first paint: publish at the symbol threshold or
    /// the deadline, whichever comes first.
    Bootstrap { deadline: Instant },
    /// Deadline fired with an empty store. The next data publishes
    /// immediately; an empty first snapshot is never published.
    Starved,
    /// Published and quiescent.
    Idle,
    /// Data arrived; a debounced publish is armed. Further data coalesces
    /// into the same deadline.
    Pending { deadline: Instant },
}

/// Decides when a rebuilt snapshot may be published.
#[derive(Debug)]
pub struct PublishGate {
    phase: Phase,
    min_symbols: usize,
    debounce: Duration,
}

impl PublishGate {
    pub fn new(
        now: Instant,
        min_symbols: usize,
        max_wait: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            phase: Phase::Bootstrap {
                deadline: now + max_wait,
            },
            min_symbols,
            debounce,
        }
    }

    /// Deadline the engine should sleep until, if any phase armed one.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Bootstrap { deadline } | Phase::Pending { deadline } => Some(deadline),
            Phase::Starved | Phase::Idle => None,
        }
    }

    /// Report fresh store data. `symbol_count` is the distinct canonical
    /// symbol count after the write.
    pub fn on_data(&mut self, now: Instant, symbol_count: usize) -> GateDecision {
        match self.phase {
            Phase::Bootstrap { .. } => {
                if symbol_count >= self.min_symbols {
                    self.phase = Phase::Idle;
                    GateDecision::PublishNow
                } else {
                    GateDecision::Wait
                }
            }
            Phase::Starved => {
                if symbol_count > 0 {
                    self.phase = Phase::Idle;
                    GateDecision::PublishNow
                } else {
                    GateDecision::Hold
                }
            }
            Phase::Idle => {
                self.phase = Phase::Pending {
                    deadline: now + self.debounce,
                };
                GateDecision::Wait
            }
            Phase::Pending { .. } => GateDecision::Wait,
        }
    }

    /// Report that the armed deadline expired.
    pub fn on_deadline(&mut self, symbol_count: usize) -> GateDecision {
        match self.phase {
            Phase::Bootstrap { .. } | Phase::Pending { .. } => {
                if symbol_count > 0 {
                    self.phase = Phase::Idle;
                    GateDecision::PublishNow
                } else {
                    self.phase = Phase::Starved;
                    GateDecision::Hold
                }
            }
            Phase::Starved | Phase::Idle => GateDecision::Hold,
        }
    }

    /// Force an immediate publish outside the debounce discipline, used
    /// when the last missing watchlist symbol arrives.
    pub fn bypass(&mut self) {
        self.phase = Phase::Idle;
    }
}
