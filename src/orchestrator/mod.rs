// src/orchestrator/mod.rs
//! Tick orchestration
//!
//! One sequential loop drives the whole engine:
//!
//! ```text
//! gate → users → drain → rooms → drain → commit → global → commit → tick++
//! ```
//!
//! The orchestrator owns the producer ends of both work queues and the
//! shared tick clock; worker pools own the consumer ends. Stage
//! transitions are announced through the lifecycle observer list.

pub mod lifecycle;
pub mod main_loop;

pub use lifecycle::{Lifecycle, TickListener, TickStage};
pub use main_loop::TickLoop;

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared monotonic tick counter
///
/// Written only by the orchestrator at the end of a successful tick; read
/// by everything else. Readers may observe tick N while the orchestrator
/// is mid-transition to N+1, which is fine: all per-tick work for N has
/// drained before the counter moves.
pub struct TickClock {
    tick: AtomicU64,
}

impl TickClock {
    pub fn new(start: u64) -> Self {
        Self {
            tick: AtomicU64::new(start),
        }
    }

    /// The current game tick
    pub fn current(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Advance to the next tick; returns the new value
    pub fn advance(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let clock = TickClock::new(41);
        assert_eq!(clock.current(), 41);
        assert_eq!(clock.advance(), 42);
        assert_eq!(clock.current(), 42);
    }
}
