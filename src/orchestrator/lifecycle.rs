// src/orchestrator/lifecycle.rs
//! Tick lifecycle observation
//!
//! An explicit observer list the orchestrator announces every stage
//! transition to. Listeners can also gate the tick: if any listener's
//! `tick_gate` returns false at tick start, the tick body is skipped
//! before anything is enqueued. Listener errors are logged and never
//! propagate into the loop.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// The stages of one tick, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickStage {
    TickStarted,
    EnumerateUsers,
    EnqueueUsers,
    WaitUsersDrained,
    EnumerateRooms,
    EnqueueRooms,
    WaitRoomsDrained,
    CommitPre,
    GlobalStage,
    CommitPost,
    IncrementTick,
    UpdateAccessibility,
    TickDone,
}

impl TickStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStage::TickStarted => "tick_started",
            TickStage::EnumerateUsers => "enumerate_users",
            TickStage::EnqueueUsers => "enqueue_users",
            TickStage::WaitUsersDrained => "wait_users_drained",
            TickStage::EnumerateRooms => "enumerate_rooms",
            TickStage::EnqueueRooms => "enqueue_rooms",
            TickStage::WaitRoomsDrained => "wait_rooms_drained",
            TickStage::CommitPre => "commit_pre",
            TickStage::GlobalStage => "global_stage",
            TickStage::CommitPost => "commit_post",
            TickStage::IncrementTick => "increment_tick",
            TickStage::UpdateAccessibility => "update_accessibility",
            TickStage::TickDone => "tick_done",
        }
    }
}

/// An observer of tick progression
pub trait TickListener: Send + Sync {
    fn stage_started(&self, _stage: TickStage, _tick: u64) -> Result<(), String> {
        Ok(())
    }

    fn stage_finished(&self, _stage: TickStage, _tick: u64) -> Result<(), String> {
        Ok(())
    }

    /// Veto hook consulted once per tick, before any work is enqueued
    fn tick_gate(&self, _tick: u64) -> bool {
        true
    }
}

/// Registered tick listeners plus dispatch helpers
#[derive(Default)]
pub struct Lifecycle {
    listeners: RwLock<Vec<Arc<dyn TickListener>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn TickListener>) {
        self.listeners.write().push(listener);
    }

    pub fn dispatch_started(&self, stage: TickStage, tick: u64) {
        for listener in self.listeners.read().iter() {
            if let Err(e) = listener.stage_started(stage, tick) {
                warn!(stage = stage.as_str(), tick, error = %e, "Tick listener failed");
            }
        }
    }

    pub fn dispatch_finished(&self, stage: TickStage, tick: u64) {
        for listener in self.listeners.read().iter() {
            if let Err(e) = listener.stage_finished(stage, tick) {
                warn!(stage = stage.as_str(), tick, error = %e, "Tick listener failed");
            }
        }
    }

    /// True when every listener allows the tick to proceed
    pub fn gate(&self, tick: u64) -> bool {
        self.listeners
            .read()
            .iter()
            .all(|listener| listener.tick_gate(tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingListener {
        seen: Arc<Mutex<Vec<(String, u64)>>>,
        allow: bool,
    }

    impl TickListener for RecordingListener {
        fn stage_started(&self, stage: TickStage, tick: u64) -> Result<(), String> {
            self.seen.lock().push((stage.as_str().to_string(), tick));
            Ok(())
        }

        fn tick_gate(&self, _tick: u64) -> bool {
            self.allow
        }
    }

    struct BrokenListener;

    impl TickListener for BrokenListener {
        fn stage_started(&self, _stage: TickStage, _tick: u64) -> Result<(), String> {
            Err("listener exploded".to_string())
        }
    }

    #[test]
    fn test_dispatch_reaches_all_listeners() {
        let lifecycle = Lifecycle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        lifecycle.register(Arc::new(RecordingListener {
            seen: Arc::clone(&seen),
            allow: true,
        }));

        lifecycle.dispatch_started(TickStage::TickStarted, 7);
        lifecycle.dispatch_started(TickStage::GlobalStage, 7);

        assert_eq!(
            *seen.lock(),
            vec![
                ("tick_started".to_string(), 7),
                ("global_stage".to_string(), 7)
            ]
        );
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let lifecycle = Lifecycle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        lifecycle.register(Arc::new(BrokenListener));
        lifecycle.register(Arc::new(RecordingListener {
            seen: Arc::clone(&seen),
            allow: true,
        }));

        lifecycle.dispatch_started(TickStage::TickStarted, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_any_veto_closes_the_gate() {
        let lifecycle = Lifecycle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        lifecycle.register(Arc::new(RecordingListener {
            seen: Arc::clone(&seen),
            allow: true,
        }));
        assert!(lifecycle.gate(1));

        lifecycle.register(Arc::new(RecordingListener {
            seen,
            allow: false,
        }));
        assert!(!lifecycle.gate(1));
    }

    #[test]
    fn test_empty_lifecycle_allows_everything() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.gate(0));
        lifecycle.dispatch_finished(TickStage::TickDone, 0);
    }
}
