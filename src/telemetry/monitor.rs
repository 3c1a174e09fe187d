// src/telemetry/monitor.rs
//! Telemetry fan-out monitor
//!
//! Keeps a bounded retention buffer of recent records for diagnostics and
//! fans each event (plus any watchdog alert it triggers) out to registered
//! listeners. Listener failures are logged and skipped so one bad consumer
//! can never block the others or crash the monitor.

use crate::telemetry::watchdog::{Watchdog, WatchdogAlert};
use crate::telemetry::TelemetryRecord;
use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// A consumer of telemetry events and watchdog alerts
pub trait TelemetryListener: Send + Sync {
    fn on_telemetry(&self, record: &TelemetryRecord) -> Result<(), String>;

    fn on_alert(&self, _alert: &WatchdogAlert) -> Result<(), String> {
        Ok(())
    }
}

/// Adapter feeding telemetry and alerts into an observability exporter
pub struct ExporterBridge {
    exporter: Arc<dyn crate::ports::ObservabilityExporter>,
}

impl ExporterBridge {
    pub fn new(exporter: Arc<dyn crate::ports::ObservabilityExporter>) -> Self {
        Self { exporter }
    }
}

impl TelemetryListener for ExporterBridge {
    fn on_telemetry(&self, record: &TelemetryRecord) -> Result<(), String> {
        self.exporter.export_telemetry(record);
        Ok(())
    }

    fn on_alert(&self, alert: &WatchdogAlert) -> Result<(), String> {
        self.exporter.export_watchdog_alert(alert);
        Ok(())
    }
}

/// Fan-out hub for execution telemetry
pub struct TelemetryMonitor {
    recent: ArrayQueue<TelemetryRecord>,
    listeners: RwLock<Vec<Arc<dyn TelemetryListener>>>,
    watchdog: Watchdog,
}

impl TelemetryMonitor {
    pub fn new(watchdog: Watchdog, retention: usize) -> Self {
        Self {
            recent: ArrayQueue::new(retention.max(1)),
            listeners: RwLock::new(Vec::new()),
            watchdog,
        }
    }

    pub fn register(&self, listener: Arc<dyn TelemetryListener>) {
        self.listeners.write().push(listener);
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Record one event: retention buffer, watchdog accounting, fan-out
    pub fn record(&self, record: TelemetryRecord) {
        // Bounded retention: drop the oldest entry when full
        if self.recent.push(record.clone()).is_err() {
            let _ = self.recent.pop();
            let _ = self.recent.push(record.clone());
        }

        metrics::counter!("telemetry_records_total").increment(1);
        if record.is_failure() {
            metrics::counter!("telemetry_failures_total").increment(1);
        }

        let alert = self.watchdog.observe(&record);

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            if let Err(e) = listener.on_telemetry(&record) {
                warn!(subject = %record.subject, error = %e, "Telemetry listener failed");
            }
        }

        if let Some(alert) = alert {
            for listener in &listeners {
                if let Err(e) = listener.on_alert(&alert) {
                    warn!(user = %alert.user_id, error = %e, "Alert listener failed");
                }
            }
        }
    }

    /// Drain the retention buffer (diagnostics, tests)
    pub fn drain_recent(&self) -> Vec<TelemetryRecord> {
        let mut drained = Vec::new();
        while let Some(record) = self.recent.pop() {
            drained.push(record);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        events: AtomicUsize,
        alerts: AtomicUsize,
    }

    impl TelemetryListener for CountingListener {
        fn on_telemetry(&self, _record: &TelemetryRecord) -> Result<(), String> {
            self.events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_alert(&self, _alert: &WatchdogAlert) -> Result<(), String> {
            self.alerts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingListener;

    impl TelemetryListener for FailingListener {
        fn on_telemetry(&self, _record: &TelemetryRecord) -> Result<(), String> {
            Err("broken pipe".to_string())
        }
    }

    struct OrderedListener {
        seen: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    }

    impl TelemetryListener for OrderedListener {
        fn on_telemetry(&self, _record: &TelemetryRecord) -> Result<(), String> {
            self.seen.lock().push(self.tag.to_string());
            Ok(())
        }
    }

    fn failing(user: &str) -> TelemetryRecord {
        TelemetryRecord::execution(user, 1, 100, true, false, None, 0)
    }

    #[test]
    fn test_fanout_and_alerts() {
        let monitor = TelemetryMonitor::new(Watchdog::new(2), 16);
        let listener = Arc::new(CountingListener {
            events: AtomicUsize::new(0),
            alerts: AtomicUsize::new(0),
        });
        monitor.register(Arc::clone(&listener) as Arc<dyn TelemetryListener>);

        monitor.record(failing("x"));
        monitor.record(failing("x"));

        assert_eq!(listener.events.load(Ordering::SeqCst), 2);
        assert_eq!(listener.alerts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let monitor = TelemetryMonitor::new(Watchdog::new(3), 16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        monitor.register(Arc::new(OrderedListener {
            seen: Arc::clone(&seen),
            tag: "first",
        }));
        monitor.register(Arc::new(FailingListener));
        monitor.register(Arc::new(OrderedListener {
            seen: Arc::clone(&seen),
            tag: "last",
        }));

        monitor.record(failing("x"));
        assert_eq!(*seen.lock(), vec!["first", "last"]);
    }

    #[test]
    fn test_retention_buffer_bounded() {
        let monitor = TelemetryMonitor::new(Watchdog::new(99), 2);
        monitor.record(failing("a"));
        monitor.record(failing("b"));
        monitor.record(failing("c"));

        let drained = monitor.drain_recent();
        assert_eq!(drained.len(), 2);
        // Oldest entry was evicted
        assert!(drained.iter().all(|r| r.subject != "a"));
    }
}
