// src/runtime/engine.rs
//! Script engine port
//!
//! The sandbox never talks to a concrete scripting engine directly; it goes
//! through `ScriptEngine`, which any embedding (V8, wasm, a test stub) can
//! implement. The engine receives a `HostBridge` exposing exactly three
//! capabilities to running scripts: buffered console output, intent
//! registration, and notify. Everything else — memory binding, segment
//! writes, heap accounting — is tracked by the bridge so the sandbox can
//! assemble the execution result afterwards.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Faults an engine run can end with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    /// The wall-clock interrupt fired mid-script
    Interrupted,
    /// The script breached the heap ceiling
    HeapLimit,
    /// The script raised an uncaught error
    Script(String),
}

/// Shared interrupt flag between the sandbox's timeout guard and the engine
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption of the in-flight script
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag before a fresh run
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Immutable job description handed to the engine
#[derive(Debug, Clone)]
pub struct EngineJob {
    /// Owning user id
    pub user_id: String,

    /// Current tick number
    pub tick: u64,

    /// Raw script/module source
    pub source: String,
}

/// A queued notify request from a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    pub message: String,
    /// Throttled delivery window in minutes, if grouped
    pub group_interval_minutes: Option<u32>,
}

/// Host-side capture of everything a script does during one run
///
/// The bridge seeds the script's memory binding and records whether the
/// script ever rebinds it: an untouched binding yields `memory_take() ==
/// None`, which is the caller's signal to skip the memory write entirely.
pub struct HostBridge {
    heap_limit: u64,
    heap_used: u64,

    console_log: Vec<String>,
    console_results: Vec<String>,
    console_errors: Vec<String>,

    global_intents: HashMap<String, Value>,
    room_intents: HashMap<String, HashMap<String, Value>>,
    notifications: Vec<NotifyRequest>,

    memory_seed: Option<String>,
    memory_written: Option<String>,

    segments_seed: HashMap<u8, String>,
    segments_written: HashMap<u8, String>,
    inter_shard_written: Option<String>,
}

impl HostBridge {
    pub fn new(
        memory_seed: Option<String>,
        segments_seed: HashMap<u8, String>,
        heap_limit: u64,
    ) -> Self {
        Self {
            heap_limit,
            heap_used: 0,
            console_log: Vec::new(),
            console_results: Vec::new(),
            console_errors: Vec::new(),
            global_intents: HashMap::new(),
            room_intents: HashMap::new(),
            notifications: Vec::new(),
            memory_seed,
            memory_written: None,
            segments_seed,
            segments_written: HashMap::new(),
            inter_shard_written: None,
        }
    }

    /// Console: log line (buffered, never streamed)
    pub fn console_log(&mut self, line: impl Into<String>) {
        self.console_log.push(line.into());
    }

    /// Console: expression result line
    pub fn console_result(&mut self, line: impl Into<String>) {
        self.console_results.push(line.into());
    }

    /// Console: error line
    pub fn console_error(&mut self, line: impl Into<String>) {
        self.console_errors.push(line.into());
    }

    /// Register an intent; a `room` field in the payload routes it into the
    /// per-room bucket, otherwise it lands in the global bucket
    pub fn register_intent(&mut self, name: impl Into<String>, payload: Value) {
        let name = name.into();
        match payload.get("room").and_then(Value::as_str) {
            Some(room) => {
                self.room_intents
                    .entry(room.to_string())
                    .or_default()
                    .insert(name, payload);
            }
            None => {
                self.global_intents.insert(name, payload);
            }
        }
    }

    /// Queue a notify request for throttled delivery
    pub fn notify(&mut self, message: impl Into<String>, group_interval_minutes: Option<u32>) {
        self.notifications.push(NotifyRequest {
            message: message.into(),
            group_interval_minutes,
        });
    }

    /// The script's live memory binding (seed until rebound)
    pub fn memory(&self) -> Option<&str> {
        self.memory_written
            .as_deref()
            .or(self.memory_seed.as_deref())
    }

    /// Rebind the memory blob
    pub fn set_memory(&mut self, blob: impl Into<String>) {
        self.memory_written = Some(blob.into());
    }

    /// Read a keyed memory segment (0-99)
    pub fn segment(&self, index: u8) -> Option<&str> {
        self.segments_written
            .get(&index)
            .or_else(|| self.segments_seed.get(&index))
            .map(String::as_str)
    }

    /// Write a keyed memory segment (0-99); out-of-range indices are ignored
    pub fn set_segment(&mut self, index: u8, value: impl Into<String>) {
        if index > 99 {
            return;
        }
        self.segments_written.insert(index, value.into());
    }

    /// Write the inter-shard segment
    pub fn set_inter_shard(&mut self, value: impl Into<String>) {
        self.inter_shard_written = Some(value.into());
    }

    /// Account allocated heap; fails the run when the ceiling is breached
    pub fn charge_heap(&mut self, bytes: u64) -> Result<(), EngineFault> {
        self.heap_used = self.heap_used.saturating_add(bytes);
        if self.heap_used > self.heap_limit {
            return Err(EngineFault::HeapLimit);
        }
        Ok(())
    }

    pub fn heap_used(&self) -> u64 {
        self.heap_used
    }

    pub fn heap_limit(&self) -> u64 {
        self.heap_limit
    }

    /// True when the script rebound the memory binding
    pub fn memory_dirty(&self) -> bool {
        self.memory_written.is_some()
    }

    /// Drain captured state: (log, results, errors)
    pub(crate) fn take_console(&mut self) -> (Vec<String>, Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut self.console_log),
            std::mem::take(&mut self.console_results),
            std::mem::take(&mut self.console_errors),
        )
    }

    pub(crate) fn take_intents(
        &mut self,
    ) -> (HashMap<String, Value>, HashMap<String, HashMap<String, Value>>) {
        (
            std::mem::take(&mut self.global_intents),
            std::mem::take(&mut self.room_intents),
        )
    }

    pub(crate) fn discard_intents(&mut self) {
        self.global_intents.clear();
        self.room_intents.clear();
        self.notifications.clear();
    }

    pub(crate) fn take_notifications(&mut self) -> Vec<NotifyRequest> {
        std::mem::take(&mut self.notifications)
    }

    pub(crate) fn take_memory(&mut self) -> Option<String> {
        self.memory_written.take()
    }

    pub(crate) fn take_segments(&mut self) -> HashMap<u8, String> {
        std::mem::take(&mut self.segments_written)
    }

    pub(crate) fn take_inter_shard(&mut self) -> Option<String> {
        self.inter_shard_written.take()
    }
}

/// The engine seam: one embedded scripting engine per sandbox instance
pub trait ScriptEngine: Send + Sync {
    /// Handle the sandbox's timeout guard uses to interrupt a run
    fn interrupt_handle(&self) -> InterruptHandle;

    /// Run one script to completion or fault; side effects go through `host`
    fn execute(&mut self, job: &EngineJob, host: &mut HostBridge) -> Result<(), EngineFault>;
}

/// Deterministic built-in engine interpreting a JSON instruction stream
///
/// Scripts are a JSON array of ops, e.g.:
///
/// ```json
/// [
///   {"op": "log", "message": "tick"},
///   {"op": "intent", "name": "move", "payload": {"room": "W1N1", "id": "c1", "x": 11, "y": 10}},
///   {"op": "memory", "value": {"counter": 3}}
/// ]
/// ```
///
/// The interrupt flag is checked between ops, `burn` simulates CPU work in
/// interruptible 1ms slices, and `spin` loops until interrupted. Used by
/// the headless demo world and the test suite; a production deployment
/// swaps in a real embedding behind the same trait.
#[derive(Default)]
pub struct LocalEngine {
    interrupt: InterruptHandle,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LocalOp {
    Log { message: String },
    Result { message: String },
    Error { message: String },
    Intent { name: String, payload: Value },
    Notify {
        message: String,
        #[serde(default)]
        group_interval: Option<u32>,
    },
    Memory { value: Value },
    Segment { index: u8, value: String },
    InterShard { value: String },
    Burn { ms: u64 },
    Spin,
    Alloc { bytes: u64 },
    Fail { message: String },
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_interrupt(&self) -> Result<(), EngineFault> {
        if self.interrupt.is_interrupted() {
            return Err(EngineFault::Interrupted);
        }
        Ok(())
    }
}

impl ScriptEngine for LocalEngine {
    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn execute(&mut self, job: &EngineJob, host: &mut HostBridge) -> Result<(), EngineFault> {
        let ops: Vec<LocalOp> = serde_json::from_str(&job.source)
            .map_err(|e| EngineFault::Script(format!("parse error: {}", e)))?;

        for op in ops {
            self.check_interrupt()?;

            match op {
                LocalOp::Log { message } => host.console_log(message),
                LocalOp::Result { message } => host.console_result(message),
                LocalOp::Error { message } => host.console_error(message),
                LocalOp::Intent { name, payload } => {
                    host.charge_heap(payload.to_string().len() as u64)?;
                    host.register_intent(name, payload);
                }
                LocalOp::Notify {
                    message,
                    group_interval,
                } => host.notify(message, group_interval),
                LocalOp::Memory { value } => {
                    let blob = value.to_string();
                    host.charge_heap(blob.len() as u64)?;
                    host.set_memory(blob);
                }
                LocalOp::Segment { index, value } => {
                    host.charge_heap(value.len() as u64)?;
                    host.set_segment(index, value);
                }
                LocalOp::InterShard { value } => {
                    host.charge_heap(value.len() as u64)?;
                    host.set_inter_shard(value);
                }
                LocalOp::Burn { ms } => {
                    for _ in 0..ms {
                        self.check_interrupt()?;
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                LocalOp::Spin => loop {
                    self.check_interrupt()?;
                    std::thread::sleep(Duration::from_millis(1));
                },
                LocalOp::Alloc { bytes } => host.charge_heap(bytes)?,
                LocalOp::Fail { message } => return Err(EngineFault::Script(message)),
            }
        }

        Ok(())
    }
}
