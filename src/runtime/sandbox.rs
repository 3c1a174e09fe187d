// src/runtime/sandbox.rs
//! One-shot sandboxed script execution
//!
//! A `Sandbox` wraps one `ScriptEngine` instance and serves one execution
//! at a time. The contract is "always returns a result": timeouts, heap
//! breaches, and uncaught script errors all come back as structured result
//! fields, never as `Err` or a panic.
//!
//! The wall-clock interrupt is derived from
//! `max(ctx.cpu_limit_ms, default_cpu_limit_ms) + interrupt_buffer_ms`; a
//! detached guard thread fires the engine's interrupt handle on expiry.

use crate::runtime::engine::{
    EngineFault, EngineJob, HostBridge, InterruptHandle, NotifyRequest, ScriptEngine,
};
use crate::utils::config::RuntimeConfig;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Immutable input to one sandbox run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Owning user id
    pub user_id: String,

    /// Hash of the deployed script bundle
    pub code_hash: String,

    /// Per-tick CPU limit in milliseconds
    pub cpu_limit_ms: u64,

    /// Banked overflow allowance in milliseconds
    pub cpu_bucket_ms: u64,

    /// Current tick number
    pub tick: u64,

    /// Main memory blob, if the user has one
    pub memory: Option<String>,

    /// Keyed memory segments (0-99) requested for this run
    pub memory_segments: HashMap<u8, String>,

    /// Inter-shard segment
    pub inter_shard_segment: Option<String>,

    /// Raw script/module source
    pub script: String,

    /// Bypass the warm pool and invalidate after use
    pub force_cold: bool,
}

/// Execution telemetry attached to every result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// The wall-clock interrupt fired
    pub timed_out: bool,

    /// The script raised an uncaught error or breached the heap ceiling
    pub script_error: bool,

    /// Heap bytes accounted during the run
    pub heap_used: u64,

    /// Heap ceiling for the run
    pub heap_limit: u64,
}

/// Output of one sandbox run
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Buffered console log lines
    pub console_log: Vec<String>,

    /// Buffered console result lines
    pub console_results: Vec<String>,

    /// Buffered console error lines
    pub console_errors: Vec<String>,

    /// Script error text, if the run faulted
    pub error: Option<String>,

    /// Global intents keyed by intent name
    pub global_intents: HashMap<String, Value>,

    /// Per-room intents: room → intent name → payload
    pub room_intents: HashMap<String, HashMap<String, Value>>,

    /// Queued notify requests
    pub notifications: Vec<NotifyRequest>,

    /// Updated memory blob; `None` means the script never rebound it and
    /// the caller must skip the write
    pub memory: Option<String>,

    /// Sparse map of segments the script actually wrote
    pub memory_segments: HashMap<u8, String>,

    /// Updated inter-shard segment, if written
    pub inter_shard_segment: Option<String>,

    /// CPU consumed in milliseconds
    pub cpu_used_ms: u64,

    /// Execution telemetry
    pub metrics: ExecutionMetrics,
}

impl ExecutionResult {
    /// True when the run ended without a timeout or script error
    pub fn succeeded(&self) -> bool {
        !self.metrics.timed_out && !self.metrics.script_error
    }
}

/// Guard thread that fires an interrupt handle after a deadline
struct TimeoutGuard {
    done: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TimeoutGuard {
    fn arm(handle: InterruptHandle, deadline: Duration) -> Self {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let done_clone = Arc::clone(&done);

        let thread = std::thread::spawn(move || {
            let (lock, condvar) = &*done_clone;
            let mut finished = lock.lock();
            let start = Instant::now();
            while !*finished {
                let remaining = match deadline.checked_sub(start.elapsed()) {
                    Some(r) => r,
                    None => {
                        handle.interrupt();
                        return;
                    }
                };
                let timeout = condvar.wait_for(&mut finished, remaining);
                if timeout.timed_out() && !*finished {
                    handle.interrupt();
                    return;
                }
            }
        });

        Self {
            done,
            thread: Some(thread),
        }
    }

    fn disarm(mut self) {
        let (lock, condvar) = &*self.done;
        *lock.lock() = true;
        condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// One isolated execution environment for one user's script
pub struct Sandbox {
    user_id: String,
    code_hash: String,
    engine: Box<dyn ScriptEngine>,
    defaults: RuntimeConfig,

    /// Executions served by this instance (warm reuse counter)
    executions: u64,
}

impl Sandbox {
    pub fn new(
        user_id: impl Into<String>,
        code_hash: impl Into<String>,
        engine: Box<dyn ScriptEngine>,
        defaults: RuntimeConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            code_hash: code_hash.into(),
            engine,
            defaults,
            executions: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Execute one script run; synchronous, one at a time per instance
    pub fn execute(&mut self, ctx: &ExecutionContext) -> ExecutionResult {
        self.executions += 1;

        let cpu_limit = ctx.cpu_limit_ms.max(self.defaults.default_cpu_limit_ms);
        let deadline = Duration::from_millis(cpu_limit + self.defaults.interrupt_buffer_ms);

        trace!(
            user = %ctx.user_id,
            tick = ctx.tick,
            limit_ms = cpu_limit,
            "Sandbox execution starting"
        );

        let mut host = HostBridge::new(
            ctx.memory.clone(),
            ctx.memory_segments.clone(),
            self.defaults.heap_limit_bytes,
        );

        let job = EngineJob {
            user_id: ctx.user_id.clone(),
            tick: ctx.tick,
            source: ctx.script.clone(),
        };

        let handle = self.engine.interrupt_handle();
        handle.clear();
        let guard = TimeoutGuard::arm(handle, deadline);

        let started = Instant::now();
        let outcome = self.engine.execute(&job, &mut host);
        let elapsed = started.elapsed();
        guard.disarm();

        let mut result = ExecutionResult {
            cpu_used_ms: elapsed.as_millis() as u64,
            metrics: ExecutionMetrics {
                timed_out: false,
                script_error: false,
                heap_used: host.heap_used(),
                heap_limit: host.heap_limit(),
            },
            ..Default::default()
        };

        match outcome {
            Ok(()) => {}
            Err(EngineFault::Interrupted) => {
                debug!(user = %ctx.user_id, tick = ctx.tick, "Script interrupted at CPU limit");
                result.metrics.timed_out = true;
                result.error = Some(format!("script execution timed out after {}ms", cpu_limit));
                // Timed-out runs apply no partial intents
                host.discard_intents();
            }
            Err(EngineFault::HeapLimit) => {
                debug!(user = %ctx.user_id, tick = ctx.tick, "Script breached heap ceiling");
                result.metrics.script_error = true;
                result.error = Some(format!(
                    "heap limit of {} bytes exceeded",
                    host.heap_limit()
                ));
            }
            Err(EngineFault::Script(message)) => {
                debug!(user = %ctx.user_id, tick = ctx.tick, error = %message, "Script error");
                result.metrics.script_error = true;
                result.error = Some(message);
            }
        }

        let (log, results, errors) = host.take_console();
        result.console_log = log;
        result.console_results = results;
        result.console_errors = errors;

        let (global, rooms) = host.take_intents();
        result.global_intents = global;
        result.room_intents = rooms;
        result.notifications = host.take_notifications();

        // An untouched memory binding stays None: that absence is the
        // caller's signal to skip the write entirely.
        result.memory = host.take_memory();
        result.memory_segments = host.take_segments();
        result.inter_shard_segment = host.take_inter_shard();

        result
    }
}
