// src/validation/pipeline.rs
//! Validator chain with early-exit semantics
//!
//! The schema stage converts raw payloads into typed ones, then the
//! remaining stages run in fixed order. The first failure drops the intent
//! from the output — silently, by product decision — and skips every later
//! stage for that intent.

use crate::validation::payload::{IntentPayload, IntentRecord, RejectionCode, ValidIntent};
use crate::validation::stages::{PermissionStage, RangeStage, ResourceStage, StateStage};
use crate::validation::stats::ValidationStats;
use crate::world::RoomSnapshot;
use std::sync::Arc;
use tracing::trace;

/// A schema-validated intent moving through the post-schema stages
pub struct IntentInFlight<'a> {
    pub record: &'a IntentRecord,
    pub payload: &'a IntentPayload,
}

/// One independent validator in the chain
pub trait ValidationStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(
        &self,
        intent: &IntentInFlight<'_>,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RejectionCode>;
}

/// The full pipeline: schema conversion plus the ordered stage chain
pub struct ValidationPipeline {
    stages: Vec<Box<dyn ValidationStage>>,
    stats: Arc<ValidationStats>,
}

impl ValidationPipeline {
    /// Standard chain: State → Range → Permission → Resource
    pub fn new(stats: Arc<ValidationStats>) -> Self {
        Self::with_stages(
            vec![
                Box::new(StateStage),
                Box::new(RangeStage),
                Box::new(PermissionStage),
                Box::new(ResourceStage),
            ],
            stats,
        )
    }

    /// Custom stage chain (tests inject spies here)
    pub fn with_stages(stages: Vec<Box<dyn ValidationStage>>, stats: Arc<ValidationStats>) -> Self {
        Self { stages, stats }
    }

    pub fn stats(&self) -> &Arc<ValidationStats> {
        &self.stats
    }

    /// Validate a batch of intents against one room snapshot
    ///
    /// Returns only the intents that passed every stage. An empty input
    /// yields an empty output, never an error.
    pub fn validate(&self, intents: &[IntentRecord], snapshot: &RoomSnapshot) -> Vec<ValidIntent> {
        let mut valid = Vec::with_capacity(intents.len());

        'intents: for record in intents {
            let payload = match IntentPayload::parse(&record.name, &record.payload) {
                Ok(payload) => payload,
                Err(code) => {
                    trace!(
                        room = %snapshot.room,
                        intent = %record.name,
                        code = code.as_str(),
                        "Intent rejected at schema stage"
                    );
                    self.stats.record_rejection(&record.name, code);
                    continue;
                }
            };

            let in_flight = IntentInFlight {
                record,
                payload: &payload,
            };

            for stage in &self.stages {
                if let Err(code) = stage.check(&in_flight, snapshot) {
                    trace!(
                        room = %snapshot.room,
                        intent = %record.name,
                        stage = stage.name(),
                        code = code.as_str(),
                        "Intent rejected"
                    );
                    self.stats.record_rejection(&record.name, code);
                    continue 'intents;
                }
            }

            self.stats.record_pass(&record.name);
            valid.push(ValidIntent {
                record: record.clone(),
                payload,
            });
        }

        valid
    }
}
