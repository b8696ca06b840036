//! Sequences migration processors against one store.
//!
//! Processors run strictly one at a time on a shared primary connection,
//! each committed as its own unit of work. A failed processor never rolls
//! back an earlier, already committed one; whether the run continues after
//! a failure is the script's `continue_on_error` policy. There is no global
//! rollback of a migration run.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::MigrationScript;
use crate::core::SchemaRepository;
use crate::error::Result;
use crate::processors::{ProcessorContext, ProcessorOutcome};
use crate::resolver::ModelIndex;
use crate::store::batch::WriteStats;
use crate::store::StorePool;

/// Outcome of one migration step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StepStatus {
    /// The processor ran and committed.
    Applied {
        /// Row counts.
        stats: WriteStats,
    },

    /// A best-effort precondition was not met.
    Skipped {
        /// Operator-facing reason.
        reason: String,
    },

    /// The processor aborted.
    Failed {
        /// Rendered error chain.
        error: String,
    },
}

/// Report entry for one migration step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Processor kind.
    pub name: String,

    /// What happened.
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Result of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Steps applied successfully.
    pub applied: usize,

    /// Steps skipped.
    pub skipped: usize,

    /// Steps failed.
    pub failed: usize,

    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// True iff no step failed.
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Drives a migration script, processor by processor.
pub struct MigrationRunner {
    pool: Arc<dyn StorePool>,
    schema: Arc<RwLock<SchemaRepository>>,
    model: Arc<ModelIndex>,
}

impl MigrationRunner {
    /// Create a runner over the given store, schema snapshot and model
    /// index.
    pub fn new(pool: Arc<dyn StorePool>, schema: SchemaRepository, model: ModelIndex) -> Self {
        Self {
            pool,
            schema: Arc::new(RwLock::new(schema)),
            model: Arc::new(model),
        }
    }

    /// The schema repository, as evolved by the processors run so far.
    pub fn schema(&self) -> SchemaRepository {
        self.schema.read().expect("schema lock poisoned").clone()
    }

    /// Execute all steps of a script.
    pub async fn run(&self, script: &MigrationScript) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting migration run {} ({} step(s)).",
            run_id,
            script.processors.len()
        );

        let ctx = ProcessorContext::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.schema),
            Arc::clone(&self.model),
        )
        .await?;

        let mut steps = Vec::with_capacity(script.processors.len());
        let mut applied = 0;
        let mut skipped = 0;
        let mut failed = 0;
        for (index, config) in script.processors.iter().enumerate() {
            let processor = config.build();
            info!(
                "Step {}/{}: running '{}'.",
                index + 1,
                script.processors.len(),
                processor.name()
            );
            let status = match processor.run(&ctx).await {
                Ok(ProcessorOutcome::Applied { stats }) => {
                    ctx.connection().commit().await?;
                    applied += 1;
                    StepStatus::Applied { stats }
                }
                Ok(ProcessorOutcome::Skipped { reason }) => {
                    warn!("Step '{}' skipped: {}", processor.name(), reason);
                    skipped += 1;
                    StepStatus::Skipped { reason }
                }
                Err(e) => {
                    error!("Step '{}' failed: {}", processor.name(), e.format_detailed());
                    failed += 1;
                    StepStatus::Failed {
                        error: e.format_detailed(),
                    }
                }
            };
            let is_failure = matches!(status, StepStatus::Failed { .. });
            steps.push(StepReport {
                name: processor.name().to_string(),
                status,
            });
            if is_failure && !script.continue_on_error {
                warn!("Aborting run after failed step (continue_on_error is off).");
                break;
            }
        }

        let completed_at = Utc::now();
        let report = RunReport {
            run_id,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            applied,
            skipped,
            failed,
            steps,
        };
        info!(
            "Migration run {} finished: {} applied, {} skipped, {} failed.",
            report.run_id, report.applied, report.skipped, report.failed
        );
        Ok(report)
    }
}
