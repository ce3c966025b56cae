//! # KPI Achievement Engine
//!
//! A library for rolling up per-document KPI contributions into per-period
//! achievement figures measured against a multi-year strategic plan.
//!
//! ## Core Concepts
//!
//! - **Strategic Plan**: Categories of indicators, each with a type and a sparse year → target timeline
//! - **Contribution**: One value extracted from one source document for one (category, indicator, year, quarter)
//! - **Aggregation**: The rollup row for a key, recomputed from its contributions on every change
//! - **Exact Deletion**: Removing a document retracts exactly what it contributed
//! - **Override**: An audited human value that supersedes the computed rollup until cleared
//!
//! ## Example
//!
//! ```rust,ignore
//! use kpi_achievement_engine::*;
//!
//! let plan = StrategicPlan::from_json_str(r#"{
//!     "version": "2025-2029",
//!     "categories": [{
//!         "id": "CAT1",
//!         "indicators": [{
//!             "indicator_id": "IKU1",
//!             "type": "COUNT",
//!             "timeline": [{ "year": 2026, "value": 10 }]
//!         }]
//!     }]
//! }"#).unwrap();
//!
//! let tracker = ProgressTracker::new(plan, EngineConfig::default()).unwrap();
//! tracker
//!     .record_contribution(ContributionEvent::new("CAT1", "IKU1", 2026, 1, 4.0, "q1-report.pdf"))
//!     .unwrap();
//!
//! let view = tracker.progress(&ProgressQuery::year(2026)).unwrap();
//! println!("{}", view.to_csv());
//! ```

pub mod calculator;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod legacy;
pub mod normalize;
pub mod overrides;
pub mod progress;
pub mod rollup;
pub mod schema;
pub mod targets;
pub mod utils;

pub use calculator::{Achievement, AchievementRule, AchievementStatus, Measurement};
pub use config::EngineConfig;
pub use error::{ProgressError, Result};
pub use ingestion::*;
pub use ledger::{Contribution, ContributionLedger};
pub use legacy::{ActivityArchive, ActivityRecord};
pub use normalize::{normalize_id, normalize_label};
pub use overrides::*;
pub use progress::*;
pub use rollup::{compute_rollup, Aggregation, RebuildReport, RemovalReport, RollupEngine};
pub use schema::*;
pub use targets::{ResolvedTarget, TargetResolver};
pub use utils::*;

use log::{debug, info};

/// Entry point wiring the rollup engine, override manager and view builder
/// behind one API. Safe to share across threads.
pub struct ProgressTracker {
    engine: RollupEngine,
    overrides: OverrideManager,
}

impl ProgressTracker {
    pub fn new(plan: StrategicPlan, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            engine: RollupEngine::new(plan, config)?,
            overrides: OverrideManager::new(),
        })
    }

    pub fn record_contribution(&self, event: ContributionEvent) -> Result<Aggregation> {
        let contribution = event.into_contribution(&self.engine.plan())?;
        debug!(
            "Recording {} for {} from {}",
            contribution.value, contribution.key, contribution.source_document
        );
        self.engine.insert_contribution(contribution)
    }

    /// Records a batch. A failing event is reported and does not stop the
    /// rest of the batch.
    pub fn ingest_events(&self, events: Vec<ContributionEvent>) -> IngestReport {
        let mut report = IngestReport::default();

        for (index, event) in events.into_iter().enumerate() {
            match self.record_contribution(event) {
                Ok(_) => report.accepted += 1,
                Err(e) => report.rejected.push(RejectedEvent {
                    index,
                    reason: e.to_string(),
                }),
            }
        }

        info!(
            "Ingested batch: {} accepted, {} rejected",
            report.accepted,
            report.rejected.len()
        );
        report
    }

    pub fn ingest_json(&self, json: &str) -> Result<IngestReport> {
        Ok(self.ingest_events(parse_event_batch(json)?))
    }

    pub fn remove_document(&self, document: &DocumentId) -> RemovalReport {
        self.engine.remove_document(document)
    }

    pub fn import_legacy_activity(&self, record: ActivityRecord) -> Result<Aggregation> {
        self.engine.import_legacy(record)
    }

    pub fn set_override(&self, request: &OverrideRequest) -> Result<Aggregation> {
        self.overrides.set(&self.engine, request)
    }

    pub fn clear_override(&self, request: &ClearOverrideRequest) -> Result<Option<Aggregation>> {
        self.overrides.clear(&self.engine, request)
    }

    pub fn progress(&self, query: &ProgressQuery) -> Result<ProgressView> {
        let plan = self.engine.plan();
        let rows = self.engine.snapshot(|row| query.matches(row));
        ProgressViewBuilder::new(&plan).build(query, &rows)
    }

    pub fn aggregation(&self, key: &AggregationKey) -> Option<Aggregation> {
        self.engine.aggregation(key)
    }

    pub fn audit_trail(&self, key: &AggregationKey) -> Vec<AuditEntry> {
        self.overrides.audit_trail(key)
    }

    /// Swaps in a new plan and recomputes every row against it.
    pub fn replace_plan(&self, plan: StrategicPlan) -> Result<RebuildReport> {
        self.engine.replace_plan(plan)
    }

    pub fn rebuild_all(&self) -> RebuildReport {
        self.engine.rebuild_all()
    }

    pub fn engine(&self) -> &RollupEngine {
        &self.engine
    }
}
