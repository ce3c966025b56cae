//! Derived per-indicator, per-period rollup rows.
//!
//! A rollup row is a materialized view of the ledger: [`compute_rollup`] is a
//! pure function of the plan, the configuration and the key's current
//! submissions, and every write path (new contribution, document removal,
//! override change, plan replacement) goes through it while holding the key's
//! lock. Rows are published with a single map insert, so readers observe
//! either the previous row or the new one.

use crate::calculator::{AchievementRule, AchievementStatus, Measurement};
use crate::config::EngineConfig;
use crate::error::{ProgressError, Result};
use crate::ledger::{Contribution, ContributionLedger};
use crate::legacy::{ActivityArchive, ActivityRecord};
use crate::overrides::Override;
use crate::schema::{AggregationKey, DocumentId, IndicatorType, MeasureValue, StrategicPlan};
use crate::targets::{resolve_in_timeline, ResolvedTarget};
use crate::utils::clamp_percent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub key: AggregationKey,
    pub indicator_type: IndicatorType,
    /// Ledger-derived value: a sum, a mean rate, a 0/1 flag or a label.
    pub total_reported: MeasureValue,
    pub submission_count: usize,
    /// Submissions that could not be used (e.g. out-of-range percentages).
    pub excluded_count: usize,
    pub participating_units: BTreeSet<String>,
    pub source_documents: BTreeSet<DocumentId>,
    /// Target the achievement was measured against, if one resolved.
    pub target: Option<ResolvedTarget>,
    pub achievement_percent: f64,
    pub status: AchievementStatus,
    pub last_contribution_at: Option<DateTime<Utc>>,
    #[serde(rename = "override")]
    pub override_entry: Option<Override>,
}

impl Aggregation {
    pub fn is_overridden(&self) -> bool {
        self.override_entry.is_some()
    }

    /// The value external readers see: the override when set.
    pub fn effective_value(&self) -> &MeasureValue {
        self.override_entry
            .as_ref()
            .map(|o| &o.value)
            .unwrap_or(&self.total_reported)
    }

    pub fn effective_percent(&self) -> f64 {
        self.override_entry
            .as_ref()
            .map(|o| o.achievement_percent)
            .unwrap_or(self.achievement_percent)
    }

    pub fn effective_status(&self) -> AchievementStatus {
        self.override_entry
            .as_ref()
            .map(|o| o.status)
            .unwrap_or(self.status)
    }

    /// Effective achievement clamped to [0, 100] for presentation.
    pub fn display_percent(&self) -> f64 {
        clamp_percent(self.effective_percent())
    }

    /// No submissions and no override: the row should not exist.
    pub fn is_vacant(&self) -> bool {
        self.submission_count == 0 && self.override_entry.is_none()
    }
}

struct Submission<'a> {
    value: &'a MeasureValue,
    denominator: Option<f64>,
    indicator_type: IndicatorType,
    unit: Option<&'a str>,
    document: Option<&'a DocumentId>,
    at: DateTime<Utc>,
}

impl<'a> From<&'a Contribution> for Submission<'a> {
    fn from(c: &'a Contribution) -> Self {
        Self {
            value: &c.value,
            denominator: c.denominator,
            indicator_type: c.indicator_type,
            unit: c.unit.as_deref(),
            document: Some(&c.source_document),
            at: c.recorded_at,
        }
    }
}

impl<'a> From<&'a ActivityRecord> for Submission<'a> {
    fn from(r: &'a ActivityRecord) -> Self {
        Self {
            value: &r.value,
            denominator: r.denominator,
            indicator_type: r.indicator_type,
            unit: r.unit.as_deref(),
            document: r.source_document.as_ref(),
            at: r.recorded_at,
        }
    }
}

/// Computes a rollup row from the key's current submissions.
///
/// Legacy activity records count as submissions alongside ledger
/// contributions. The row's indicator type is the type snapshot of its
/// earliest submission, falling back to the plan (and to COUNT when the plan
/// does not know the indicator). An existing override is carried over with its
/// derived achievement refreshed against the current target.
pub fn compute_rollup(
    key: &AggregationKey,
    plan: &StrategicPlan,
    config: &EngineConfig,
    contributions: &[Contribution],
    legacy: &[ActivityRecord],
    existing_override: Option<&Override>,
) -> Aggregation {
    let mut submissions: Vec<Submission<'_>> = legacy
        .iter()
        .map(Submission::from)
        .chain(contributions.iter().map(Submission::from))
        .collect();
    submissions.sort_by_key(|s| s.at);

    let definition = plan.target(&key.category_id, &key.indicator_id);
    let indicator_type = submissions
        .first()
        .map(|s| s.indicator_type)
        .or(definition.map(|d| d.indicator_type))
        .unwrap_or(IndicatorType::Count);

    if submissions.iter().any(|s| s.indicator_type != indicator_type) {
        warn!(
            "Rollup {} mixes indicator type snapshots; evaluating all as {}",
            key, indicator_type
        );
    }

    let participating_units: BTreeSet<String> = submissions
        .iter()
        .filter_map(|s| s.unit.map(str::to_string))
        .collect();
    let source_documents: BTreeSet<DocumentId> = submissions
        .iter()
        .filter_map(|s| s.document.cloned())
        .collect();

    let scope = definition.map(|d| d.scope()).unwrap_or_default();
    let unit_multiplier = u32::try_from(participating_units.len())
        .ok()
        .filter(|n| *n > 0);
    let target = definition.and_then(|d| resolve_in_timeline(&d.timeline, key.year));

    let rule = AchievementRule::for_indicator(
        indicator_type,
        scope,
        unit_multiplier,
        target.as_ref().map(|t| &t.value),
    );

    let measurements: Vec<Measurement<'_>> = submissions
        .iter()
        .map(|s| Measurement {
            value: s.value,
            denominator: s.denominator,
        })
        .collect();

    let mut achievement = rule.evaluate(&measurements, config);
    if definition.is_none() {
        achievement = achievement.into_not_applicable();
    }

    let override_entry =
        existing_override.map(|o| o.rederive(&rule, definition.is_some(), config));

    Aggregation {
        key: key.clone(),
        indicator_type,
        total_reported: achievement.reported,
        submission_count: submissions.len(),
        excluded_count: achievement.excluded,
        participating_units,
        source_documents,
        target,
        achievement_percent: achievement.achievement_percent,
        status: achievement.status,
        last_contribution_at: submissions.last().map(|s| s.at),
        override_entry,
    }
}

/// Committed rollup rows plus one lock per key.
#[derive(Debug, Default)]
pub(crate) struct AggregationStore {
    rows: DashMap<AggregationKey, Aggregation>,
    locks: DashMap<AggregationKey, Arc<Mutex<()>>>,
}

impl AggregationStore {
    /// Runs `f` while holding the key's write lock. Different keys never
    /// contend.
    pub(crate) fn with_key_lock<T>(&self, key: &AggregationKey, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        // The mutex guards no data, so a poisoned lock is still usable.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    pub(crate) fn get(&self, key: &AggregationKey) -> Option<Aggregation> {
        self.rows.get(key).map(|row| row.clone())
    }

    pub(crate) fn publish(&self, row: Aggregation) {
        self.rows.insert(row.key.clone(), row);
    }

    pub(crate) fn delete(&self, key: &AggregationKey) -> Option<Aggregation> {
        self.rows.remove(key).map(|(_, row)| row)
    }

    pub(crate) fn keys(&self) -> Vec<AggregationKey> {
        self.rows.iter().map(|row| row.key().clone()).collect()
    }

    pub(crate) fn keys_referencing(&self, document: &DocumentId) -> Vec<AggregationKey> {
        self.rows
            .iter()
            .filter(|row| row.source_documents.contains(document))
            .map(|row| row.key().clone())
            .collect()
    }

    pub(crate) fn snapshot(&self, keep: impl Fn(&Aggregation) -> bool) -> Vec<Aggregation> {
        let mut rows: Vec<Aggregation> = self
            .rows
            .iter()
            .filter(|row| keep(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

/// What a document removal changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReport {
    pub document: DocumentId,
    /// Exactly the ledger contributions that were retracted.
    pub removed_contributions: Vec<Contribution>,
    pub removed_activities: usize,
    pub updated_rows: Vec<AggregationKey>,
    pub deleted_rows: Vec<AggregationKey>,
    /// True when the document had no ledger entries and rows were recomputed
    /// from legacy activity records.
    pub used_legacy_fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebuildReport {
    pub recomputed: usize,
    /// Rows whose stored value differed from a fresh recompute.
    pub drifted: Vec<AggregationKey>,
    pub deleted: usize,
}

pub struct RollupEngine {
    config: EngineConfig,
    plan: RwLock<Arc<StrategicPlan>>,
    ledger: ContributionLedger,
    archive: ActivityArchive,
    pub(crate) store: AggregationStore,
}

impl RollupEngine {
    pub fn new(plan: StrategicPlan, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let plan = plan.into_normalized();
        plan.validate()?;

        info!(
            "Rollup engine initialised with plan '{}' ({} categories)",
            plan.version,
            plan.categories.len()
        );

        Ok(Self {
            config,
            plan: RwLock::new(Arc::new(plan)),
            ledger: ContributionLedger::new(),
            archive: ActivityArchive::new(),
            store: AggregationStore::default(),
        })
    }

    pub fn plan(&self) -> Arc<StrategicPlan> {
        self.plan
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub fn archive(&self) -> &ActivityArchive {
        &self.archive
    }

    pub fn aggregation(&self, key: &AggregationKey) -> Option<Aggregation> {
        let key = key.normalized().ok()?;
        self.store.get(&key)
    }

    /// All committed rows, ordered by key.
    pub fn aggregations(&self) -> Vec<Aggregation> {
        self.store.snapshot(|_| true)
    }

    pub fn row_count(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn snapshot(&self, keep: impl Fn(&Aggregation) -> bool) -> Vec<Aggregation> {
        self.store.snapshot(keep)
    }

    /// Appends a contribution and refreshes its row in one locked step.
    pub fn insert_contribution(&self, mut contribution: Contribution) -> Result<Aggregation> {
        contribution.key = contribution.key.normalized()?;
        let key = contribution.key.clone();

        self.store.with_key_lock(&key, || {
            self.ledger.append(contribution)?;
            self.recompute_locked(&key)
                .ok_or_else(|| ProgressError::NoAggregation(key.to_string()))
        })
    }

    pub fn import_legacy(&self, mut record: ActivityRecord) -> Result<Aggregation> {
        record.key = record.key.normalized()?;
        let key = record.key.clone();

        self.store.with_key_lock(&key, || {
            self.archive.import(record);
            self.recompute_locked(&key)
                .ok_or_else(|| ProgressError::NoAggregation(key.to_string()))
        })
    }

    /// Retracts everything a source document contributed.
    ///
    /// Each affected row is recomputed from its remaining submissions, which
    /// is exactly equivalent to a fresh rollup. A document with no ledger
    /// entries is treated as pre-ledger data: its legacy activity records are
    /// dropped and every row that still references it is recomputed (and
    /// deleted when nothing remains). The sweep repeats until the ledger holds
    /// no entry for the document, so a contribution appended concurrently
    /// under a new key is retracted too.
    pub fn remove_document(&self, document: &DocumentId) -> RemovalReport {
        let ledger_keys = self.ledger.keys_for_document(document);
        let used_legacy_fallback = ledger_keys.is_empty();

        let mut keys: BTreeSet<AggregationKey> = ledger_keys.into_iter().collect();
        keys.extend(self.archive.keys_for_document(document));
        if used_legacy_fallback {
            warn!(
                "Document {} has no ledger entries; recomputing from legacy activity records",
                document
            );
            keys.extend(self.store.keys_referencing(document));
        }

        let mut report = RemovalReport {
            document: document.clone(),
            removed_contributions: Vec::new(),
            removed_activities: 0,
            updated_rows: Vec::new(),
            deleted_rows: Vec::new(),
            used_legacy_fallback,
        };

        while !keys.is_empty() {
            for key in std::mem::take(&mut keys) {
                self.store.with_key_lock(&key, || {
                    report
                        .removed_contributions
                        .extend(self.ledger.remove_document_from_key(document, &key));
                    report.removed_activities +=
                        self.archive.remove_document_from_key(document, &key).len();

                    report.updated_rows.retain(|k| k != &key);
                    report.deleted_rows.retain(|k| k != &key);
                    match self.recompute_locked(&key) {
                        Some(_) => report.updated_rows.push(key.clone()),
                        None => report.deleted_rows.push(key.clone()),
                    }
                });
            }

            // Contributions from the same document may have landed under
            // keys not seen yet while the sweep ran.
            keys.extend(self.ledger.keys_for_document(document));
        }

        info!(
            "Removed document {}: {} contributions, {} legacy activities, {} rows updated, {} rows deleted",
            document,
            report.removed_contributions.len(),
            report.removed_activities,
            report.updated_rows.len(),
            report.deleted_rows.len()
        );

        report
    }

    /// Recomputes one row from the ledger.
    pub fn recompute(&self, key: &AggregationKey) -> Option<Aggregation> {
        let key = key.normalized().ok()?;
        self.store.with_key_lock(&key, || self.recompute_locked(&key))
    }

    /// Recomputes every known row and reports rows that had drifted from the
    /// ledger.
    pub fn rebuild_all(&self) -> RebuildReport {
        let mut keys: BTreeSet<AggregationKey> = self.store.keys().into_iter().collect();
        keys.extend(self.ledger.keys());
        keys.extend(self.archive.keys());

        let mut report = RebuildReport::default();
        for key in keys {
            self.store.with_key_lock(&key, || {
                let before = self.store.get(&key);
                let after = self.recompute_locked(&key);
                report.recomputed += 1;

                if before.is_some() && after.is_none() {
                    report.deleted += 1;
                }
                if before != after {
                    warn!("Rollup {} drifted from its ledger and was rebuilt", key);
                    report.drifted.push(key.clone());
                }
            });
        }

        report
    }

    /// Swaps in a new plan version and rebuilds every row against it.
    pub fn replace_plan(&self, plan: StrategicPlan) -> Result<RebuildReport> {
        let plan = plan.into_normalized();
        plan.validate()?;

        info!("Replacing strategic plan with version '{}'", plan.version);
        *self.plan.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(plan);

        Ok(self.rebuild_all())
    }

    /// Builds the row for `key` without publishing it. Caller holds the lock.
    pub(crate) fn compute_locked(
        &self,
        key: &AggregationKey,
        override_entry: Option<&Override>,
    ) -> Aggregation {
        let contributions = self.ledger.for_key(key);
        let legacy = self.archive.for_key(key);
        let plan = self.plan();

        compute_rollup(
            key,
            &plan,
            &self.config,
            &contributions,
            &legacy,
            override_entry,
        )
    }

    /// Publishes a row, or deletes it when vacant. Caller holds the lock.
    pub(crate) fn commit_locked(&self, row: Aggregation) -> Option<Aggregation> {
        if row.is_vacant() {
            if self.store.delete(&row.key).is_some() {
                debug!("Deleted rollup {} (no submissions, no override)", row.key);
            }
            return None;
        }

        debug!(
            "Rollup {}: reported {} from {} submissions, {}% ({})",
            row.key, row.total_reported, row.submission_count, row.achievement_percent, row.status
        );
        self.store.publish(row.clone());
        Some(row)
    }

    pub(crate) fn recompute_locked(&self, key: &AggregationKey) -> Option<Aggregation> {
        let existing_override = self.store.get(key).and_then(|row| row.override_entry);
        let row = self.compute_locked(key, existing_override.as_ref());
        self.commit_locked(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::{OverrideManager, OverrideRequest};
    use crate::schema::{PlanCategory, StrategicTarget, TargetScope, TimelineEntry};
    use crate::utils::Quarter;
    use chrono::TimeZone;

    fn plan() -> StrategicPlan {
        let indicator = |id: &str, indicator_type, scope, target: f64| StrategicTarget {
            indicator_id: id.to_string(),
            name: None,
            indicator_type,
            scope,
            unit_basis: None,
            timeline: vec![TimelineEntry {
                year: 2026,
                value: MeasureValue::Number(target),
            }],
        };

        StrategicPlan {
            version: "test".to_string(),
            name: None,
            categories: vec![PlanCategory {
                id: "CAT1".to_string(),
                name: None,
                indicators: vec![
                    indicator("IKU1", IndicatorType::Count, None, 10.0),
                    indicator("IKU2", IndicatorType::Percentage, None, 80.0),
                    indicator("IKU3", IndicatorType::Count, Some(TargetScope::PerUnit), 5.0),
                ],
            }],
        }
    }

    fn key(indicator: &str) -> AggregationKey {
        AggregationKey::new("CAT1", indicator, 2026, Quarter::new(1).unwrap()).unwrap()
    }

    fn contribution(indicator: &str, value: f64, document: &str) -> Contribution {
        let indicator_type = if indicator == "IKU2" {
            IndicatorType::Percentage
        } else {
            IndicatorType::Count
        };
        Contribution::new(key(indicator), value, indicator_type, DocumentId::new(document))
    }

    fn engine() -> RollupEngine {
        RollupEngine::new(plan(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_compute_rollup_is_idempotent() {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        let contributions = vec![
            contribution("IKU1", 3.0, "a").recorded_at(at),
            contribution("IKU1", 4.0, "b").recorded_at(at),
        ];
        let plan = plan();
        let config = EngineConfig::default();

        let first = compute_rollup(&key("IKU1"), &plan, &config, &contributions, &[], None);
        let second = compute_rollup(&key("IKU1"), &plan, &config, &contributions, &[], None);

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.total_reported, MeasureValue::Number(7.0));
        assert_eq!(first.achievement_percent, 70.0);
        assert_eq!(first.status, AchievementStatus::Missed);
        assert_eq!(first.submission_count, 2);
    }

    #[test]
    fn test_unknown_indicator_is_not_applicable() {
        let contributions = vec![contribution("IKU9", 5.0, "a")];
        let row = compute_rollup(
            &key("IKU9"),
            &plan(),
            &EngineConfig::default(),
            &contributions,
            &[],
            None,
        );
        assert_eq!(row.total_reported, MeasureValue::Number(5.0));
        assert_eq!(row.status, AchievementStatus::NotApplicable);
        assert_eq!(row.achievement_percent, 0.0);
        assert!(row.target.is_none());
    }

    #[test]
    fn test_per_unit_multiplier_counts_participating_units() {
        let contributions = vec![
            contribution("IKU3", 4.0, "a").with_unit("Faculty A"),
            contribution("IKU3", 4.0, "b").with_unit("Faculty B"),
            contribution("IKU3", 2.0, "c").with_unit("Faculty A"),
        ];
        let row = compute_rollup(
            &key("IKU3"),
            &plan(),
            &EngineConfig::default(),
            &contributions,
            &[],
            None,
        );
        assert_eq!(row.participating_units.len(), 2);
        assert_eq!(row.achievement_percent, 100.0);
        assert_eq!(row.status, AchievementStatus::Met);
    }

    #[test]
    fn test_insert_then_remove_document_deletes_row() {
        let engine = engine();
        let row = engine
            .insert_contribution(contribution("IKU1", 5.0, "doc-1"))
            .unwrap();
        assert_eq!(row.total_reported, MeasureValue::Number(5.0));

        let report = engine.remove_document(&DocumentId::new("doc-1"));
        assert_eq!(report.removed_contributions.len(), 1);
        assert_eq!(report.deleted_rows, vec![key("IKU1")]);
        assert!(!report.used_legacy_fallback);
        assert!(engine.aggregation(&key("IKU1")).is_none());
        assert!(engine.ledger().is_empty());
    }

    #[test]
    fn test_remove_document_recomputes_remaining_mean() {
        let engine = engine();
        engine
            .insert_contribution(contribution("IKU2", 70.0, "doc-1"))
            .unwrap();
        engine
            .insert_contribution(contribution("IKU2", 90.0, "doc-2"))
            .unwrap();
        assert_eq!(
            engine.aggregation(&key("IKU2")).unwrap().total_reported,
            MeasureValue::Number(80.0)
        );

        engine.remove_document(&DocumentId::new("doc-2"));
        let row = engine.aggregation(&key("IKU2")).unwrap();
        assert_eq!(row.total_reported, MeasureValue::Number(70.0));
        assert_eq!(row.submission_count, 1);
        assert_eq!(row.achievement_percent, 87.5);
        assert_eq!(row.status, AchievementStatus::OnTrack);
    }

    #[test]
    fn test_legacy_fallback_recomputes_from_remaining_activities() {
        let engine = engine();
        let old = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        let legacy = |value: f64, document: Option<&str>| ActivityRecord {
            key: key("IKU1"),
            value: MeasureValue::Number(value),
            denominator: None,
            indicator_type: IndicatorType::Count,
            unit: None,
            source_document: document.map(DocumentId::new),
            recorded_at: old,
        };

        engine.import_legacy(legacy(6.0, Some("scan-2019"))).unwrap();
        engine.import_legacy(legacy(2.0, None)).unwrap();
        assert_eq!(
            engine.aggregation(&key("IKU1")).unwrap().total_reported,
            MeasureValue::Number(8.0)
        );

        let report = engine.remove_document(&DocumentId::new("scan-2019"));
        assert!(report.used_legacy_fallback);
        assert_eq!(report.removed_activities, 1);
        let row = engine.aggregation(&key("IKU1")).unwrap();
        assert_eq!(row.total_reported, MeasureValue::Number(2.0));

        let missing = engine.remove_document(&DocumentId::new("never-seen"));
        assert!(missing.used_legacy_fallback);
        assert!(missing.updated_rows.is_empty());
        assert!(missing.deleted_rows.is_empty());
    }

    #[test]
    fn test_rebuild_all_is_stable() {
        let engine = engine();
        engine
            .insert_contribution(contribution("IKU1", 3.0, "doc-1"))
            .unwrap();
        let report = engine.rebuild_all();
        assert_eq!(report.recomputed, 1);
        assert!(report.drifted.is_empty());
    }

    #[test]
    fn test_replace_plan_rebuilds_rows() {
        let engine = engine();
        engine
            .insert_contribution(contribution("IKU1", 5.0, "doc-1"))
            .unwrap();
        assert_eq!(engine.aggregation(&key("IKU1")).unwrap().achievement_percent, 50.0);

        let mut revised = plan();
        revised.version = "rev-2".to_string();
        revised.categories[0].indicators[0].timeline[0].value = MeasureValue::Number(5.0);

        let report = engine.replace_plan(revised).unwrap();
        assert_eq!(report.drifted, vec![key("IKU1")]);
        let row = engine.aggregation(&key("IKU1")).unwrap();
        assert_eq!(row.achievement_percent, 100.0);
        assert_eq!(row.status, AchievementStatus::Met);
    }

    #[test]
    fn test_legacy_fallback_deletes_row_when_nothing_remains() {
        let engine = engine();
        engine
            .import_legacy(ActivityRecord {
                key: key("IKU1"),
                value: MeasureValue::Number(6.0),
                denominator: None,
                indicator_type: IndicatorType::Count,
                unit: None,
                source_document: Some(DocumentId::new("scan-2019")),
                recorded_at: Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap(),
            })
            .unwrap();

        let report = engine.remove_document(&DocumentId::new("scan-2019"));
        assert!(report.used_legacy_fallback);
        assert_eq!(report.removed_activities, 1);
        assert_eq!(report.deleted_rows, vec![key("IKU1")]);
        assert!(report.updated_rows.is_empty());
        assert!(engine.aggregation(&key("IKU1")).is_none());
        assert!(engine.archive().is_empty());
    }

    #[test]
    fn test_removal_keeps_overridden_row_without_submissions() {
        let engine = engine();
        let manager = OverrideManager::new();
        engine
            .insert_contribution(contribution("IKU1", 3.0, "only-report"))
            .unwrap();
        manager
            .set(
                &engine,
                &OverrideRequest {
                    category_id: "CAT1".to_string(),
                    indicator_id: "IKU1".to_string(),
                    year: 2026,
                    quarter: 1,
                    value: MeasureValue::Number(10.0),
                    reason: "confirmed with the faculty".to_string(),
                    actor: "registrar".to_string(),
                },
            )
            .unwrap();

        let report = engine.remove_document(&DocumentId::new("only-report"));
        assert_eq!(report.updated_rows, vec![key("IKU1")]);
        assert!(report.deleted_rows.is_empty());

        let row = engine.aggregation(&key("IKU1")).unwrap();
        assert_eq!(row.submission_count, 0);
        assert_eq!(row.total_reported, MeasureValue::Number(0.0));
        assert!(row.is_overridden());
        assert_eq!(row.effective_value(), &MeasureValue::Number(10.0));
        assert_eq!(row.effective_status(), AchievementStatus::Met);
    }

    #[test]
    fn test_raw_keys_are_normalized_on_entry() {
        let engine = engine();
        let record: ActivityRecord = serde_json::from_str(
            r#"{
                "key": {"category_id": "cat 1", "indicator_id": "iku 01", "year": 2026, "quarter": 1},
                "value": 4,
                "indicator_type": "COUNT",
                "source_document": "scan-2019",
                "recorded_at": "2025-12-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(record.key, key("IKU1"));
        engine.import_legacy(record).unwrap();

        let mut literal = contribution("IKU1", 3.0, "doc-1");
        literal.key = AggregationKey {
            category_id: "cat  1".to_string(),
            indicator_id: "iku1".to_string(),
            year: 2026,
            quarter: Quarter::new(1).unwrap(),
        };
        let row = engine.insert_contribution(literal).unwrap();

        assert_eq!(row.key, key("IKU1"));
        assert_eq!(row.total_reported, MeasureValue::Number(7.0));
        assert_eq!(row.submission_count, 2);
        assert_eq!(engine.row_count(), 1);
        assert_eq!(engine.ledger().for_key(&key("IKU1")).len(), 1);
    }

    #[test]
    fn test_remove_document_sweeps_concurrent_appends() {
        let engine = engine();
        let document = DocumentId::new("bulk-upload");

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for quarter in 1..=4u8 {
                    for indicator in ["IKU1", "IKU3"] {
                        let key =
                            AggregationKey::new("CAT1", indicator, 2026, Quarter::new(quarter).unwrap())
                                .unwrap();
                        engine
                            .insert_contribution(Contribution::new(
                                key,
                                1.0,
                                IndicatorType::Count,
                                document.clone(),
                            ))
                            .unwrap();
                    }
                }
            });
            scope.spawn(|| {
                for _ in 0..20 {
                    engine.remove_document(&document);
                }
            });
        });

        engine.remove_document(&document);
        assert!(!engine.ledger().has_document(&document));
        assert_eq!(engine.row_count(), 0);
        assert!(engine.rebuild_all().drifted.is_empty());
    }
}
