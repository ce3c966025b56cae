use crate::calculator::{AchievementRule, AchievementStatus, Measurement};
use crate::config::EngineConfig;
use crate::error::{ProgressError, Result};
use crate::rollup::{Aggregation, RollupEngine};
use crate::schema::{AggregationKey, IndicatorType, MeasureValue};
use crate::utils::Quarter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A human-entered value that supersedes the ledger-derived rollup.
///
/// `value`, `reason`, `actor` and `set_at` are authored by whoever set the
/// override; the achievement fields are derived from `value` with the same
/// rule the rollup uses and are refreshed whenever the row is recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub value: MeasureValue,
    pub reason: String,
    pub actor: String,
    pub set_at: DateTime<Utc>,
    pub achievement_percent: f64,
    pub status: AchievementStatus,
}

impl Override {
    pub(crate) fn rederive(
        &self,
        rule: &AchievementRule,
        plan_known: bool,
        config: &EngineConfig,
    ) -> Override {
        let mut achievement = rule.evaluate(&[Measurement::new(&self.value)], config);
        if !plan_known {
            achievement = achievement.into_not_applicable();
        }

        Override {
            achievement_percent: achievement.achievement_percent,
            status: achievement.status,
            ..self.clone()
        }
    }
}

/// Request to set an override. Missing `actor` or `reason` deserialize as
/// empty strings and are rejected by [`OverrideManager::set`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OverrideRequest {
    pub category_id: String,
    pub indicator_id: String,
    pub year: i32,
    pub quarter: u8,
    pub value: MeasureValue,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actor: String,
}

impl OverrideRequest {
    pub fn key(&self) -> Result<AggregationKey> {
        request_key(&self.category_id, &self.indicator_id, self.year, self.quarter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearOverrideRequest {
    pub category_id: String,
    pub indicator_id: String,
    pub year: i32,
    pub quarter: u8,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actor: String,
}

impl ClearOverrideRequest {
    pub fn key(&self) -> Result<AggregationKey> {
        request_key(&self.category_id, &self.indicator_id, self.year, self.quarter)
    }
}

fn request_key(category_id: &str, indicator_id: &str, year: i32, quarter: u8) -> Result<AggregationKey> {
    AggregationKey::new(category_id, indicator_id, year, Quarter::new(quarter)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Set,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub key: AggregationKey,
    pub action: OverrideAction,
    pub actor: String,
    pub reason: String,
    pub previous_value: Option<MeasureValue>,
    pub new_value: Option<MeasureValue>,
    pub at: DateTime<Utc>,
}

/// Append-only trail of override transitions, kept per rollup key.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: DashMap<AggregationKey, Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn record(&self, entry: AuditEntry) {
        self.entries.entry(entry.key.clone()).or_default().push(entry);
    }

    pub fn for_key(&self, key: &AggregationKey) -> Vec<AuditEntry> {
        self.entries
            .get(key)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Every entry, oldest first.
    pub fn all(&self) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|e| e.at);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sole writer of the override sub-record on rollup rows.
#[derive(Debug, Default)]
pub struct OverrideManager {
    audit: AuditLog,
}

impl OverrideManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the override for a key, creating an override-only
    /// row when the key has no submissions yet.
    pub fn set(&self, engine: &RollupEngine, request: &OverrideRequest) -> Result<Aggregation> {
        let actor = required("set", "actor", &request.actor)?;
        let reason = required("set", "reason", &request.reason)?;
        let key = request.key()?;

        engine.store.with_key_lock(&key, || {
            let previous_value = engine
                .store
                .get(&key)
                .and_then(|row| row.override_entry)
                .map(|o| o.value);

            let pending = Override {
                value: request.value.clone(),
                reason: reason.clone(),
                actor: actor.clone(),
                set_at: Utc::now(),
                achievement_percent: 0.0,
                status: AchievementStatus::Pending,
            };
            let row = engine.compute_locked(&key, Some(&pending));
            validate_override_value(&request.value, row.indicator_type)?;

            let row = engine
                .commit_locked(row)
                .ok_or_else(|| ProgressError::NoAggregation(key.to_string()))?;

            info!(
                "Override set on {} by {}: {} -> {} ({})",
                key,
                actor,
                request.value,
                row.effective_status(),
                reason
            );
            self.audit.record(AuditEntry {
                key: key.clone(),
                action: OverrideAction::Set,
                actor,
                reason,
                previous_value,
                new_value: Some(request.value.clone()),
                at: pending.set_at,
            });

            Ok(row)
        })
    }

    /// Clears the override; the ledger-derived value is recomputed and becomes
    /// authoritative again. Returns `None` when the row was override-only and
    /// has therefore been deleted.
    pub fn clear(
        &self,
        engine: &RollupEngine,
        request: &ClearOverrideRequest,
    ) -> Result<Option<Aggregation>> {
        let actor = required("clear", "actor", &request.actor)?;
        let reason = required("clear", "reason", &request.reason)?;
        let key = request.key()?;

        engine.store.with_key_lock(&key, || {
            let row = engine
                .store
                .get(&key)
                .ok_or_else(|| ProgressError::NoAggregation(key.to_string()))?;

            let Some(previous) = row.override_entry else {
                debug!("Clear requested on {} which has no override", key);
                return Ok(Some(row));
            };

            let recomputed = engine.commit_locked(engine.compute_locked(&key, None));

            info!(
                "Override cleared on {} by {} (was {}): {}",
                key, actor, previous.value, reason
            );
            self.audit.record(AuditEntry {
                key: key.clone(),
                action: OverrideAction::Clear,
                actor,
                reason,
                previous_value: Some(previous.value),
                new_value: None,
                at: Utc::now(),
            });

            Ok(recomputed)
        })
    }

    pub fn audit_trail(&self, key: &AggregationKey) -> Vec<AuditEntry> {
        key.normalized()
            .map(|key| self.audit.for_key(&key))
            .unwrap_or_default()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }
}

fn required(operation: &'static str, field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProgressError::MissingAuditField { operation, field });
    }
    Ok(trimmed.to_string())
}

fn validate_override_value(value: &MeasureValue, indicator_type: IndicatorType) -> Result<()> {
    let valid = match indicator_type {
        IndicatorType::Count | IndicatorType::Financial => value.as_number().is_some(),
        IndicatorType::Percentage => value
            .as_number()
            .is_some_and(|n| (0.0..=100.0).contains(&n)),
        IndicatorType::Milestone => true,
        IndicatorType::TextCondition => matches!(value, MeasureValue::Text(s) if !s.trim().is_empty()),
    };

    if valid {
        Ok(())
    } else {
        Err(ProgressError::InvalidOverrideValue {
            value: value.to_string(),
            indicator_type: indicator_type.to_string(),
        })
    }
}
