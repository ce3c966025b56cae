use crate::error::{ProgressError, Result};
use crate::ledger::Contribution;
use crate::schema::{AggregationKey, DocumentId, IndicatorType, MeasureValue, StrategicPlan};
use crate::utils::Quarter;
use chrono::{DateTime, Utc};
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One value emitted by the document extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContributionEvent {
    pub category_id: String,
    pub indicator_id: String,
    pub year: i32,
    pub quarter: u8,
    pub value: MeasureValue,
    /// Indicator type guessed by the pipeline. Only used when the plan does
    /// not list the indicator.
    #[serde(default)]
    pub type_hint: Option<String>,
    pub source_document: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub denominator: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    /// Lets a replayed event be recognised as a duplicate.
    #[serde(default)]
    pub contribution_id: Option<Uuid>,
}

impl ContributionEvent {
    pub fn new(
        category_id: impl Into<String>,
        indicator_id: impl Into<String>,
        year: i32,
        quarter: u8,
        value: impl Into<MeasureValue>,
        source_document: impl Into<String>,
    ) -> Self {
        Self {
            category_id: category_id.into(),
            indicator_id: indicator_id.into(),
            year,
            quarter,
            value: value.into(),
            type_hint: None,
            source_document: source_document.into(),
            unit: None,
            denominator: None,
            recorded_at: None,
            contribution_id: None,
        }
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_denominator(mut self, denominator: f64) -> Self {
        self.denominator = Some(denominator);
        self
    }

    pub fn key(&self) -> Result<AggregationKey> {
        AggregationKey::new(
            &self.category_id,
            &self.indicator_id,
            self.year,
            Quarter::new(self.quarter)?,
        )
    }

    /// The plan's indicator type is authoritative; the pipeline hint is only
    /// a fallback for indicators the plan does not define.
    pub fn resolve_type(&self, plan: &StrategicPlan) -> IndicatorType {
        let hinted = self.type_hint.as_deref().and_then(IndicatorType::from_hint);

        match plan.target(&self.category_id, &self.indicator_id) {
            Some(target) => {
                if let Some(hint) = hinted.filter(|h| *h != target.indicator_type) {
                    warn!(
                        "Type hint {} for {}/{} disagrees with plan type {}; using plan type",
                        hint, self.category_id, self.indicator_id, target.indicator_type
                    );
                }
                target.indicator_type
            }
            None => hinted.unwrap_or(IndicatorType::Count),
        }
    }

    pub fn into_contribution(self, plan: &StrategicPlan) -> Result<Contribution> {
        let key = self.key()?;
        let indicator_type = self.resolve_type(plan);
        let document = DocumentId::new(self.source_document);
        if document.as_str().is_empty() {
            return Err(ProgressError::EmptyIdentifier("source_document"));
        }

        let mut contribution = Contribution::new(key, self.value, indicator_type, document);
        if let Some(id) = self.contribution_id {
            contribution.id = id;
        }
        if let Some(unit) = self.unit {
            contribution = contribution.with_unit(unit);
        }
        if let Some(denominator) = self.denominator {
            contribution = contribution.with_denominator(denominator);
        }
        if let Some(at) = self.recorded_at {
            contribution = contribution.recorded_at(at);
        }

        Ok(contribution)
    }
}

pub fn parse_event_batch(json: &str) -> Result<Vec<ContributionEvent>> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedEvent {
    /// Position of the event in the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedEvent>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}
