use crate::calculator::AchievementStatus;
use crate::error::Result;
use crate::normalize::normalize_id;
use crate::overrides::Override;
use crate::rollup::Aggregation;
use crate::schema::{AggregationKey, IndicatorType, MeasureValue, PlanCategory, StrategicPlan};
use crate::targets::{resolve_in_timeline, ResolvedTarget};
use crate::utils::{clamp_percent, validate_year, Quarter};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressQuery {
    /// All categories when omitted.
    #[serde(default)]
    pub category_id: Option<String>,
    pub year: i32,
    /// All four quarters when omitted.
    #[serde(default)]
    pub quarter: Option<Quarter>,
}

impl ProgressQuery {
    pub fn year(year: i32) -> Self {
        Self {
            category_id: None,
            year,
            quarter: None,
        }
    }

    pub fn category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn quarter(mut self, quarter: Quarter) -> Self {
        self.quarter = Some(quarter);
        self
    }

    fn quarters(&self) -> Vec<Quarter> {
        match self.quarter {
            Some(q) => vec![q],
            None => Quarter::ALL.to_vec(),
        }
    }

    fn normalized_category(&self) -> Option<String> {
        self.category_id.as_deref().map(normalize_id)
    }

    pub(crate) fn matches(&self, row: &Aggregation) -> bool {
        row.key.year == self.year
            && self.quarter.map_or(true, |q| row.key.quarter == q)
            && self
                .normalized_category()
                .map_or(true, |c| row.key.category_id == c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideInfo {
    pub value: MeasureValue,
    pub reason: String,
    pub actor: String,
    pub set_at: DateTime<Utc>,
}

impl From<&Override> for OverrideInfo {
    fn from(o: &Override) -> Self {
        Self {
            value: o.value.clone(),
            reason: o.reason.clone(),
            actor: o.actor.clone(),
            set_at: o.set_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub category_id: String,
    pub indicator_id: String,
    pub indicator_name: Option<String>,
    pub year: i32,
    pub quarter: Quarter,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub indicator_type: IndicatorType,
    /// Override value when one is set, otherwise the ledger-derived value.
    pub reported: MeasureValue,
    /// Ledger-derived value, kept visible when overridden.
    pub computed: MeasureValue,
    pub target: Option<ResolvedTarget>,
    /// Clamped to [0, 100].
    pub achievement_percent: f64,
    pub status: AchievementStatus,
    pub submission_count: usize,
    pub participating_units: BTreeSet<String>,
    #[serde(rename = "override")]
    pub override_info: Option<OverrideInfo>,
    /// True when no rollup row exists yet for this cell.
    pub placeholder: bool,
}

impl ProgressRow {
    fn from_aggregation(row: &Aggregation, plan: &StrategicPlan) -> Self {
        let indicator_name = plan
            .target(&row.key.category_id, &row.key.indicator_id)
            .and_then(|t| t.name.clone());
        let period = row.key.quarter.date_range(row.key.year);

        Self {
            category_id: row.key.category_id.clone(),
            indicator_id: row.key.indicator_id.clone(),
            indicator_name,
            year: row.key.year,
            quarter: row.key.quarter,
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            indicator_type: row.indicator_type,
            reported: row.effective_value().clone(),
            computed: row.total_reported.clone(),
            target: row.target.clone(),
            achievement_percent: row.display_percent(),
            status: row.effective_status(),
            submission_count: row.submission_count,
            participating_units: row.participating_units.clone(),
            override_info: row.override_entry.as_ref().map(OverrideInfo::from),
            placeholder: false,
        }
    }

    fn placeholder(
        key: &AggregationKey,
        indicator_type: IndicatorType,
        indicator_name: Option<String>,
        target: Option<ResolvedTarget>,
    ) -> Self {
        let period = key.quarter.date_range(key.year);

        Self {
            category_id: key.category_id.clone(),
            indicator_id: key.indicator_id.clone(),
            indicator_name,
            year: key.year,
            quarter: key.quarter,
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            indicator_type,
            reported: MeasureValue::zero(),
            computed: MeasureValue::zero(),
            target,
            achievement_percent: clamp_percent(0.0),
            status: AchievementStatus::Pending,
            submission_count: 0,
            participating_units: BTreeSet::new(),
            override_info: None,
            placeholder: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    pub query: ProgressQuery,
    pub plan_version: String,
    pub rows: Vec<ProgressRow>,
    pub summary: BTreeMap<AchievementStatus, usize>,
}

impl ProgressView {
    pub fn row(&self, indicator_id: &str, quarter: Quarter) -> Option<&ProgressRow> {
        let indicator_id = normalize_id(indicator_id);
        self.rows
            .iter()
            .find(|r| r.indicator_id == indicator_id && r.quarter == quarter)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str(
            "Category,Indicator,Year,Quarter,Type,Reported,Target,Achievement,Status,Submissions,Units,Overridden,Placeholder\n",
        );

        for row in &self.rows {
            let target = row
                .target
                .as_ref()
                .map(|t| t.value.to_string())
                .unwrap_or_default();
            let units = row
                .participating_units
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");

            output.push_str(&format!(
                "{},{},{},{},{},{},{},{:.2},{},{},{},{},{}\n",
                csv_field(&row.category_id),
                csv_field(&row.indicator_id),
                row.year,
                row.quarter,
                row.indicator_type,
                csv_field(&row.reported.to_string()),
                csv_field(&target),
                row.achievement_percent,
                row.status,
                row.submission_count,
                csv_field(&units),
                row.override_info.is_some(),
                row.placeholder
            ));
        }

        output
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Assembles a complete indicator × quarter grid from committed rows.
pub struct ProgressViewBuilder<'a> {
    plan: &'a StrategicPlan,
}

impl<'a> ProgressViewBuilder<'a> {
    pub fn new(plan: &'a StrategicPlan) -> Self {
        Self { plan }
    }

    /// `rows` may contain rows outside the query; they are filtered here.
    /// Every planned indicator gets one row per requested quarter, with a
    /// PENDING placeholder where no rollup exists. Rows for indicators the
    /// plan does not list are appended after the planned grid.
    pub fn build(&self, query: &ProgressQuery, rows: &[Aggregation]) -> Result<ProgressView> {
        validate_year(query.year)?;

        let mut by_key: BTreeMap<&AggregationKey, &Aggregation> = rows
            .iter()
            .filter(|row| query.matches(row))
            .map(|row| (&row.key, row))
            .collect();

        let categories: Vec<&PlanCategory> = match query.category_id.as_deref() {
            Some(category_id) => self.plan.category(category_id).into_iter().collect(),
            None => self.plan.categories.iter().collect(),
        };
        let quarters = query.quarters();
        let mut grid = Vec::new();

        for category in categories {
            for indicator in &category.indicators {
                for quarter in &quarters {
                    let key = AggregationKey::new(&category.id, &indicator.indicator_id, query.year, *quarter)?;

                    let row = match by_key.remove(&key) {
                        Some(existing) => ProgressRow::from_aggregation(existing, self.plan),
                        None => ProgressRow::placeholder(
                            &key,
                            indicator.indicator_type,
                            indicator.name.clone(),
                            resolve_in_timeline(&indicator.timeline, query.year),
                        ),
                    };
                    grid.push(row);
                }
            }
        }

        grid.extend(
            by_key
                .into_values()
                .map(|row| ProgressRow::from_aggregation(row, self.plan)),
        );

        let mut summary = BTreeMap::new();
        for row in &grid {
            *summary.entry(row.status).or_insert(0) += 1;
        }

        Ok(ProgressView {
            query: query.clone(),
            plan_version: self.plan.version.clone(),
            rows: grid,
            summary,
        })
    }
}
