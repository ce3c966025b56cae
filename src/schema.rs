use crate::error::{ProgressError, Result};
use crate::normalize::normalize_id;
use crate::utils::{validate_year, Quarter};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorType {
    #[schemars(description = "Number of occurrences (graduates, publications). Contributions are summed.")]
    #[serde(alias = "count")]
    Count,

    #[schemars(
        description = "A rate in [0, 100]. Contributions are averaged after normalization, never summed."
    )]
    #[serde(alias = "percentage")]
    Percentage,

    #[schemars(description = "A monetary amount. Contributions are summed.")]
    #[serde(alias = "financial")]
    Financial,

    #[schemars(description = "A yes/no deliverable. Any truthy contribution completes it.")]
    #[serde(alias = "milestone")]
    Milestone,

    #[schemars(
        description = "A qualitative condition scored from a controlled vocabulary (e.g. 'satisfied')."
    )]
    #[serde(alias = "text_condition")]
    TextCondition,
}

impl IndicatorType {
    /// Maps a loosely-worded type hint from the extraction pipeline.
    pub fn from_hint(hint: &str) -> Option<Self> {
        let cleaned: String = hint
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();

        match cleaned.as_str() {
            "count" | "number" | "quantity" => Some(Self::Count),
            "percentage" | "percent" | "rate" | "ratio" => Some(Self::Percentage),
            "financial" | "currency" | "money" | "amount" => Some(Self::Financial),
            "milestone" | "binary" | "boolean" => Some(Self::Milestone),
            "textcondition" | "text" | "condition" | "qualitative" => Some(Self::TextCondition),
            _ => None,
        }
    }

    pub fn is_numeric_target(self) -> bool {
        matches!(self, Self::Count | Self::Percentage | Self::Financial)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Count => "COUNT",
            Self::Percentage => "PERCENTAGE",
            Self::Financial => "FINANCIAL",
            Self::Milestone => "MILESTONE",
            Self::TextCondition => "TEXT_CONDITION",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetScope {
    #[schemars(description = "The target applies once, institution-wide.")]
    #[default]
    Institutional,

    #[schemars(description = "The target applies to each reporting unit and is multiplied by the unit count.")]
    PerUnit,
}

/// A reported or planned value. Numbers cover COUNT/PERCENTAGE/FINANCIAL and
/// MILESTONE flags; text covers qualitative labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MeasureValue {
    Number(f64),
    Text(String),
}

impl MeasureValue {
    /// Numeric reading; text is accepted when it parses as a number
    /// (thousands separators and a trailing `%` are tolerated).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Number(_) => None,
            Self::Text(s) => {
                let cleaned = s.trim().trim_end_matches('%').replace(',', "");
                cleaned.trim().parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.trim().is_empty(),
        }
    }

    pub fn zero() -> Self {
        Self::Number(0.0)
    }
}

impl fmt::Display for MeasureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MeasureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MeasureValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineEntry {
    #[schemars(description = "Plan year the target applies to (e.g. 2026).")]
    pub year: i32,

    #[schemars(description = "Planned value for that year: a number, or a label for qualitative indicators.")]
    pub value: MeasureValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StrategicTarget {
    #[schemars(description = "Indicator identifier within its category (e.g. 'IKU 1.2').")]
    pub indicator_id: String,

    #[serde(default)]
    #[schemars(description = "Human readable indicator name.")]
    pub name: Option<String>,

    #[serde(rename = "type")]
    #[schemars(description = "How contributions are combined and compared to the target.")]
    pub indicator_type: IndicatorType,

    #[serde(default)]
    #[schemars(description = "INSTITUTIONAL (default) or PER_UNIT.")]
    pub scope: Option<TargetScope>,

    #[serde(default)]
    #[schemars(description = "Label of the unit the PER_UNIT multiplier counts (e.g. 'faculty').")]
    pub unit_basis: Option<String>,

    #[serde(default)]
    #[schemars(description = "Sparse yearly targets. Years need not be contiguous.")]
    pub timeline: Vec<TimelineEntry>,
}

impl StrategicTarget {
    /// Unspecified scope is always institutional.
    pub fn scope(&self) -> TargetScope {
        self.scope.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanCategory {
    #[schemars(description = "Category identifier (e.g. 'CAT 3').")]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub indicators: Vec<StrategicTarget>,
}

/// A versioned strategic plan document. Identifiers are normalized on load.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StrategicPlan {
    #[schemars(description = "Version label of the plan document (e.g. '2025-2029 rev 2').")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub categories: Vec<PlanCategory>,
}

impl StrategicPlan {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let plan: StrategicPlan = serde_json::from_str(json)?;
        let plan = plan.into_normalized();
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Rewrites every identifier into its canonical form and sorts timelines.
    pub fn into_normalized(mut self) -> Self {
        for category in &mut self.categories {
            category.id = normalize_id(&category.id);
            for indicator in &mut category.indicators {
                indicator.indicator_id = normalize_id(&indicator.indicator_id);
                indicator.timeline.sort_by_key(|entry| entry.year);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();

        for category in &self.categories {
            if category.id.is_empty() {
                return Err(ProgressError::EmptyIdentifier("category"));
            }

            for indicator in &category.indicators {
                let invalid = |details: String| ProgressError::InvalidPlan {
                    category: category.id.clone(),
                    indicator: indicator.indicator_id.clone(),
                    details,
                };

                if indicator.indicator_id.is_empty() {
                    return Err(ProgressError::EmptyIdentifier("indicator"));
                }
                if !seen.insert((category.id.as_str(), indicator.indicator_id.as_str())) {
                    return Err(invalid("indicator is declared more than once".to_string()));
                }

                let mut years = BTreeSet::new();
                for entry in &indicator.timeline {
                    validate_year(entry.year).map_err(|e| invalid(e.to_string()))?;
                    if !years.insert(entry.year) {
                        return Err(invalid(format!("year {} appears twice", entry.year)));
                    }
                    if indicator.indicator_type.is_numeric_target() {
                        match entry.value.as_number() {
                            Some(n) if n >= 0.0 => {}
                            _ => {
                                return Err(invalid(format!(
                                    "target for {} must be a non-negative number, got '{}'",
                                    entry.year, entry.value
                                )))
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Looks up an indicator; both ids are normalized before comparison.
    pub fn target(&self, category_id: &str, indicator_id: &str) -> Option<&StrategicTarget> {
        let category_id = normalize_id(category_id);
        let indicator_id = normalize_id(indicator_id);

        self.categories
            .iter()
            .filter(|c| c.id == category_id)
            .flat_map(|c| c.indicators.iter())
            .find(|i| i.indicator_id == indicator_id)
    }

    pub fn category(&self, category_id: &str) -> Option<&PlanCategory> {
        let category_id = normalize_id(category_id);
        self.categories.iter().find(|c| c.id == category_id)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(StrategicPlan)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// Opaque reference to the source document a contribution was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self(id.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized (category, indicator, year, quarter) identity of a rollup row.
///
/// Deserialization goes through [`AggregationKey::new`], so a key read from
/// JSON is always canonical. Keys built as struct literals are re-normalized
/// by the rollup engine before use.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAggregationKey")]
pub struct AggregationKey {
    pub category_id: String,
    pub indicator_id: String,
    pub year: i32,
    pub quarter: Quarter,
}

impl AggregationKey {
    pub fn new(category_id: &str, indicator_id: &str, year: i32, quarter: Quarter) -> Result<Self> {
        let category_id = normalize_id(category_id);
        let indicator_id = normalize_id(indicator_id);

        if category_id.is_empty() {
            return Err(ProgressError::EmptyIdentifier("category"));
        }
        if indicator_id.is_empty() {
            return Err(ProgressError::EmptyIdentifier("indicator"));
        }
        validate_year(year)?;

        Ok(Self {
            category_id,
            indicator_id,
            year,
            quarter,
        })
    }

    /// The canonical form of this key.
    pub fn normalized(&self) -> Result<Self> {
        Self::new(&self.category_id, &self.indicator_id, self.year, self.quarter)
    }
}

#[derive(Deserialize)]
struct RawAggregationKey {
    category_id: String,
    indicator_id: String,
    year: i32,
    quarter: Quarter,
}

impl TryFrom<RawAggregationKey> for AggregationKey {
    type Error = ProgressError;

    fn try_from(raw: RawAggregationKey) -> Result<Self> {
        Self::new(&raw.category_id, &raw.indicator_id, raw.year, raw.quarter)
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.category_id, self.indicator_id, self.year, self.quarter
        )
    }
}
