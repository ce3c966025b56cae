//! Type-specific achievement math.
//!
//! Each indicator type maps to one [`AchievementRule`] variant and each
//! variant has its own evaluation function, so the five behaviours can be
//! tested in isolation and never leak into each other through shared
//! conditionals.

use crate::config::EngineConfig;
use crate::schema::{IndicatorType, MeasureValue, TargetScope};
use crate::utils::round_to;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementStatus {
    /// Nothing achieved yet (or no usable data).
    Pending,
    /// Below target but within the on-track band.
    OnTrack,
    /// Target reached or exceeded.
    Met,
    /// Some progress, below the on-track band.
    Missed,
    /// No plan entry or no usable target to compare against.
    NotApplicable,
}

impl fmt::Display for AchievementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::OnTrack => "ON_TRACK",
            Self::Met => "MET",
            Self::Missed => "MISSED",
            Self::NotApplicable => "NOT_APPLICABLE",
        };
        f.write_str(label)
    }
}

/// One value fed to the calculator, in chronological order.
#[derive(Debug, Clone, Copy)]
pub struct Measurement<'a> {
    pub value: &'a MeasureValue,
    pub denominator: Option<f64>,
}

impl<'a> Measurement<'a> {
    pub fn new(value: &'a MeasureValue) -> Self {
        Self {
            value,
            denominator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub reported: MeasureValue,
    /// Unclamped: a 130% COUNT stays 130 here and is clamped only for display.
    pub achievement_percent: f64,
    pub status: AchievementStatus,
    /// Measurements that entered the computation.
    pub included: usize,
    /// Measurements dropped as unusable (out-of-range percentages, non-numeric text).
    pub excluded: usize,
}

impl Achievement {
    /// Keeps the reported value but withdraws the comparison, used when the
    /// plan has no entry for the indicator.
    pub fn into_not_applicable(self) -> Self {
        Self {
            achievement_percent: 0.0,
            status: AchievementStatus::NotApplicable,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AchievementRule {
    /// COUNT and FINANCIAL: sum against a scope-adjusted target.
    Sum { effective_target: Option<f64> },
    /// PERCENTAGE: mean of normalized rates against the target rate.
    MeanPercentage { target: Option<f64> },
    /// MILESTONE: any truthy contribution completes it.
    Milestone,
    /// TEXT_CONDITION: latest label scored from the vocabulary.
    TextCondition,
}

impl AchievementRule {
    pub fn for_indicator(
        indicator_type: IndicatorType,
        scope: TargetScope,
        unit_multiplier: Option<u32>,
        target: Option<&MeasureValue>,
    ) -> Self {
        let numeric_target = target.and_then(MeasureValue::as_number);

        match indicator_type {
            IndicatorType::Count | IndicatorType::Financial => {
                let multiplier = match scope {
                    TargetScope::PerUnit => f64::from(unit_multiplier.unwrap_or(1).max(1)),
                    TargetScope::Institutional => 1.0,
                };
                Self::Sum {
                    effective_target: numeric_target.map(|t| t * multiplier),
                }
            }
            IndicatorType::Percentage => Self::MeanPercentage {
                target: numeric_target,
            },
            IndicatorType::Milestone => Self::Milestone,
            IndicatorType::TextCondition => Self::TextCondition,
        }
    }

    pub fn evaluate(&self, measurements: &[Measurement<'_>], config: &EngineConfig) -> Achievement {
        match self {
            Self::Sum { effective_target } => evaluate_sum(measurements, *effective_target, config),
            Self::MeanPercentage { target } => evaluate_mean_percentage(measurements, *target, config),
            Self::Milestone => evaluate_milestone(measurements),
            Self::TextCondition => evaluate_text_condition(measurements, config),
        }
    }
}

/// Status for a numeric achievement ratio; the ratio is not clamped first.
pub fn status_for_percent(percent: f64, config: &EngineConfig) -> AchievementStatus {
    if percent >= config.met_threshold {
        AchievementStatus::Met
    } else if percent >= config.on_track_threshold {
        AchievementStatus::OnTrack
    } else if percent > 0.0 {
        AchievementStatus::Missed
    } else {
        AchievementStatus::Pending
    }
}

/// A raw value already in [0, 100] is taken as-is; otherwise it is converted
/// through the denominator and kept only if the result is a valid rate.
/// Out-of-range values are never clamped.
pub fn normalize_percentage(value: f64, denominator: Option<f64>) -> Option<f64> {
    if (0.0..=100.0).contains(&value) {
        return Some(value);
    }

    let denominator = denominator.filter(|d| d.is_finite() && *d > 0.0)?;
    let rate = value / denominator * 100.0;
    (0.0..=100.0).contains(&rate).then_some(rate)
}

fn ratio_percent(reported: f64, target: Option<f64>) -> Option<f64> {
    let target = target.filter(|t| *t > 0.0)?;
    Some(reported / target * 100.0)
}

fn evaluate_sum(
    measurements: &[Measurement<'_>],
    effective_target: Option<f64>,
    config: &EngineConfig,
) -> Achievement {
    let mut total = 0.0;
    let mut included = 0;

    for m in measurements {
        match m.value.as_number() {
            Some(n) => {
                total += n;
                included += 1;
            }
            None => debug!("Skipping non-numeric value '{}' in summed indicator", m.value),
        }
    }

    let reported = round_to(total, config.precision);
    numeric_achievement(reported, total, effective_target, included, measurements.len(), config)
}

fn evaluate_mean_percentage(
    measurements: &[Measurement<'_>],
    target: Option<f64>,
    config: &EngineConfig,
) -> Achievement {
    let rates: Vec<f64> = measurements
        .iter()
        .filter_map(|m| {
            let rate = m
                .value
                .as_number()
                .and_then(|v| normalize_percentage(v, m.denominator));
            if rate.is_none() {
                debug!(
                    "Excluding percentage '{}' (denominator {:?}) from mean",
                    m.value, m.denominator
                );
            }
            rate
        })
        .collect();

    let mean = if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };

    let reported = round_to(mean, config.precision);
    numeric_achievement(reported, mean, target, rates.len(), measurements.len(), config)
}

fn numeric_achievement(
    reported: f64,
    unrounded: f64,
    target: Option<f64>,
    included: usize,
    total: usize,
    config: &EngineConfig,
) -> Achievement {
    let (achievement_percent, status) = match ratio_percent(unrounded, target) {
        Some(percent) => (
            round_to(percent, config.precision),
            status_for_percent(percent, config),
        ),
        None => (0.0, AchievementStatus::NotApplicable),
    };

    Achievement {
        reported: MeasureValue::Number(reported),
        achievement_percent,
        status,
        included,
        excluded: total - included,
    }
}

fn evaluate_milestone(measurements: &[Measurement<'_>]) -> Achievement {
    let done = measurements.iter().any(|m| m.value.is_truthy());

    Achievement {
        reported: MeasureValue::Number(if done { 1.0 } else { 0.0 }),
        achievement_percent: if done { 100.0 } else { 0.0 },
        status: if done {
            AchievementStatus::Met
        } else {
            AchievementStatus::Pending
        },
        included: measurements.len(),
        excluded: 0,
    }
}

fn evaluate_text_condition(measurements: &[Measurement<'_>], config: &EngineConfig) -> Achievement {
    let latest = measurements.iter().rev().find(|m| m.value.is_truthy());

    let Some(latest) = latest else {
        return Achievement {
            reported: MeasureValue::Text(String::new()),
            achievement_percent: 0.0,
            status: AchievementStatus::Pending,
            included: 0,
            excluded: measurements.len(),
        };
    };

    let label = latest.value.to_string();
    let score = config.text_score(&label);

    Achievement {
        reported: MeasureValue::Text(label),
        achievement_percent: score,
        status: status_for_percent(score, config),
        included: 1,
        excluded: measurements.len() - 1,
    }
}
