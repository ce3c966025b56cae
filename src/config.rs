use crate::error::{ProgressError, Result};
use crate::normalize::normalize_label;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Tunables for achievement scoring. Every field has a default, so an empty
/// JSON object is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "Achievement percent at or above which an indicator is MET.")]
    pub met_threshold: f64,

    #[schemars(description = "Achievement percent at or above which an indicator is ON_TRACK.")]
    pub on_track_threshold: f64,

    #[schemars(description = "Decimal places kept on reported means and achievement percentages.")]
    pub precision: u32,

    #[schemars(
        description = "Score (0-100) for each qualitative label of TEXT_CONDITION indicators. Labels not listed score 0."
    )]
    pub text_condition_scores: BTreeMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut text_condition_scores = BTreeMap::new();
        text_condition_scores.insert("satisfied".to_string(), 100.0);
        text_condition_scores.insert("partially satisfied".to_string(), 50.0);

        Self {
            met_threshold: 100.0,
            on_track_threshold: 80.0,
            precision: 2,
            text_condition_scores,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.on_track_threshold > 0.0 && self.on_track_threshold <= self.met_threshold) {
            return Err(ProgressError::InvalidConfig(format!(
                "on_track_threshold {} must be positive and not above met_threshold {}",
                self.on_track_threshold, self.met_threshold
            )));
        }
        if !self.met_threshold.is_finite() {
            return Err(ProgressError::InvalidConfig(
                "met_threshold must be finite".to_string(),
            ));
        }
        if self.precision > 6 {
            return Err(ProgressError::InvalidConfig(format!(
                "precision {} exceeds 6 decimal places",
                self.precision
            )));
        }
        for (label, score) in &self.text_condition_scores {
            if !(0.0..=100.0).contains(score) {
                return Err(ProgressError::InvalidConfig(format!(
                    "score {} for label '{}' must be within 0-100",
                    score, label
                )));
            }
        }
        Ok(())
    }

    /// Score for a qualitative label; matching ignores case and spacing.
    pub fn text_score(&self, label: &str) -> f64 {
        let wanted = normalize_label(label);
        self.text_condition_scores
            .iter()
            .find(|(known, _)| normalize_label(known) == wanted)
            .map(|(_, score)| *score)
            .unwrap_or(0.0)
    }
}
