use crate::error::{ProgressError, Result};
use chrono::{Days, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_PLAN_YEAR: i32 = 1900;
pub const MAX_PLAN_YEAR: i32 = 2200;

/// A reporting quarter, always within 1..=4.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quarter(u8);

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter(1), Quarter(2), Quarter(3), Quarter(4)];

    pub fn new(value: u8) -> Result<Self> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ProgressError::InvalidQuarter(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// First and last calendar day covered by this quarter of `year`.
    pub fn date_range(self, year: i32) -> Option<(NaiveDate, NaiveDate)> {
        let first_month = u32::from(self.0) * 3 - 2;
        let start = NaiveDate::from_ymd_opt(year, first_month, 1)?;
        let end = last_day_of_month(year, first_month + 2)?;
        Some((start, end))
    }
}

impl TryFrom<u8> for Quarter {
    type Error = ProgressError;

    fn try_from(value: u8) -> Result<Self> {
        Quarter::new(value)
    }
}

impl From<Quarter> for u8 {
    fn from(quarter: Quarter) -> Self {
        quarter.0
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

pub fn validate_year(year: i32) -> Result<()> {
    if !(MIN_PLAN_YEAR..=MAX_PLAN_YEAR).contains(&year) {
        return Err(ProgressError::InvalidYear(year));
    }
    Ok(())
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Clamps a percentage into the displayable [0, 100] band.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
