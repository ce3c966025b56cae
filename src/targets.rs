use crate::schema::{MeasureValue, StrategicPlan, StrategicTarget, TimelineEntry};
use serde::{Deserialize, Serialize};

/// The timeline entry chosen for a requested year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Year of the entry actually used.
    pub year: i32,
    pub value: MeasureValue,
    /// False when the value came from a neighbouring year.
    pub exact: bool,
}

/// Picks the target for `year`: an exact match, else the most recent past
/// entry, else the nearest future entry.
///
/// Plans are often authored with sparse milestones (only a final-year value),
/// so intermediate years still resolve to something sensible.
pub fn resolve_in_timeline(timeline: &[TimelineEntry], year: i32) -> Option<ResolvedTarget> {
    if let Some(entry) = timeline.iter().find(|e| e.year == year) {
        return Some(ResolvedTarget {
            year: entry.year,
            value: entry.value.clone(),
            exact: true,
        });
    }

    let past = timeline
        .iter()
        .filter(|e| e.year < year)
        .max_by_key(|e| e.year);
    let future = || {
        timeline
            .iter()
            .filter(|e| e.year > year)
            .min_by_key(|e| e.year)
    };

    past.or_else(future).map(|entry| ResolvedTarget {
        year: entry.year,
        value: entry.value.clone(),
        exact: false,
    })
}

pub struct TargetResolver<'a> {
    plan: &'a StrategicPlan,
}

impl<'a> TargetResolver<'a> {
    pub fn new(plan: &'a StrategicPlan) -> Self {
        Self { plan }
    }

    pub fn lookup(&self, category_id: &str, indicator_id: &str) -> Option<&'a StrategicTarget> {
        self.plan.target(category_id, indicator_id)
    }

    /// `None` both when the indicator is not in the plan and when its
    /// timeline is empty.
    pub fn resolve(&self, category_id: &str, indicator_id: &str, year: i32) -> Option<ResolvedTarget> {
        let target = self.lookup(category_id, indicator_id)?;
        resolve_in_timeline(&target.timeline, year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndicatorType, PlanCategory};

    fn entry(year: i32, value: f64) -> TimelineEntry {
        TimelineEntry {
            year,
            value: MeasureValue::Number(value),
        }
    }

    #[test]
    fn test_exact_year_wins() {
        let timeline = vec![entry(2025, 10.0), entry(2026, 20.0), entry(2029, 50.0)];
        let resolved = resolve_in_timeline(&timeline, 2026).unwrap();
        assert_eq!(resolved.value, MeasureValue::Number(20.0));
        assert!(resolved.exact);
    }

    #[test]
    fn test_only_future_entry_resolves() {
        let timeline = vec![entry(2029, 100.0)];
        let resolved = resolve_in_timeline(&timeline, 2026).unwrap();
        assert_eq!(resolved.year, 2029);
        assert_eq!(resolved.value, MeasureValue::Number(100.0));
        assert!(!resolved.exact);
    }

    #[test]
    fn test_most_recent_past_beats_future() {
        let timeline = vec![entry(2029, 90.0), entry(2024, 30.0), entry(2025, 40.0)];
        let resolved = resolve_in_timeline(&timeline, 2027).unwrap();
        assert_eq!(resolved.year, 2025);
    }

    #[test]
    fn test_equal_distance_prefers_past() {
        let timeline = vec![entry(2025, 1.0), entry(2027, 3.0)];
        assert_eq!(resolve_in_timeline(&timeline, 2026).unwrap().year, 2025);
    }

    #[test]
    fn test_empty_timeline_is_not_found() {
        assert!(resolve_in_timeline(&[], 2026).is_none());
    }

    #[test]
    fn test_resolver_normalizes_ids() {
        let plan = StrategicPlan {
            version: "v1".to_string(),
            name: None,
            categories: vec![PlanCategory {
                id: "CAT2".to_string(),
                name: None,
                indicators: vec![StrategicTarget {
                    indicator_id: "IKU4".to_string(),
                    name: None,
                    indicator_type: IndicatorType::Count,
                    scope: None,
                    unit_basis: None,
                    timeline: vec![entry(2029, 12.0)],
                }],
            }],
        };

        let resolver = TargetResolver::new(&plan);
        let resolved = resolver.resolve("cat 2", "iku  4", 2026).unwrap();
        assert_eq!(resolved.value, MeasureValue::Number(12.0));
        assert!(resolver.resolve("CAT2", "IKU5", 2026).is_none());
    }
}
