use crate::error::{ProgressError, Result};
use crate::schema::{AggregationKey, DocumentId, IndicatorType, MeasureValue};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// One accepted measurement extracted from one source document.
///
/// Contributions are never edited. The type snapshot is captured when the
/// contribution is created, so a later change of the plan's indicator type
/// does not reinterpret history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: Uuid,
    pub key: AggregationKey,
    pub value: MeasureValue,
    /// Paired denominator for rates reported as raw counts.
    #[serde(default)]
    pub denominator: Option<f64>,
    pub indicator_type: IndicatorType,
    /// Reporting unit (faculty, department...) that submitted the value.
    #[serde(default)]
    pub unit: Option<String>,
    pub source_document: DocumentId,
    pub recorded_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(
        key: AggregationKey,
        value: impl Into<MeasureValue>,
        indicator_type: IndicatorType,
        source_document: DocumentId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            value: value.into(),
            denominator: None,
            indicator_type,
            unit: None,
            source_document,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        let unit = crate::normalize::collapse_whitespace(&unit.into());
        self.unit = (!unit.is_empty()).then_some(unit);
        self
    }

    pub fn with_denominator(mut self, denominator: f64) -> Self {
        self.denominator = Some(denominator);
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = at;
        self
    }
}

/// Append-only store of contributions, indexed by rollup key and by source
/// document.
///
/// Callers that need the ledger and a rollup row to change together hold the
/// key's lock in the rollup store around both.
#[derive(Debug, Default)]
pub struct ContributionLedger {
    by_key: DashMap<AggregationKey, Vec<Contribution>>,
    by_document: DashMap<DocumentId, BTreeSet<AggregationKey>>,
    ids: DashMap<Uuid, AggregationKey>,
}

impl ContributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, contribution: Contribution) -> Result<()> {
        match self.ids.entry(contribution.id) {
            Entry::Occupied(_) => {
                return Err(ProgressError::DuplicateContribution(
                    contribution.id.to_string(),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(contribution.key.clone());
            }
        }

        self.by_document
            .entry(contribution.source_document.clone())
            .or_default()
            .insert(contribution.key.clone());
        self.by_key
            .entry(contribution.key.clone())
            .or_default()
            .push(contribution);

        Ok(())
    }

    /// Contributions for a key in recording order.
    pub fn for_key(&self, key: &AggregationKey) -> Vec<Contribution> {
        let mut entries = self
            .by_key
            .get(key)
            .map(|entries| entries.clone())
            .unwrap_or_default();
        entries.sort_by_key(|c| c.recorded_at);
        entries
    }

    pub fn count_for_key(&self, key: &AggregationKey) -> usize {
        self.by_key.get(key).map(|entries| entries.len()).unwrap_or(0)
    }

    /// Numeric sum of a key's contributions; text values that do not parse
    /// are ignored.
    pub fn sum_for_key(&self, key: &AggregationKey) -> f64 {
        self.by_key
            .get(key)
            .map(|entries| entries.iter().filter_map(|c| c.value.as_number()).sum())
            .unwrap_or(0.0)
    }

    pub fn keys_for_document(&self, document: &DocumentId) -> Vec<AggregationKey> {
        self.by_document
            .get(document)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn for_document(&self, document: &DocumentId) -> Vec<Contribution> {
        self.keys_for_document(document)
            .iter()
            .flat_map(|key| {
                self.for_key(key)
                    .into_iter()
                    .filter(|c| &c.source_document == document)
            })
            .collect()
    }

    pub fn has_document(&self, document: &DocumentId) -> bool {
        self.by_document.contains_key(document)
    }

    /// Removes the document's contributions under one key and returns exactly
    /// what was removed.
    pub fn remove_document_from_key(
        &self,
        document: &DocumentId,
        key: &AggregationKey,
    ) -> Vec<Contribution> {
        let removed: Vec<Contribution> = match self.by_key.get_mut(key) {
            Some(mut entries) => {
                let (gone, kept) = std::mem::take(&mut *entries)
                    .into_iter()
                    .partition(|c| &c.source_document == document);
                *entries = kept;
                gone
            }
            None => Vec::new(),
        };

        self.by_key.remove_if(key, |_, entries| entries.is_empty());
        for contribution in &removed {
            self.ids.remove(&contribution.id);
        }

        if let Some(mut keys) = self.by_document.get_mut(document) {
            keys.remove(key);
        }
        self.by_document.remove_if(document, |_, keys| keys.is_empty());

        removed
    }

    /// Removes every contribution referencing the document.
    pub fn remove_document(&self, document: &DocumentId) -> Vec<Contribution> {
        self.keys_for_document(document)
            .iter()
            .flat_map(|key| self.remove_document_from_key(document, key))
            .collect()
    }

    pub fn keys(&self) -> Vec<AggregationKey> {
        self.by_key.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Quarter;
    use chrono::TimeZone;

    fn key(indicator: &str, quarter: u8) -> AggregationKey {
        AggregationKey::new("CAT1", indicator, 2026, Quarter::new(quarter).unwrap()).unwrap()
    }

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id)
    }

    #[test]
    fn test_append_and_query_by_key() {
        let ledger = ContributionLedger::new();
        let k = key("IKU1", 1);

        ledger
            .append(Contribution::new(k.clone(), 3.0, IndicatorType::Count, doc("report-a")))
            .unwrap();
        ledger
            .append(Contribution::new(k.clone(), 4.0, IndicatorType::Count, doc("report-b")))
            .unwrap();

        assert_eq!(ledger.count_for_key(&k), 2);
        assert_eq!(ledger.sum_for_key(&k), 7.0);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.sum_for_key(&key("IKU1", 2)), 0.0);
    }

    #[test]
    fn test_for_key_orders_by_recording_time() {
        let ledger = ContributionLedger::new();
        let k = key("IKU1", 1);
        let later = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();

        ledger
            .append(Contribution::new(k.clone(), "second", IndicatorType::TextCondition, doc("b")).recorded_at(later))
            .unwrap();
        ledger
            .append(Contribution::new(k.clone(), "first", IndicatorType::TextCondition, doc("a")).recorded_at(earlier))
            .unwrap();

        let values: Vec<String> = ledger.for_key(&k).iter().map(|c| c.value.to_string()).collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let ledger = ContributionLedger::new();
        let c = Contribution::new(key("IKU1", 1), 1.0, IndicatorType::Count, doc("a"));

        ledger.append(c.clone()).unwrap();
        let err = ledger.append(c).unwrap_err();
        assert!(matches!(err, ProgressError::DuplicateContribution(_)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_remove_document_returns_exactly_its_contributions() {
        let ledger = ContributionLedger::new();
        let k1 = key("IKU1", 1);
        let k2 = key("IKU2", 1);

        let a1 = Contribution::new(k1.clone(), 5.0, IndicatorType::Count, doc("a"));
        let a2 = Contribution::new(k2.clone(), 2.0, IndicatorType::Count, doc("a"));
        let b1 = Contribution::new(k1.clone(), 7.0, IndicatorType::Count, doc("b"));
        for c in [a1.clone(), a2.clone(), b1.clone()] {
            ledger.append(c).unwrap();
        }

        assert_eq!(ledger.for_document(&doc("a")).len(), 2);

        let mut removed_ids: Vec<Uuid> = ledger.remove_document(&doc("a")).iter().map(|c| c.id).collect();
        removed_ids.sort();
        let mut expected = vec![a1.id, a2.id];
        expected.sort();
        assert_eq!(removed_ids, expected);

        assert_eq!(ledger.for_key(&k1), vec![b1]);
        assert_eq!(ledger.count_for_key(&k2), 0);
        assert!(!ledger.has_document(&doc("a")));
        assert!(ledger.keys().iter().all(|k| k != &k2));

        assert!(ledger.remove_document(&doc("a")).is_empty());
    }

    #[test]
    fn test_unit_is_collapsed() {
        let c = Contribution::new(key("IKU1", 1), 1.0, IndicatorType::Count, doc("a"))
            .with_unit("  Faculty   of Law ");
        assert_eq!(c.unit.as_deref(), Some("Faculty of Law"));

        let blank = Contribution::new(key("IKU1", 1), 1.0, IndicatorType::Count, doc("a")).with_unit("  ");
        assert_eq!(blank.unit, None);
    }
}
