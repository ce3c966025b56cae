//! Raw per-activity records imported from before the contribution ledger
//! existed.
//!
//! Such records carry a value for a rollup key but were never stamped into the
//! ledger, so a document removal that finds no ledger entries falls back to
//! recomputing from whatever activity records remain here.

use crate::schema::{AggregationKey, DocumentId, IndicatorType, MeasureValue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub key: AggregationKey,
    pub value: MeasureValue,
    #[serde(default)]
    pub denominator: Option<f64>,
    pub indicator_type: IndicatorType,
    #[serde(default)]
    pub unit: Option<String>,
    /// Some legacy activities were entered by hand and have no document.
    #[serde(default)]
    pub source_document: Option<DocumentId>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ActivityArchive {
    by_key: DashMap<AggregationKey, Vec<ActivityRecord>>,
}

impl ActivityArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import(&self, record: ActivityRecord) {
        self.by_key.entry(record.key.clone()).or_default().push(record);
    }

    pub fn for_key(&self, key: &AggregationKey) -> Vec<ActivityRecord> {
        let mut records = self
            .by_key
            .get(key)
            .map(|records| records.clone())
            .unwrap_or_default();
        records.sort_by_key(|r| r.recorded_at);
        records
    }

    /// Keys holding at least one record from the document.
    pub fn keys_for_document(&self, document: &DocumentId) -> Vec<AggregationKey> {
        self.by_key
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .iter()
                    .any(|r| r.source_document.as_ref() == Some(document))
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove_document_from_key(
        &self,
        document: &DocumentId,
        key: &AggregationKey,
    ) -> Vec<ActivityRecord> {
        let removed: Vec<ActivityRecord> = match self.by_key.get_mut(key) {
            Some(mut records) => {
                let (gone, kept) = std::mem::take(&mut *records)
                    .into_iter()
                    .partition(|r| r.source_document.as_ref() == Some(document));
                *records = kept;
                gone
            }
            None => Vec::new(),
        };

        self.by_key.remove_if(key, |_, records| records.is_empty());
        removed
    }

    pub fn keys(&self) -> Vec<AggregationKey> {
        self.by_key.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
