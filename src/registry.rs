use std::collections::BTreeMap;

use tracing::info;

use crate::error::{AggregationError, AggregationResult};
use crate::records::{FieldNames, FieldValue, Record, field_value};

const VERBOSE_TALLY_LIMIT: usize = 12;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tallies: BTreeMap<FieldValue, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, value: FieldValue) {
        self.observe_count(value, 1);
    }

    pub fn observe_count(&mut self, value: FieldValue, count: usize) {
        *self.tallies.entry(value).or_insert(0) += count;
    }

    pub fn finish(self) -> IdentifierRegistry {
        let mut values = Vec::with_capacity(self.tallies.len());
        let mut counts = Vec::with_capacity(self.tallies.len());
        let mut index = BTreeMap::new();

        // BTreeMap iteration is already in sorted order.
        for (position, (value, count)) in self.tallies.into_iter().enumerate() {
            index.insert(value.clone(), position);
            values.push(value);
            counts.push(count);
        }

        IdentifierRegistry {
            values,
            counts,
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRegistry {
    values: Vec<FieldValue>,
    counts: Vec<usize>,
    index: BTreeMap<FieldValue, usize>,
}

impl IdentifierRegistry {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = FieldValue>,
    {
        let mut builder = RegistryBuilder::new();
        for value in values {
            builder.observe(value);
        }
        builder.finish()
    }

    pub fn from_records(records: &[Record], field: &str) -> AggregationResult<Self> {
        let values = records
            .iter()
            .enumerate()
            .map(|(record_index, record)| field_value(record, field, record_index))
            .collect::<AggregationResult<Vec<_>>>()?;
        let registry = Self::from_values(values);
        registry.ensure_distinct_keys(field)?;
        Ok(registry)
    }

    // Published documents key values by display form, so `3` and `"3"` cannot coexist.
    fn ensure_distinct_keys(&self, field: &str) -> AggregationResult<()> {
        let mut keys = BTreeMap::new();
        for value in &self.values {
            if keys.insert(value.to_string(), value).is_some() {
                return Err(AggregationError::config(
                    field,
                    None,
                    format!("value `{value}` appears both as an integer and as text"),
                ));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn index_of(&self, value: &FieldValue) -> Option<usize> {
        self.index.get(value).copied()
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn count_at(&self, index: usize) -> usize {
        self.counts.get(index).copied().unwrap_or(0)
    }

    pub fn mapping(&self) -> BTreeMap<String, usize> {
        self.values
            .iter()
            .enumerate()
            .map(|(position, value)| (value.to_string(), position))
            .collect()
    }

    pub fn most_common(&self) -> Vec<(&FieldValue, usize)> {
        let mut pairs = self
            .values
            .iter()
            .zip(self.counts.iter().copied())
            .collect::<Vec<_>>();
        pairs.sort_by(|left, right| right.1.cmp(&left.1));
        pairs
    }

    pub fn log_tallies(&self, kind: &str) {
        if self.len() > VERBOSE_TALLY_LIMIT {
            info!(kind, distinct = self.len(), "registry built");
            return;
        }

        for (value, count) in self.most_common() {
            info!(kind, value = %value, count, "registry tally");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRegistries {
    pub items: IdentifierRegistry,
    pub annotators: IdentifierRegistry,
    pub responses: IdentifierRegistry,
}

impl RunRegistries {
    pub fn from_records(records: &[Record], fields: &FieldNames) -> AggregationResult<Self> {
        Ok(Self {
            items: IdentifierRegistry::from_records(records, &fields.item)?,
            annotators: IdentifierRegistry::from_records(records, &fields.annotator)?,
            responses: IdentifierRegistry::from_records(records, &fields.response)?,
        })
    }

    pub fn log_tallies(&self) {
        self.items.log_tallies("item");
        self.annotators.log_tallies("annotator");
        self.responses.log_tallies("response");
    }
}
