use serde::{Deserialize, Serialize};

use crate::catalog::{ModelDimensions, ModelFamily, ModelVariant};
use crate::error::{AggregationError, AggregationResult};
use crate::records::{FieldNames, FieldValue, RawObservation};
use crate::registry::{IdentifierRegistry, RunRegistries};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorMode {
    Flat,
    Empirical,
}

/// Numeric payload handed to the sampler. Field names match the template
/// `data` blocks; every index is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedDataset {
    pub n_items: usize,
    pub n_annotators: usize,
    pub n_total_responses: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_levels: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priors: Option<Vec<f64>>,
    pub annotator_for_response: Vec<usize>,
    pub item_for_response: Vec<usize>,
    pub responses: Vec<i64>,
}

impl EncodedDataset {
    pub fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            n_items: self.n_items,
            n_annotators: self.n_annotators,
            n_levels: self.n_levels,
        }
    }
}

pub struct DatasetEncoder<'a> {
    registries: &'a RunRegistries,
    fields: &'a FieldNames,
    variant: ModelVariant,
    prior: PriorMode,
}

impl<'a> DatasetEncoder<'a> {
    pub fn new(
        registries: &'a RunRegistries,
        fields: &'a FieldNames,
        variant: ModelVariant,
        prior: PriorMode,
    ) -> Self {
        Self {
            registries,
            fields,
            variant,
            prior,
        }
    }

    pub fn encode(&self, observations: &[RawObservation]) -> AggregationResult<EncodedDataset> {
        let levels = self.checked_levels()?;

        let mut item_for_response = Vec::with_capacity(observations.len());
        let mut annotator_for_response = Vec::with_capacity(observations.len());
        let mut responses = Vec::with_capacity(observations.len());

        for (record, observation) in observations.iter().enumerate() {
            let item = lookup(&self.registries.items, &observation.item, &self.fields.item, record)?;
            let annotator = lookup(
                &self.registries.annotators,
                &observation.annotator,
                &self.fields.annotator,
                record,
            )?;

            item_for_response.push(item + 1);
            annotator_for_response.push(annotator + 1);
            responses.push(self.encode_response(&observation.response, record)?);
        }

        let priors = levels.map(|_| self.priors(observations.len()));

        Ok(EncodedDataset {
            n_items: self.registries.items.len(),
            n_annotators: self.registries.annotators.len(),
            n_total_responses: observations.len(),
            n_levels: levels,
            priors,
            annotator_for_response,
            item_for_response,
            responses,
        })
    }

    fn checked_levels(&self) -> AggregationResult<Option<usize>> {
        let observed = self.registries.responses.len();
        match self.variant.family() {
            ModelFamily::Count => Ok(None),
            ModelFamily::Binary if observed == 2 => Ok(None),
            ModelFamily::Categorical if self.variant.levels() == Some(observed) => {
                Ok(Some(observed))
            }
            _ => Err(AggregationError::config(
                &self.fields.response,
                None,
                format!(
                    "{} distinct labels registered but model `{}` was selected",
                    observed,
                    self.variant.template_id()
                ),
            )),
        }
    }

    fn encode_response(&self, response: &FieldValue, record: usize) -> AggregationResult<i64> {
        let field = &self.fields.response;
        match self.variant.family() {
            ModelFamily::Count => {
                let count = response.as_count().ok_or_else(|| {
                    AggregationError::config(
                        field,
                        Some(record),
                        format!("count response `{response}` is not an integer"),
                    )
                })?;
                if count < 0 {
                    return Err(AggregationError::config(
                        field,
                        Some(record),
                        format!("count response {count} is negative"),
                    ));
                }
                Ok(count)
            }
            ModelFamily::Binary => {
                let index = lookup(&self.registries.responses, response, field, record)?;
                Ok(index as i64)
            }
            ModelFamily::Categorical => {
                let index = lookup(&self.registries.responses, response, field, record)?;
                Ok(index as i64 + 1)
            }
        }
    }

    fn priors(&self, n_total: usize) -> Vec<f64> {
        let responses = &self.registries.responses;
        match self.prior {
            PriorMode::Flat => vec![0.0; responses.len()],
            PriorMode::Empirical => (0..responses.len())
                .map(|index| (responses.count_at(index) as f64 / n_total as f64).ln())
                .collect(),
        }
    }
}

fn lookup(
    registry: &IdentifierRegistry,
    value: &FieldValue,
    field: &str,
    record: usize,
) -> AggregationResult<usize> {
    registry.index_of(value).ok_or_else(|| {
        AggregationError::config(field, Some(record), format!("`{value}` is not registered"))
    })
}
