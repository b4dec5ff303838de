use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::Summary;
use crate::catalog::ModelVariant;
use crate::encoder::PriorMode;
use crate::records::{FieldNames, FieldValue};
use crate::registry::{IdentifierRegistry, RegistryBuilder, RunRegistries};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryExport {
    pub item_list: Vec<FieldValue>,
    pub annotator_list: Vec<FieldValue>,
    pub response_list: Vec<FieldValue>,
    pub item_index: BTreeMap<String, usize>,
    pub annotator_index: BTreeMap<String, usize>,
    pub response_index: BTreeMap<String, usize>,
    #[serde(default)]
    pub item_counts: Vec<usize>,
    #[serde(default)]
    pub annotator_counts: Vec<usize>,
    #[serde(default)]
    pub response_counts: Vec<usize>,
}

impl RegistryExport {
    pub fn from_registries(registries: &RunRegistries) -> Self {
        Self {
            item_list: registries.items.values().to_vec(),
            annotator_list: registries.annotators.values().to_vec(),
            response_list: registries.responses.values().to_vec(),
            item_index: registries.items.mapping(),
            annotator_index: registries.annotators.mapping(),
            response_index: registries.responses.mapping(),
            item_counts: registries.items.counts().to_vec(),
            annotator_counts: registries.annotators.counts().to_vec(),
            response_counts: registries.responses.counts().to_vec(),
        }
    }

    pub fn into_registries(self) -> RunRegistries {
        RunRegistries {
            items: rebuild(self.item_list, &self.item_counts),
            annotators: rebuild(self.annotator_list, &self.annotator_counts),
            responses: rebuild(self.response_list, &self.response_counts),
        }
    }
}

fn rebuild(values: Vec<FieldValue>, counts: &[usize]) -> IdentifierRegistry {
    let mut builder = RegistryBuilder::new();
    for (position, value) in values.into_iter().enumerate() {
        builder.observe_count(value, counts.get(position).copied().unwrap_or(1));
    }
    builder.finish()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub fields: FieldNames,
    pub iterations: usize,
    pub chains: usize,
    pub seed: Option<u64>,
    pub vigilance: bool,
    pub prior: PriorMode,
    pub counts: bool,
    pub dispersion: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub records: usize,
    pub items: usize,
    pub annotators: usize,
    pub response_labels: usize,
    pub draws: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub input_path: String,
    pub input_sha256: String,
    pub model: ModelVariant,
    pub template_id: String,
    pub options: RunOptions,
    pub counts: RunCounts,
    pub artifacts: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorReport {
    pub annotator: FieldValue,
    pub index: usize,
    pub responses: usize,
    pub offset: Vec<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vigilance: Option<Summary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorSummaryDocument {
    pub template_id: String,
    pub n_draws: usize,
    pub hyperparameters: BTreeMap<String, Summary>,
    pub annotators: Vec<AnnotatorReport>,
}
