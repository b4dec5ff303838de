use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::aggregate::{Aggregation, ItemEstimate};
use crate::catalog::ModelVariant;
use crate::encoder::EncodedDataset;
use crate::model::{AnnotatorReport, AnnotatorSummaryDocument, RegistryExport, RunManifest};
use crate::posterior::{ParameterDraws, PosteriorSample};
use crate::registry::RunRegistries;
use crate::util::{ensure_directory, read_json, write_json_pretty};

pub const REGISTRY_FILE: &str = "data.json";
pub const DATASET_FILE: &str = "encoded_data.json";
pub const SAMPLES_FILE: &str = "samples.sqlite";
pub const ESTIMATES_FILE: &str = "item_probs.json";
pub const ANNOTATOR_FILE: &str = "annotator_summary.json";
pub const MANIFEST_FILE: &str = "run_manifest.json";

#[derive(Debug, Clone)]
pub struct Publisher {
    out_dir: PathBuf,
}

impl Publisher {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self> {
        let out_dir = out_dir.into();
        ensure_directory(&out_dir)?;
        Ok(Self { out_dir })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.out_dir.join(file)
    }

    pub fn write_registries(&self, registries: &RunRegistries) -> Result<PathBuf> {
        let path = self.path(REGISTRY_FILE);
        write_json_pretty(&path, &RegistryExport::from_registries(registries))?;
        info!(path = %path.display(), "wrote identifier registries");
        Ok(path)
    }

    pub fn read_registries(&self) -> Result<RunRegistries> {
        let export: RegistryExport = read_json(&self.path(REGISTRY_FILE))?;
        Ok(export.into_registries())
    }

    pub fn write_dataset(&self, dataset: &EncodedDataset) -> Result<PathBuf> {
        let path = self.path(DATASET_FILE);
        write_json_pretty(&path, dataset)?;
        info!(path = %path.display(), responses = dataset.n_total_responses, "wrote encoded dataset");
        Ok(path)
    }

    pub fn write_estimates(&self, document: &ItemEstimatesDocument) -> Result<PathBuf> {
        let path = self.path(ESTIMATES_FILE);
        write_json_pretty(&path, document)?;
        info!(path = %path.display(), items = document.len(), "wrote item estimates");
        Ok(path)
    }

    pub fn write_annotator_summary(&self, document: &AnnotatorSummaryDocument) -> Result<PathBuf> {
        let path = self.path(ANNOTATOR_FILE);
        write_json_pretty(&path, document)?;
        info!(path = %path.display(), annotators = document.annotators.len(), "wrote annotator summary");
        Ok(path)
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf> {
        let path = self.path(MANIFEST_FILE);
        write_json_pretty(&path, manifest)?;
        info!(path = %path.display(), run_id = %manifest.run_id, "wrote run manifest");
        Ok(path)
    }

    pub fn read_manifest(&self) -> Result<RunManifest> {
        read_json(&self.path(MANIFEST_FILE))
    }

    pub fn archive_sample(&self, sample: &PosteriorSample) -> Result<PathBuf> {
        let path = self.path(SAMPLES_FILE);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to replace {}", path.display()))?;
        }

        let mut connection = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        ensure_archive_schema(&connection)?;
        let rows = insert_draws(&mut connection, sample)?;

        info!(path = %path.display(), rows, draws = sample.n_draws(), "archived posterior sample");
        Ok(path)
    }

    pub fn load_sample(&self) -> Result<PosteriorSample> {
        load_archive(&self.path(SAMPLES_FILE))
    }

    /// Removes whichever of `files` exist; failures are logged and skipped.
    pub fn discard(&self, files: &[&str]) {
        for file in files {
            let path = self.path(file);
            if !path.exists() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "discarded artifact"),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to discard artifact"),
            }
        }
    }
}

pub type ItemEstimatesDocument = BTreeMap<String, ItemEstimate>;

pub fn item_estimates_document(
    registries: &RunRegistries,
    aggregation: &Aggregation,
) -> Result<ItemEstimatesDocument> {
    if aggregation.items.len() != registries.items.len() {
        bail!(
            "{} item estimates for {} registered items",
            aggregation.items.len(),
            registries.items.len()
        );
    }

    let document = registries
        .items
        .values()
        .iter()
        .zip(aggregation.items.iter())
        .map(|(item, estimate)| (item.to_string(), estimate.clone()))
        .collect::<ItemEstimatesDocument>();
    if document.len() != registries.items.len() {
        bail!(
            "{} registered items share {} distinct keys",
            registries.items.len(),
            document.len()
        );
    }
    Ok(document)
}

pub fn annotator_summary_document(
    variant: ModelVariant,
    registries: &RunRegistries,
    aggregation: &Aggregation,
) -> Result<AnnotatorSummaryDocument> {
    if aggregation.annotators.len() != registries.annotators.len() {
        bail!(
            "{} annotator summaries for {} registered annotators",
            aggregation.annotators.len(),
            registries.annotators.len()
        );
    }

    let annotators = registries
        .annotators
        .values()
        .iter()
        .zip(aggregation.annotators.iter())
        .enumerate()
        .map(|(index, (annotator, summary))| AnnotatorReport {
            annotator: annotator.clone(),
            index,
            responses: registries.annotators.count_at(index),
            offset: summary.offset.clone(),
            vigilance: summary.vigilance,
        })
        .collect();

    Ok(AnnotatorSummaryDocument {
        template_id: variant.template_id().to_string(),
        n_draws: aggregation.n_draws,
        hyperparameters: aggregation.hyperparameters.clone(),
        annotators,
    })
}

fn ensure_archive_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS parameters (
              name TEXT PRIMARY KEY,
              shape TEXT NOT NULL,
              n_draws INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS draws (
              parameter TEXT NOT NULL,
              draw INTEGER NOT NULL,
              position INTEGER NOT NULL,
              value REAL NOT NULL,
              PRIMARY KEY(parameter, draw, position)
            );
            ",
        )
        .context("failed to create draws archive schema")
}

fn insert_draws(connection: &mut Connection, sample: &PosteriorSample) -> Result<usize> {
    let tx = connection.transaction()?;
    let mut rows = 0usize;

    {
        let mut parameter_statement =
            tx.prepare("INSERT INTO parameters(name, shape, n_draws) VALUES(?1, ?2, ?3)")?;
        let mut draw_statement = tx.prepare(
            "INSERT INTO draws(parameter, draw, position, value) VALUES(?1, ?2, ?3, ?4)",
        )?;

        for (name, draws) in sample.parameters() {
            let shape = serde_json::to_string(draws.shape())
                .with_context(|| format!("failed to serialize shape of {name}"))?;
            parameter_statement.execute(params![name, shape, draws.n_draws() as i64])?;

            for (draw_index, draw) in draws.draws().enumerate() {
                for (position, value) in draw.iter().enumerate() {
                    draw_statement.execute(params![
                        name,
                        draw_index as i64,
                        position as i64,
                        value
                    ])?;
                    rows += 1;
                }
            }
        }
    }

    tx.commit()?;
    Ok(rows)
}

pub fn load_archive(path: &Path) -> Result<PosteriorSample> {
    if !path.exists() {
        bail!("draws archive missing: {}", path.display());
    }

    let connection =
        Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut parameter_statement =
        connection.prepare("SELECT name, shape FROM parameters ORDER BY name")?;
    let parameters = parameter_statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut value_statement = connection
        .prepare("SELECT value FROM draws WHERE parameter = ?1 ORDER BY draw, position")?;

    let mut sample = PosteriorSample::new();
    for (name, shape) in parameters {
        let shape: Vec<usize> = serde_json::from_str(&shape)
            .with_context(|| format!("invalid shape for {name} in {}", path.display()))?;
        let values = value_statement
            .query_map(params![name], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let draws = ParameterDraws::new(&name, shape, values)?;
        sample.insert(&name, draws);
    }

    Ok(sample)
}
