use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::aggregate::{Aggregation, aggregate};
use crate::catalog::{ModelVariant, SelectionInputs, select_variant};
use crate::cli::RunArgs;
use crate::encoder::{DatasetEncoder, EncodedDataset, PriorMode};
use crate::engine::{CmdStanEngine, InferenceEngine, SamplingConfig};
use crate::model::{AnnotatorSummaryDocument, RunCounts, RunManifest, RunOptions};
use crate::posterior::PosteriorSample;
use crate::publish::{
    ANNOTATOR_FILE, DATASET_FILE, ESTIMATES_FILE, ItemEstimatesDocument, Publisher,
    REGISTRY_FILE, SAMPLES_FILE, annotator_summary_document, item_estimates_document,
};
use crate::records::{FieldNames, extract_observations, read_jsonlist};
use crate::registry::RunRegistries;
use crate::util::{now_utc_string, sha256_file, utc_compact_string};

const RUN_ARTIFACTS: [&str; 5] = [
    REGISTRY_FILE,
    DATASET_FILE,
    SAMPLES_FILE,
    ESTIMATES_FILE,
    ANNOTATOR_FILE,
];

pub fn run(args: RunArgs) -> Result<()> {
    let engine = CmdStanEngine::new(&args.sampler_dir, args.out_dir.join("engine"));
    execute(&args, &engine)?;
    Ok(())
}

pub fn execute(args: &RunArgs, engine: &dyn InferenceEngine) -> Result<RunManifest> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let fields = FieldNames {
        item: args.id_field.clone(),
        annotator: args.annotator_field.clone(),
        response: args.response_field.clone(),
    };
    let options = RunOptions {
        fields: fields.clone(),
        iterations: args.iterations,
        chains: args.chains,
        seed: args.seed,
        vigilance: !args.no_vigilance,
        prior: if args.prior {
            PriorMode::Empirical
        } else {
            PriorMode::Flat
        },
        counts: args.counts,
        dispersion: args.dispersion,
    };

    info!(input = %args.input.display(), run_id = %run_id, "starting run");

    let records = read_jsonlist(&args.input)?;
    if records.is_empty() {
        bail!("no records found in {}", args.input.display());
    }
    let input_sha256 = sha256_file(&args.input)?;

    let registries = RunRegistries::from_records(&records, &fields)
        .context("failed to build identifier registries")?;
    registries.log_tallies();

    let mut warnings = Vec::new();
    if options.counts && options.vigilance {
        let message = "count models have no vigilance form; vigilance flag ignored";
        warn!("{message}");
        warnings.push(message.to_string());
    }

    let variant = select_variant(&SelectionInputs {
        label_count: registries.responses.len(),
        counts: options.counts,
        vigilance: options.vigilance,
        dispersion: options.dispersion,
    })
    .context("failed to select a model")?;
    info!(model = variant.template_id(), levels = ?variant.levels(), "selected model");

    let observations = extract_observations(&records, &fields)?;
    let dataset = DatasetEncoder::new(&registries, &fields, variant, options.prior)
        .encode(&observations)
        .context("failed to encode dataset")?;
    if let Some(priors) = &dataset.priors {
        for (label, prior) in registries.responses.values().iter().zip(priors) {
            info!(label = %label, prior, "categorical prior");
        }
    }

    let publisher = Publisher::new(&args.out_dir)?;
    let mut manifest = RunManifest {
        manifest_version: 1,
        run_id,
        status: "encoded".to_string(),
        started_at,
        updated_at: now_utc_string(),
        input_path: args.input.display().to_string(),
        input_sha256,
        model: variant,
        template_id: variant.template_id().to_string(),
        options,
        counts: RunCounts {
            records: records.len(),
            items: registries.items.len(),
            annotators: registries.annotators.len(),
            response_labels: registries.responses.len(),
            draws: 0,
        },
        artifacts: Vec::new(),
        warnings,
    };

    if args.dry_run {
        let registry_path = publisher.write_registries(&registries)?;
        let dataset_path = publisher.write_dataset(&dataset)?;
        manifest.artifacts = vec![file_label(&registry_path), file_label(&dataset_path)];
        manifest.status = "dry-run".to_string();
        manifest.updated_at = now_utc_string();
        publisher.write_manifest(&manifest)?;
        info!(run_id = %manifest.run_id, "dry run complete");
        return Ok(manifest);
    }

    let config = SamplingConfig {
        iterations: manifest.options.iterations,
        chains: manifest.options.chains,
        seed: manifest.options.seed,
    };
    config.validate()?;

    let sample = engine
        .sample(variant, &dataset, &config)
        .with_context(|| format!("sampling {} failed", variant.template_id()))?;
    sample.validate(variant, &dataset.dimensions())?;
    let aggregation = aggregate(variant, &sample)?;
    info!(draws = aggregation.n_draws, items = aggregation.items.len(), "aggregated posterior");

    let exported = args.export_dataset.then_some(&dataset);
    let artifacts =
        publish_results(&publisher, variant, &registries, exported, &sample, &aggregation)?;

    manifest.artifacts = artifacts.iter().map(|path| file_label(path)).collect();
    manifest.counts.draws = aggregation.n_draws;
    manifest.status = "completed".to_string();
    manifest.updated_at = now_utc_string();
    publisher.write_manifest(&manifest)?;

    info!(run_id = %manifest.run_id, model = %manifest.template_id, "run completed");
    Ok(manifest)
}

/// Builds every document before the first write; a failed write removes partial output.
fn publish_results(
    publisher: &Publisher,
    variant: ModelVariant,
    registries: &RunRegistries,
    dataset: Option<&EncodedDataset>,
    sample: &PosteriorSample,
    aggregation: &Aggregation,
) -> Result<Vec<PathBuf>> {
    let estimates = item_estimates_document(registries, aggregation)?;
    let annotator_summary = annotator_summary_document(variant, registries, aggregation)?;

    let written = write_artifacts(
        publisher,
        registries,
        dataset,
        sample,
        &estimates,
        &annotator_summary,
    );
    if written.is_err() {
        warn!("publishing failed; discarding partial output");
        publisher.discard(&RUN_ARTIFACTS);
    }
    written
}

fn write_artifacts(
    publisher: &Publisher,
    registries: &RunRegistries,
    dataset: Option<&EncodedDataset>,
    sample: &PosteriorSample,
    estimates: &ItemEstimatesDocument,
    annotator_summary: &AnnotatorSummaryDocument,
) -> Result<Vec<PathBuf>> {
    let mut written = vec![publisher.write_registries(registries)?];
    if let Some(dataset) = dataset {
        written.push(publisher.write_dataset(dataset)?);
    }
    written.push(publisher.archive_sample(sample)?);
    written.push(publisher.write_estimates(estimates)?);
    written.push(publisher.write_annotator_summary(annotator_summary)?);
    Ok(written)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| path.display().to_string())
}
