use anyhow::{Context, Result, bail};
use tracing::info;

use crate::aggregate::{Aggregation, aggregate};
use crate::catalog::ModelDimensions;
use crate::cli::AggregateArgs;
use crate::publish::{Publisher, annotator_summary_document, item_estimates_document};
use crate::util::now_utc_string;

pub fn run(args: AggregateArgs) -> Result<()> {
    let publisher = Publisher::new(&args.out_dir)?;
    let aggregation = reaggregate(&publisher)?;
    info!(
        out_dir = %args.out_dir.display(),
        draws = aggregation.n_draws,
        items = aggregation.items.len(),
        "re-aggregation completed"
    );
    Ok(())
}

pub fn reaggregate(publisher: &Publisher) -> Result<Aggregation> {
    let mut manifest = publisher.read_manifest()?;
    if manifest.status == "dry-run" {
        bail!("run {} stopped before sampling; nothing to aggregate", manifest.run_id);
    }

    let registries = publisher.read_registries()?;
    let sample = publisher.load_sample()?;
    let variant = manifest.model;

    let dims = ModelDimensions {
        n_items: registries.items.len(),
        n_annotators: registries.annotators.len(),
        n_levels: variant.levels(),
    };
    sample
        .validate(variant, &dims)
        .context("archived draws do not match the recorded model")?;

    let aggregation = aggregate(variant, &sample)?;
    let estimates = item_estimates_document(&registries, &aggregation)?;
    let annotator_summary = annotator_summary_document(variant, &registries, &aggregation)?;
    publisher.write_estimates(&estimates)?;
    publisher.write_annotator_summary(&annotator_summary)?;

    manifest.counts.draws = aggregation.n_draws;
    manifest.updated_at = now_utc_string();
    publisher.write_manifest(&manifest)?;

    Ok(aggregation)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{Value, json};

    use super::*;
    use crate::catalog::ModelVariant;
    use crate::encoder::PriorMode;
    use crate::model::{RunCounts, RunManifest, RunOptions};
    use crate::posterior::{ParameterDraws, PosteriorSample};
    use crate::publish::ESTIMATES_FILE;
    use crate::records::{FieldNames, Record};
    use crate::registry::RunRegistries;
    use crate::util::read_json;

    fn manifest(status: &str) -> RunManifest {
        RunManifest {
            manifest_version: 1,
            run_id: "run-test".to_string(),
            status: status.to_string(),
            started_at: now_utc_string(),
            updated_at: now_utc_string(),
            input_path: "labels.jsonlist".to_string(),
            input_sha256: String::new(),
            model: ModelVariant::Binary,
            template_id: "binary".to_string(),
            options: RunOptions {
                fields: FieldNames {
                    item: "id".to_string(),
                    annotator: "annotator".to_string(),
                    response: "label".to_string(),
                },
                iterations: 4,
                chains: 1,
                seed: None,
                vigilance: false,
                prior: PriorMode::Flat,
                counts: false,
                dispersion: false,
            },
            counts: RunCounts::default(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn registries() -> RunRegistries {
        let records = [("X", "u1", "yes"), ("Y", "u1", "no")]
            .iter()
            .map(|(item, annotator, label)| {
                json!({"id": item, "annotator": annotator, "label": label})
                    .as_object()
                    .cloned()
                    .expect("object")
            })
            .collect::<Vec<Record>>();
        RunRegistries::from_records(
            &records,
            &FieldNames {
                item: "id".to_string(),
                annotator: "annotator".to_string(),
                response: "label".to_string(),
            },
        )
        .expect("registries")
    }

    fn sample(n_items: usize) -> PosteriorSample {
        let mut sample = PosteriorSample::new();
        let parameters = [
            ("item_means", vec![n_items], vec![0.0; n_items * 2]),
            ("item_std", Vec::new(), vec![1.0, 1.0]),
            ("annotator_offsets", vec![1], vec![0.3, -0.3]),
            ("offset_std", Vec::new(), vec![0.5, 0.5]),
        ];
        for (name, shape, values) in parameters {
            sample.insert(name, ParameterDraws::new(name, shape, values).expect("draws"));
        }
        sample
    }

    #[test]
    fn reaggregate_rewrites_estimates_from_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let publisher = Publisher::new(dir.path()).expect("publisher");
        publisher.write_manifest(&manifest("completed")).expect("manifest");
        publisher.write_registries(&registries()).expect("registries");
        publisher.archive_sample(&sample(2)).expect("archive");

        let aggregation = reaggregate(&publisher).expect("re-aggregates");
        assert_eq!(aggregation.n_draws, 2);

        let estimates: Value = read_json(&publisher.path(ESTIMATES_FILE)).expect("estimates");
        assert_eq!(estimates["X"], json!(0.5));
        assert_eq!(estimates["Y"], json!(0.5));
        assert_eq!(publisher.read_manifest().expect("manifest").counts.draws, 2);
    }

    #[test]
    fn reaggregate_rejects_mismatched_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let publisher = Publisher::new(dir.path()).expect("publisher");
        publisher.write_manifest(&manifest("completed")).expect("manifest");
        publisher.write_registries(&registries()).expect("registries");
        publisher.archive_sample(&sample(3)).expect("archive");

        assert!(reaggregate(&publisher).is_err());
        assert!(!publisher.path(ESTIMATES_FILE).exists());
    }

    #[test]
    fn reaggregate_refuses_dry_runs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let publisher = Publisher::new(dir.path()).expect("publisher");
        publisher.write_manifest(&manifest("dry-run")).expect("manifest");

        let err = reaggregate(&publisher).expect_err("nothing sampled");
        assert!(err.to_string().contains("stopped before sampling"));
        assert!(fs::read_dir(dir.path()).expect("list").count() == 1);
    }
}
