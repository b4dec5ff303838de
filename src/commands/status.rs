use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::RegistryExport;
use crate::publish::{
    ANNOTATOR_FILE, DATASET_FILE, ESTIMATES_FILE, MANIFEST_FILE, REGISTRY_FILE, SAMPLES_FILE,
    Publisher,
};
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    if !args.out_dir.is_dir() {
        bail!("output directory not found: {}", args.out_dir.display());
    }

    let publisher = Publisher::new(&args.out_dir)?;
    let manifest_path = publisher.path(MANIFEST_FILE);
    let registry_path = publisher.path(REGISTRY_FILE);
    let samples_path = publisher.path(SAMPLES_FILE);

    info!(out_dir = %args.out_dir.display(), "status requested");

    if manifest_path.exists() {
        let manifest = publisher.read_manifest()?;

        info!(
            run_id = %manifest.run_id,
            status = %manifest.status,
            model = %manifest.template_id,
            levels = ?manifest.model.levels(),
            started_at = %manifest.started_at,
            updated_at = %manifest.updated_at,
            input = %manifest.input_path,
            input_sha256 = %manifest.input_sha256,
            records = manifest.counts.records,
            items = manifest.counts.items,
            annotators = manifest.counts.annotators,
            response_labels = manifest.counts.response_labels,
            draws = manifest.counts.draws,
            iterations = manifest.options.iterations,
            chains = manifest.options.chains,
            vigilance = manifest.options.vigilance,
            counts_mode = manifest.options.counts,
            dispersion = manifest.options.dispersion,
            prior = ?manifest.options.prior,
            "loaded run manifest"
        );
        for warning in &manifest.warnings {
            warn!(warning = %warning, "run warning");
        }
    } else {
        warn!(path = %manifest_path.display(), "run manifest missing");
    }

    if registry_path.exists() {
        let export: RegistryExport = read_json(&registry_path)?;
        info!(
            items = export.item_list.len(),
            annotators = export.annotator_list.len(),
            responses = export.response_list.len(),
            "loaded identifier registries"
        );
    } else {
        warn!(path = %registry_path.display(), "identifier registries missing");
    }

    if samples_path.exists() {
        let conn = Connection::open(&samples_path)
            .with_context(|| format!("failed to open {}", samples_path.display()))?;
        let parameters = query_count(&conn, "SELECT COUNT(*) FROM parameters").unwrap_or(0);
        let values = query_count(&conn, "SELECT COUNT(*) FROM draws").unwrap_or(0);

        info!(
            path = %samples_path.display(),
            parameters,
            values,
            "draws archive status"
        );
    } else {
        warn!(path = %samples_path.display(), "draws archive missing");
    }

    for file in [DATASET_FILE, ESTIMATES_FILE, ANNOTATOR_FILE] {
        let path = publisher.path(file);
        if path.exists() {
            info!(path = %path.display(), "artifact present");
        } else {
            info!(path = %path.display(), "artifact absent");
        }
    }

    Ok(())
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
