use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::{ModelVariant, program_for};
use crate::cli::TemplatesArgs;
use crate::util::ensure_directory;

pub fn run(args: TemplatesArgs) -> Result<()> {
    let written = write_templates(&args.out_dir)?;
    info!(
        out_dir = %args.out_dir.display(),
        templates = written.len(),
        "wrote model templates"
    );
    Ok(())
}

pub fn write_templates(out_dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_directory(out_dir)?;

    let mut written = Vec::with_capacity(ModelVariant::ALL_TEMPLATE_IDS.len());
    for template_id in ModelVariant::ALL_TEMPLATE_IDS {
        let Some(program) = program_for(template_id) else {
            continue;
        };
        let path = out_dir.join(format!("{template_id}.stan"));
        fs::write(&path, program)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote template");
        written.push(path);
    }

    Ok(written)
}
