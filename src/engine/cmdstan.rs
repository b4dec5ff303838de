use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::info;

use super::{InferenceEngine, SamplingConfig};
use crate::catalog::ModelVariant;
use crate::encoder::EncodedDataset;
use crate::error::{AggregationError, AggregationResult};
use crate::posterior::{ParameterDraws, PosteriorSample};

const ENGINE_CONTEXT: &str = "cmdstan";

/// Runs compiled CmdStan model executables, one process per chain.
#[derive(Debug, Clone)]
pub struct CmdStanEngine {
    sampler_dir: PathBuf,
    work_dir: PathBuf,
}

impl CmdStanEngine {
    pub fn new(sampler_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            sampler_dir: sampler_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn executable(&self, variant: ModelVariant) -> PathBuf {
        self.sampler_dir.join(variant.template_id())
    }

    fn write_data(&self, dataset: &EncodedDataset) -> AggregationResult<PathBuf> {
        fs::create_dir_all(&self.work_dir).map_err(|err| {
            engine_error(format!("failed to create {}: {err}", self.work_dir.display()))
        })?;

        let data_path = self.work_dir.join("engine_data.json");
        let payload = serde_json::to_vec(dataset)
            .map_err(|err| engine_error(format!("failed to serialize dataset: {err}")))?;
        fs::write(&data_path, payload).map_err(|err| {
            engine_error(format!("failed to write {}: {err}", data_path.display()))
        })?;

        Ok(data_path)
    }

    fn run_chain(
        &self,
        executable: &Path,
        data_path: &Path,
        chain: usize,
        config: &SamplingConfig,
    ) -> AggregationResult<PosteriorSample> {
        let output_path = self.work_dir.join(format!("chain_{chain}.csv"));

        let mut command = Command::new(executable);
        command
            .arg("sample")
            .arg(format!("num_samples={}", config.kept_draws()))
            .arg(format!("num_warmup={}", config.warmup()))
            .arg(format!("id={chain}"))
            .arg("data")
            .arg(format!("file={}", data_path.display()));
        if let Some(seed) = config.seed {
            command.arg("random").arg(format!("seed={seed}"));
        }
        command
            .arg("output")
            .arg(format!("file={}", output_path.display()));

        let output = command.output().map_err(|err| {
            engine_error(format!("failed to execute {}: {err}", executable.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(engine_error(format!(
                "{} returned {} for chain {chain}: {}",
                executable.display(),
                output.status,
                stderr.trim()
            )));
        }

        let raw = fs::read_to_string(&output_path).map_err(|err| {
            engine_error(format!("failed to read {}: {err}", output_path.display()))
        })?;
        parse_stan_csv(&raw, &output_path.display().to_string())
    }
}

impl InferenceEngine for CmdStanEngine {
    fn sample(
        &self,
        variant: ModelVariant,
        dataset: &EncodedDataset,
        config: &SamplingConfig,
    ) -> AggregationResult<PosteriorSample> {
        config.validate()?;

        let executable = self.executable(variant);
        if !executable.is_file() {
            return Err(engine_error(format!(
                "no compiled model at {}; compile {}.stan with CmdStan first",
                executable.display(),
                variant.template_id()
            )));
        }

        let data_path = self.write_data(dataset)?;

        let mut chains = Vec::with_capacity(config.chains);
        for chain in 1..=config.chains {
            info!(
                model = variant.template_id(),
                chain,
                chains = config.chains,
                iterations = config.iterations,
                "sampling chain"
            );
            let sample = self.run_chain(&executable, &data_path, chain, config)?;
            info!(chain, draws = sample.n_draws(), "chain complete");
            chains.push(sample);
        }

        PosteriorSample::concat_chains(chains)
    }
}

fn engine_error(reason: String) -> AggregationError {
    AggregationError::inference(ENGINE_CONTEXT, reason)
}

struct Column {
    position: usize,
    indices: Vec<usize>,
}

/// Parses a Stan CSV file: `#` comment lines, one header row naming each
/// column `name` or `name.i.j` (1-based), then one row per draw. Sampler
/// diagnostics (`lp__`, `accept_stat__`, ...) are skipped.
pub fn parse_stan_csv(raw: &str, source: &str) -> AggregationResult<PosteriorSample> {
    let column_pattern = Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)((?:\.[0-9]+)*)$")
        .map_err(|err| engine_error(format!("failed to compile column pattern: {err}")))?;

    let mut lines = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let header = lines
        .next()
        .ok_or_else(|| engine_error(format!("{source} has no header row")))?;
    let header_columns = header.split(',').map(str::trim).collect::<Vec<_>>();

    let mut parameters = BTreeMap::<String, Vec<Column>>::new();
    for (position, column) in header_columns.iter().enumerate() {
        if column.ends_with("__") {
            continue;
        }
        let captures = column_pattern.captures(column).ok_or_else(|| {
            engine_error(format!("{source}: unrecognized column name `{column}`"))
        })?;
        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let indices = captures
            .get(2)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<usize>()
                    .ok()
                    .filter(|index| *index >= 1)
                    .ok_or_else(|| {
                        AggregationError::inference(name, format!("{source}: bad index in `{column}`"))
                    })
            })
            .collect::<AggregationResult<Vec<_>>>()?;

        parameters
            .entry(name.to_string())
            .or_default()
            .push(Column { position, indices });
    }

    let layouts = parameters
        .iter()
        .map(|(name, columns)| -> AggregationResult<_> {
            Ok((name.as_str(), column_layout(name, columns)?))
        })
        .collect::<AggregationResult<Vec<_>>>()?;

    let mut values = layouts
        .iter()
        .map(|(_, (_, slots))| Vec::with_capacity(slots.len()))
        .collect::<Vec<Vec<f64>>>();

    for (row_index, line) in lines.enumerate() {
        let row = line
            .split(',')
            .map(|cell| cell.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| engine_error(format!("{source}: draw {row_index}: {err}")))?;
        if row.len() != header_columns.len() {
            return Err(engine_error(format!(
                "{source}: draw {row_index} has {} cells, header has {}",
                row.len(),
                header_columns.len()
            )));
        }

        for ((_, (_, slots)), target) in layouts.iter().zip(values.iter_mut()) {
            target.extend(slots.iter().map(|position| row[*position]));
        }
    }

    let mut sample = PosteriorSample::new();
    for ((name, (shape, _)), draws) in layouts.into_iter().zip(values) {
        sample.insert(name, ParameterDraws::new(name, shape, draws)?);
    }
    Ok(sample)
}

fn column_layout(name: &str, columns: &[Column]) -> AggregationResult<(Vec<usize>, Vec<usize>)> {
    let rank = columns.first().map(|column| column.indices.len()).unwrap_or(0);
    if columns.iter().any(|column| column.indices.len() != rank) {
        return Err(AggregationError::inference(name, "columns disagree on dimensionality"));
    }

    let shape = (0..rank)
        .map(|axis| {
            columns
                .iter()
                .map(|column| column.indices[axis])
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();
    let width = shape.iter().product::<usize>();

    let mut slots = vec![None; width];
    for column in columns {
        let flat = column
            .indices
            .iter()
            .zip(shape.iter())
            .fold(0, |acc, (index, extent)| acc * extent + (index - 1));
        if slots[flat].replace(column.position).is_some() {
            return Err(AggregationError::inference(name, "duplicate column"));
        }
    }

    let slots = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| AggregationError::inference(name, format!("missing columns for shape {shape:?}")))?;

    Ok((shape, slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORICAL_CSV: &str = "\
# stan_version_major = 2
lp__,accept_stat__,item_means.1.1,item_means.2.1,item_means.1.2,item_means.2.2,item_std
# Adaptation terminated
# Step size = 0.8
-3.2,0.91,0.1,0.2,0.3,0.4,1.5
-3.1,0.88,1.1,1.2,1.3,1.4,1.6
# Elapsed Time: 0.1 seconds
";

    #[test]
    fn parse_stan_csv_reorders_column_major_columns() {
        let sample = parse_stan_csv(CATEGORICAL_CSV, "test.csv").expect("valid csv");
        assert_eq!(sample.names(), vec!["item_means", "item_std"]);

        let item_means = sample.parameter("item_means").expect("present");
        assert_eq!(item_means.shape(), &[2, 2]);
        assert_eq!(item_means.draw(0), &[0.1, 0.3, 0.2, 0.4]);
        assert_eq!(item_means.draw(1), &[1.1, 1.3, 1.2, 1.4]);

        let item_std = sample.parameter("item_std").expect("present");
        assert!(item_std.shape().is_empty());
        assert_eq!(item_std.values(), &[1.5, 1.6]);
        assert_eq!(sample.n_draws(), 2);
    }

    #[test]
    fn parse_stan_csv_rejects_short_rows() {
        let raw = "lp__,theta\n-1.0,0.5\n-1.0\n";
        let err = parse_stan_csv(raw, "short.csv").expect_err("second row is short");
        assert!(err.to_string().contains("draw 1"));
    }

    #[test]
    fn parse_stan_csv_rejects_gaps_in_indices() {
        let raw = "offsets.1,offsets.3\n0.1,0.2\n";
        let err = parse_stan_csv(raw, "gap.csv").expect_err("offsets.2 missing");
        match err {
            AggregationError::InferenceFailure { context, .. } => assert_eq!(context, "offsets"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_stan_csv_without_header_fails() {
        assert!(parse_stan_csv("# only comments\n", "empty.csv").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn sample_runs_every_chain_through_the_executable() {
        use std::os::unix::fs::PermissionsExt;

        let sampler_dir = tempfile::tempdir().expect("sampler dir");
        let work_dir = tempfile::tempdir().expect("work dir");
        let engine = CmdStanEngine::new(sampler_dir.path(), work_dir.path());
        let dataset = EncodedDataset {
            n_items: 2,
            n_annotators: 1,
            n_total_responses: 2,
            n_levels: None,
            priors: None,
            annotator_for_response: vec![1, 1],
            item_for_response: vec![1, 2],
            responses: vec![1, 0],
        };
        let config = SamplingConfig {
            iterations: 4,
            chains: 2,
            seed: Some(11),
        };

        let err = engine
            .sample(ModelVariant::Binary, &dataset, &config)
            .expect_err("executable not compiled yet");
        assert!(err.to_string().contains("no compiled model"));

        let script = "#!/bin/sh\n\
out=\"\"\n\
for arg in \"$@\"; do\n\
  case \"$arg\" in\n\
    file=*) out=\"${arg#file=}\" ;;\n\
  esac\n\
done\n\
printf '%s\\n' '# fake sampler' \
'lp__,item_means.1,item_means.2,item_std,annotator_offsets.1,offset_std' \
'-1.0,0.0,1.0,1.0,0.2,0.5' \
'-1.1,2.0,-1.0,1.2,-0.2,0.6' > \"$out\"\n";
        let executable = engine.executable(ModelVariant::Binary);
        fs::write(&executable, script).expect("write script");
        fs::set_permissions(&executable, fs::Permissions::from_mode(0o755)).expect("chmod");

        let sample = engine
            .sample(ModelVariant::Binary, &dataset, &config)
            .expect("fake sampler succeeds");
        assert_eq!(sample.n_draws(), 4);
        sample
            .validate(ModelVariant::Binary, &dataset.dimensions())
            .expect("declared shapes");
        assert!(work_dir.path().join("engine_data.json").is_file());
        assert!(work_dir.path().join("chain_2.csv").is_file());

        fs::write(&executable, "#!/bin/sh\necho diverged >&2\nexit 3\n").expect("rewrite script");
        let err = engine
            .sample(ModelVariant::Binary, &dataset, &config)
            .expect_err("non-zero exit");
        assert!(err.to_string().contains("diverged"));
    }
}
