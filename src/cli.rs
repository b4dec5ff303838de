use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "crowdcal",
    version,
    about = "Bayesian aggregation of annotator judgments into calibrated item estimates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Aggregate(AggregateArgs),
    Templates(TemplatesArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON-lines file with one judgment per line.
    pub input: PathBuf,

    pub out_dir: PathBuf,

    #[arg(long, default_value = "id")]
    pub id_field: String,

    #[arg(long, default_value = "label")]
    pub response_field: String,

    #[arg(long, default_value = "annotator")]
    pub annotator_field: String,

    #[arg(long = "iter", default_value_t = 4000)]
    pub iterations: usize,

    #[arg(long, default_value_t = 5)]
    pub chains: usize,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub no_vigilance: bool,

    /// Log-frequency prior over categorical levels instead of a flat one.
    #[arg(long, default_value_t = false)]
    pub prior: bool,

    /// Treat responses as non-negative counts.
    #[arg(long, default_value_t = false)]
    pub counts: bool,

    /// Negative binomial instead of Poisson in count mode.
    #[arg(long, default_value_t = false)]
    pub dispersion: bool,

    /// Directory holding one compiled CmdStan executable per template id.
    #[arg(long, default_value = ".cache/crowdcal/models")]
    pub sampler_dir: PathBuf,

    #[arg(long, default_value_t = false)]
    pub export_dataset: bool,

    /// Stop after encoding; writes the registries and encoded dataset only.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AggregateArgs {
    /// Output directory of an earlier `run`.
    pub out_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TemplatesArgs {
    pub out_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    pub out_dir: PathBuf,
}
