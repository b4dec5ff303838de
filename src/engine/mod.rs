pub mod cmdstan;

use serde::{Deserialize, Serialize};

use crate::catalog::ModelVariant;
use crate::encoder::EncodedDataset;
use crate::error::{AggregationError, AggregationResult};
use crate::posterior::PosteriorSample;

pub use cmdstan::CmdStanEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub iterations: usize,
    pub chains: usize,
    pub seed: Option<u64>,
}

impl SamplingConfig {
    pub fn validate(&self) -> AggregationResult<()> {
        if self.iterations < 2 {
            return Err(AggregationError::config(
                "iter",
                None,
                format!("{} iterations leave no post-warmup draws", self.iterations),
            ));
        }
        if self.chains == 0 {
            return Err(AggregationError::config("chains", None, "at least one chain is required"));
        }
        Ok(())
    }

    pub fn warmup(&self) -> usize {
        self.iterations / 2
    }

    pub fn kept_draws(&self) -> usize {
        self.iterations - self.warmup()
    }
}

/// Draws a posterior sample for an encoded dataset under one model variant.
pub trait InferenceEngine {
    fn sample(
        &self,
        variant: ModelVariant,
        dataset: &EncodedDataset,
        config: &SamplingConfig,
    ) -> AggregationResult<PosteriorSample>;
}
