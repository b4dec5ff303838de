use std::collections::BTreeMap;

use crate::catalog::{ModelDimensions, ModelVariant};
use crate::error::{AggregationError, AggregationResult};

/// Draws of one latent parameter, row-major: `values[draw * width + flat]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDraws {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl ParameterDraws {
    pub fn new(name: &str, shape: Vec<usize>, values: Vec<f64>) -> AggregationResult<Self> {
        let width = shape.iter().product::<usize>();
        if width == 0 {
            return Err(AggregationError::inference(
                name,
                format!("parameter shape {shape:?} has no elements"),
            ));
        }
        if values.len() % width != 0 {
            return Err(AggregationError::inference(
                name,
                format!(
                    "{} values do not divide into draws of width {width}",
                    values.len()
                ),
            ));
        }

        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn width(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn n_draws(&self) -> usize {
        self.values.len() / self.width()
    }

    pub fn draw(&self, index: usize) -> &[f64] {
        let width = self.width();
        &self.values[index * width..(index + 1) * width]
    }

    pub fn draws(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.width())
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosteriorSample {
    parameters: BTreeMap<String, ParameterDraws>,
}

impl PosteriorSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, draws: ParameterDraws) {
        self.parameters.insert(name.to_string(), draws);
    }

    pub fn parameter(&self, name: &str) -> AggregationResult<&ParameterDraws> {
        self.parameters
            .get(name)
            .ok_or_else(|| AggregationError::inference(name, "parameter missing from posterior"))
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &ParameterDraws)> {
        self.parameters
            .iter()
            .map(|(name, draws)| (name.as_str(), draws))
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    pub fn n_draws(&self) -> usize {
        self.parameters
            .values()
            .map(ParameterDraws::n_draws)
            .min()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.n_draws() == 0
    }

    pub fn validate(&self, variant: ModelVariant, dims: &ModelDimensions) -> AggregationResult<()> {
        if self.is_empty() {
            return Err(AggregationError::inference(
                variant.template_id(),
                "posterior sample contains no draws",
            ));
        }

        let expected_draws = self.n_draws();
        for spec in variant.parameters() {
            let draws = self.parameter(spec.name)?;
            let expected_shape = spec.shape.resolve(dims);
            if draws.shape() != expected_shape.as_slice() {
                return Err(AggregationError::inference(
                    spec.name,
                    format!(
                        "expected shape {:?}, engine returned {:?}",
                        expected_shape,
                        draws.shape()
                    ),
                ));
            }
        }

        for (name, draws) in self.parameters() {
            if draws.n_draws() != expected_draws {
                return Err(AggregationError::inference(
                    name,
                    format!(
                        "{} draws where {} were expected",
                        draws.n_draws(),
                        expected_draws
                    ),
                ));
            }
        }

        Ok(())
    }

    pub fn concat_chains(chains: Vec<PosteriorSample>) -> AggregationResult<Self> {
        let mut chains = chains.into_iter();
        let Some(mut combined) = chains.next() else {
            return Err(AggregationError::inference("chains", "no chains were sampled"));
        };

        for (offset, chain) in chains.enumerate() {
            let chain_id = offset + 2;
            if chain.names() != combined.names() {
                return Err(AggregationError::inference(
                    "chains",
                    format!(
                        "chain {chain_id} parameters {:?} differ from chain 1 {:?}",
                        chain.names(),
                        combined.names()
                    ),
                ));
            }

            for (name, draws) in chain.parameters {
                let target = combined
                    .parameters
                    .get_mut(&name)
                    .ok_or_else(|| AggregationError::inference(&name, "missing from chain 1"))?;
                if target.shape != draws.shape {
                    return Err(AggregationError::inference(
                        &name,
                        format!(
                            "chain {chain_id} shape {:?} differs from chain 1 shape {:?}",
                            draws.shape, target.shape
                        ),
                    ));
                }
                target.values.extend(draws.values);
            }
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(entries: &[(&str, Vec<usize>, Vec<f64>)]) -> PosteriorSample {
        let mut sample = PosteriorSample::new();
        for (name, shape, values) in entries {
            let draws = ParameterDraws::new(name, shape.clone(), values.clone()).expect("valid draws");
            sample.insert(name, draws);
        }
        sample
    }

    fn binary_sample(draws: usize) -> PosteriorSample {
        sample(&[
            ("item_means", vec![2], vec![0.5; draws * 2]),
            ("item_std", vec![], vec![1.0; draws]),
            ("annotator_offsets", vec![3], vec![0.0; draws * 3]),
            ("offset_std", vec![], vec![1.0; draws]),
        ])
    }

    fn dims() -> ModelDimensions {
        ModelDimensions {
            n_items: 2,
            n_annotators: 3,
            n_levels: None,
        }
    }

    #[test]
    fn draws_are_sliced_row_major() {
        let draws = ParameterDraws::new("x", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
            .expect("valid");
        assert_eq!(draws.n_draws(), 2);
        assert_eq!(draws.draw(1), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(draws.draws().count(), 2);
    }

    #[test]
    fn ragged_values_are_rejected() {
        let err = ParameterDraws::new("x", vec![3], vec![1.0, 2.0]).expect_err("ragged");
        assert!(matches!(err, AggregationError::InferenceFailure { .. }));
    }

    #[test]
    fn validate_accepts_declared_shapes() {
        binary_sample(4)
            .validate(ModelVariant::Binary, &dims())
            .expect("shapes match");
    }

    #[test]
    fn validate_rejects_empty_and_missing_parameters() {
        let err = PosteriorSample::new()
            .validate(ModelVariant::Binary, &dims())
            .expect_err("empty");
        assert!(matches!(err, AggregationError::InferenceFailure { .. }));

        let err = binary_sample(4)
            .validate(ModelVariant::BinaryVigilance, &dims())
            .expect_err("vigilance missing");
        match err {
            AggregationError::InferenceFailure { context, .. } => assert_eq!(context, "vigilance"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let wrong = ModelDimensions {
            n_items: 5,
            ..dims()
        };
        let err = binary_sample(2)
            .validate(ModelVariant::Binary, &wrong)
            .expect_err("item count differs");
        match err {
            AggregationError::InferenceFailure { context, .. } => assert_eq!(context, "item_means"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn concat_chains_appends_draws() {
        let combined = PosteriorSample::concat_chains(vec![binary_sample(2), binary_sample(3)])
            .expect("compatible chains");
        assert_eq!(combined.n_draws(), 5);
        assert_eq!(
            combined.parameter("annotator_offsets").expect("present").values().len(),
            15
        );
    }

    #[test]
    fn concat_chains_rejects_mismatched_layouts() {
        let other = sample(&[
            ("item_means", vec![3], vec![0.5; 6]),
            ("item_std", vec![], vec![1.0; 2]),
            ("annotator_offsets", vec![3], vec![0.0; 6]),
            ("offset_std", vec![], vec![1.0; 2]),
        ]);
        let err = PosteriorSample::concat_chains(vec![binary_sample(2), other])
            .expect_err("shape mismatch");
        match err {
            AggregationError::InferenceFailure { context, .. } => assert_eq!(context, "item_means"),
            other => panic!("unexpected error: {other}"),
        }

        let renamed = sample(&[("item_means", vec![2], vec![0.5; 4])]);
        assert!(PosteriorSample::concat_chains(vec![binary_sample(2), renamed]).is_err());
        assert!(PosteriorSample::concat_chains(Vec::new()).is_err());
    }
}
