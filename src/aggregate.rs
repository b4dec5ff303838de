use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{ANNOTATOR_OFFSETS, ITEM_MEANS, InverseLink, ModelVariant, VIGILANCE};
use crate::error::{AggregationError, AggregationResult};
use crate::posterior::{ParameterDraws, PosteriorSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemEstimate {
    Probability(f64),
    Distribution(Vec<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatorSummary {
    pub offset: Vec<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vigilance: Option<Summary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub n_draws: usize,
    pub items: Vec<ItemEstimate>,
    pub annotators: Vec<AnnotatorSummary>,
    pub hyperparameters: BTreeMap<String, Summary>,
}

pub fn logistic(value: f64) -> f64 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let exp = value.exp();
        exp / (1.0 + exp)
    }
}

pub fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = values
        .iter()
        .map(|value| (value - max).exp())
        .collect::<Vec<_>>();
    let total = exps.iter().sum::<f64>();
    exps.into_iter().map(|value| value / total).collect()
}

pub fn aggregate(variant: ModelVariant, sample: &PosteriorSample) -> AggregationResult<Aggregation> {
    if sample.is_empty() {
        return Err(AggregationError::inference(
            variant.template_id(),
            "cannot aggregate an empty posterior sample",
        ));
    }

    let item_means = sample.parameter(ITEM_MEANS)?;
    let offsets = sample.parameter(ANNOTATOR_OFFSETS)?;

    let items = match variant.link() {
        InverseLink::Logistic => logistic_estimates(item_means, None)?,
        InverseLink::ExposureLogistic => logistic_estimates(item_means, Some(offsets))?,
        InverseLink::Softmax => softmax_estimates(item_means, variant.levels())?,
    };

    let vigilance = if variant.has_vigilance() {
        Some(sample.parameter(VIGILANCE)?)
    } else {
        None
    };

    Ok(Aggregation {
        n_draws: item_means.n_draws(),
        items,
        annotators: annotator_summaries(offsets, vigilance)?,
        hyperparameters: sample
            .parameters()
            .filter(|(_, draws)| draws.shape().is_empty())
            .map(|(name, draws)| (name.to_string(), summarize(draws.values().iter().copied())))
            .collect(),
    })
}

fn logistic_estimates(
    item_means: &ParameterDraws,
    offsets: Option<&ParameterDraws>,
) -> AggregationResult<Vec<ItemEstimate>> {
    if item_means.shape().len() != 1 {
        return Err(AggregationError::inference(
            ITEM_MEANS,
            format!("expected one value per item, found shape {:?}", item_means.shape()),
        ));
    }
    if let Some(offsets) = offsets {
        ensure_same_draws(item_means, offsets, ANNOTATOR_OFFSETS)?;
    }

    let n_draws = item_means.n_draws();
    let mut totals = vec![0.0; item_means.width()];
    for draw in 0..n_draws {
        let exposure = offsets
            .map(|offsets| mean(offsets.draw(draw)))
            .unwrap_or(0.0);
        for (total, latent) in totals.iter_mut().zip(item_means.draw(draw)) {
            *total += logistic(latent + exposure);
        }
    }

    Ok(totals
        .into_iter()
        .map(|total| ItemEstimate::Probability(total / n_draws as f64))
        .collect())
}

fn softmax_estimates(
    item_means: &ParameterDraws,
    expected_levels: Option<usize>,
) -> AggregationResult<Vec<ItemEstimate>> {
    let [n_items, levels] = item_means.shape() else {
        return Err(AggregationError::inference(
            ITEM_MEANS,
            format!("expected items x levels, found shape {:?}", item_means.shape()),
        ));
    };
    let (n_items, levels) = (*n_items, *levels);
    if expected_levels != Some(levels) {
        return Err(AggregationError::inference(
            ITEM_MEANS,
            format!("{levels} levels per item where the model has {expected_levels:?}"),
        ));
    }

    let n_draws = item_means.n_draws();
    let mut totals = vec![vec![0.0; levels]; n_items];
    for draw in item_means.draws() {
        for (item_total, latent) in totals.iter_mut().zip(draw.chunks_exact(levels)) {
            for (total, probability) in item_total.iter_mut().zip(softmax(latent)) {
                *total += probability;
            }
        }
    }

    Ok(totals
        .into_iter()
        .map(|item_total| {
            ItemEstimate::Distribution(
                item_total
                    .into_iter()
                    .map(|total| total / n_draws as f64)
                    .collect(),
            )
        })
        .collect())
}

fn annotator_summaries(
    offsets: &ParameterDraws,
    vigilance: Option<&ParameterDraws>,
) -> AggregationResult<Vec<AnnotatorSummary>> {
    let (n_annotators, levels) = match offsets.shape() {
        [n_annotators] => (*n_annotators, 1),
        [n_annotators, levels] => (*n_annotators, *levels),
        other => {
            return Err(AggregationError::inference(
                ANNOTATOR_OFFSETS,
                format!("unexpected shape {other:?}"),
            ));
        }
    };
    if let Some(vigilance) = vigilance {
        ensure_same_draws(offsets, vigilance, VIGILANCE)?;
        if vigilance.width() != n_annotators {
            return Err(AggregationError::inference(
                VIGILANCE,
                format!("{} values for {n_annotators} annotators", vigilance.width()),
            ));
        }
    }

    Ok((0..n_annotators)
        .map(|annotator| AnnotatorSummary {
            offset: (0..levels)
                .map(|level| column_summary(offsets, annotator * levels + level))
                .collect(),
            vigilance: vigilance.map(|vigilance| column_summary(vigilance, annotator)),
        })
        .collect())
}

fn ensure_same_draws(
    reference: &ParameterDraws,
    other: &ParameterDraws,
    name: &str,
) -> AggregationResult<()> {
    if reference.n_draws() != other.n_draws() {
        return Err(AggregationError::inference(
            name,
            format!(
                "{} draws where {} were expected",
                other.n_draws(),
                reference.n_draws()
            ),
        ));
    }
    Ok(())
}

fn column_summary(draws: &ParameterDraws, column: usize) -> Summary {
    summarize(
        draws
            .values()
            .chunks_exact(draws.width())
            .map(|draw| draw[column]),
    )
}

// Population standard deviation (ddof = 0).
fn summarize(values: impl Iterator<Item = f64> + Clone) -> Summary {
    let count = values.clone().count();
    if count == 0 {
        return Summary {
            mean: f64::NAN,
            std: f64::NAN,
        };
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|value| (value - mean).powi(2)).sum::<f64>() / count as f64;
    Summary {
        mean,
        std: variance.sqrt(),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn draws(name: &str, shape: Vec<usize>, values: Vec<f64>) -> ParameterDraws {
        ParameterDraws::new(name, shape, values).expect("valid draws")
    }

    fn sample(parameters: Vec<(&str, ParameterDraws)>) -> PosteriorSample {
        let mut sample = PosteriorSample::new();
        for (name, parameter) in parameters {
            sample.insert(name, parameter);
        }
        sample
    }

    fn probability(estimate: &ItemEstimate) -> f64 {
        match estimate {
            ItemEstimate::Probability(value) => *value,
            ItemEstimate::Distribution(_) => panic!("expected a scalar estimate"),
        }
    }

    #[test]
    fn logistic_and_softmax_are_stable() {
        assert!((logistic(0.0) - 0.5).abs() < TOLERANCE);
        assert!((logistic(-800.0)).abs() < TOLERANCE);
        assert!((logistic(800.0) - 1.0).abs() < TOLERANCE);

        let probabilities = softmax(&[1000.0, 1000.0, 1000.0]);
        for probability in probabilities {
            assert!((probability - 1.0 / 3.0).abs() < TOLERANCE);
        }
    }

    #[test]
    fn empty_sample_is_an_inference_failure() {
        let err = aggregate(ModelVariant::Binary, &PosteriorSample::new()).expect_err("no draws");
        assert!(matches!(err, AggregationError::InferenceFailure { .. }));

        let hollow = sample(vec![
            ("item_means", draws("item_means", vec![2], Vec::new())),
            ("annotator_offsets", draws("annotator_offsets", vec![1], Vec::new())),
        ]);
        assert!(aggregate(ModelVariant::Binary, &hollow).is_err());
    }

    #[test]
    fn binary_estimate_is_mean_of_transformed_draws() {
        let sample = sample(vec![
            ("item_means", draws("item_means", vec![1], vec![0.0, 4.0])),
            ("item_std", draws("item_std", vec![], vec![1.0, 3.0])),
            ("annotator_offsets", draws("annotator_offsets", vec![2], vec![5.0, 5.0, 5.0, 5.0])),
            ("offset_std", draws("offset_std", vec![], vec![1.0, 1.0])),
        ]);

        let aggregation = aggregate(ModelVariant::Binary, &sample).expect("aggregates");
        let estimate = probability(&aggregation.items[0]);
        let expected = (logistic(0.0) + logistic(4.0)) / 2.0;
        assert!((estimate - expected).abs() < TOLERANCE);
        assert!((estimate - logistic(2.0)).abs() > 0.1);

        let item_std = aggregation.hyperparameters["item_std"];
        assert!((item_std.mean - 2.0).abs() < TOLERANCE);
        assert!((item_std.std - 1.0).abs() < TOLERANCE);
        assert_eq!(aggregation.n_draws, 2);
    }

    #[test]
    fn count_estimate_adds_average_annotator_offset() {
        let sample = sample(vec![
            ("item_means", draws("item_means", vec![2], vec![0.0, -1.0, 0.0, -1.0])),
            (
                "annotator_offsets",
                draws("annotator_offsets", vec![2], vec![1.0, -1.0, 2.0, 0.0]),
            ),
        ]);

        let aggregation = aggregate(ModelVariant::CountPoisson, &sample).expect("aggregates");
        let first = probability(&aggregation.items[0]);
        let second = probability(&aggregation.items[1]);
        assert!((first - (logistic(0.0) + logistic(1.0)) / 2.0).abs() < TOLERANCE);
        assert!((second - (logistic(-1.0) + logistic(0.0)) / 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn categorical_estimates_sum_to_one() {
        let item_means = vec![
            // draw 1: item 1, item 2
            0.3, -1.2, 2.0, 0.0, 0.0, 0.0, //
            // draw 2
            -4.0, 1.5, 0.2, 3.0, -3.0, 1.0,
        ];
        let sample = sample(vec![
            ("item_means", draws("item_means", vec![2, 3], item_means)),
            (
                "annotator_offsets",
                draws("annotator_offsets", vec![1, 3], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
            ),
        ]);

        let aggregation =
            aggregate(ModelVariant::Categorical { levels: 3 }, &sample).expect("aggregates");
        assert_eq!(aggregation.items.len(), 2);
        for estimate in &aggregation.items {
            let ItemEstimate::Distribution(probabilities) = estimate else {
                panic!("categorical estimates are vectors");
            };
            assert_eq!(probabilities.len(), 3);
            assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        }

        let ItemEstimate::Distribution(first) = &aggregation.items[0] else {
            panic!("categorical estimates are vectors");
        };
        let expected = (softmax(&[0.3, -1.2, 2.0])[2] + softmax(&[-4.0, 1.5, 0.2])[2]) / 2.0;
        assert!((first[2] - expected).abs() < TOLERANCE);

        let annotator = &aggregation.annotators[0];
        assert_eq!(annotator.offset.len(), 3);
        assert!((annotator.offset[0].mean - 0.25).abs() < TOLERANCE);
        assert!((annotator.offset[0].std - 0.15).abs() < TOLERANCE);
        assert!(annotator.vigilance.is_none());
    }

    #[test]
    fn categorical_level_count_must_match_model() {
        let sample = sample(vec![
            ("item_means", draws("item_means", vec![1, 2], vec![0.0, 1.0])),
            ("annotator_offsets", draws("annotator_offsets", vec![1, 2], vec![0.0, 0.0])),
        ]);

        let err = aggregate(ModelVariant::Categorical { levels: 3 }, &sample)
            .expect_err("two levels drawn for a three-level model");
        match err {
            AggregationError::InferenceFailure { context, reason } => {
                assert_eq!(context, "item_means");
                assert!(reason.contains("2 levels per item"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn vigilance_is_summarized_but_not_applied() {
        let base = vec![
            ("item_means", draws("item_means", vec![1], vec![1.0, -0.5])),
            ("annotator_offsets", draws("annotator_offsets", vec![2], vec![0.4, -0.4, 0.0, 0.2])),
        ];
        let plain = aggregate(ModelVariant::Binary, &sample(base.clone())).expect("aggregates");

        let mut with_vigilance = base;
        with_vigilance.push(("vigilance", draws("vigilance", vec![2], vec![0.1, 0.9, 0.3, 0.7])));
        let vigilant =
            aggregate(ModelVariant::BinaryVigilance, &sample(with_vigilance)).expect("aggregates");

        assert_eq!(plain.items, vigilant.items);
        let first = vigilant.annotators[0].vigilance.expect("vigilance summary");
        assert!((first.mean - 0.2).abs() < TOLERANCE);
        assert!((first.std - 0.1).abs() < TOLERANCE);
        assert!(plain.annotators[0].vigilance.is_none());
    }

    #[test]
    fn missing_vigilance_fails_for_vigilance_variant() {
        let sample = sample(vec![
            ("item_means", draws("item_means", vec![1], vec![1.0])),
            ("annotator_offsets", draws("annotator_offsets", vec![1], vec![0.0])),
        ]);
        let err = aggregate(ModelVariant::BinaryVigilance, &sample).expect_err("vigilance missing");
        match err {
            AggregationError::InferenceFailure { context, .. } => assert_eq!(context, "vigilance"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
