use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, AggregationResult};

const BINARY_PROGRAM: &str = include_str!("templates/binary.stan");
const BINARY_VIGILANCE_PROGRAM: &str = include_str!("templates/binary-vigilance.stan");
const CATEGORICAL_PROGRAM: &str = include_str!("templates/categorical.stan");
const CATEGORICAL_VIGILANCE_PROGRAM: &str = include_str!("templates/categorical-vigilance.stan");
const COUNT_POISSON_PROGRAM: &str = include_str!("templates/count-poisson.stan");
const COUNT_NEGBINOM_PROGRAM: &str = include_str!("templates/count-negbinom.stan");

pub const ITEM_MEANS: &str = "item_means";
pub const ITEM_STD: &str = "item_std";
pub const ANNOTATOR_OFFSETS: &str = "annotator_offsets";
pub const OFFSET_STD: &str = "offset_std";
pub const VIGILANCE: &str = "vigilance";
pub const PHI: &str = "phi";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "kebab-case")]
pub enum ModelVariant {
    Binary,
    BinaryVigilance,
    Categorical { levels: usize },
    CategoricalVigilance { levels: usize },
    CountPoisson,
    CountNegbinom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Binary,
    Categorical,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterShape {
    Scalar,
    PerItem,
    PerAnnotator,
    PerItemLevel,
    PerAnnotatorLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub shape: ParameterShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseLink {
    Logistic,
    Softmax,
    ExposureLogistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDimensions {
    pub n_items: usize,
    pub n_annotators: usize,
    pub n_levels: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionInputs {
    pub label_count: usize,
    pub counts: bool,
    pub vigilance: bool,
    pub dispersion: bool,
}

const fn spec(name: &'static str, shape: ParameterShape) -> ParameterSpec {
    ParameterSpec { name, shape }
}

const BINARY_PARAMETERS: &[ParameterSpec] = &[
    spec(ITEM_MEANS, ParameterShape::PerItem),
    spec(ITEM_STD, ParameterShape::Scalar),
    spec(ANNOTATOR_OFFSETS, ParameterShape::PerAnnotator),
    spec(OFFSET_STD, ParameterShape::Scalar),
];

const BINARY_VIGILANCE_PARAMETERS: &[ParameterSpec] = &[
    spec(ITEM_MEANS, ParameterShape::PerItem),
    spec(ITEM_STD, ParameterShape::Scalar),
    spec(ANNOTATOR_OFFSETS, ParameterShape::PerAnnotator),
    spec(OFFSET_STD, ParameterShape::Scalar),
    spec(VIGILANCE, ParameterShape::PerAnnotator),
];

const CATEGORICAL_PARAMETERS: &[ParameterSpec] = &[
    spec(ITEM_MEANS, ParameterShape::PerItemLevel),
    spec(ITEM_STD, ParameterShape::Scalar),
    spec(ANNOTATOR_OFFSETS, ParameterShape::PerAnnotatorLevel),
    spec(OFFSET_STD, ParameterShape::Scalar),
];

const CATEGORICAL_VIGILANCE_PARAMETERS: &[ParameterSpec] = &[
    spec(ITEM_MEANS, ParameterShape::PerItemLevel),
    spec(ITEM_STD, ParameterShape::Scalar),
    spec(ANNOTATOR_OFFSETS, ParameterShape::PerAnnotatorLevel),
    spec(OFFSET_STD, ParameterShape::Scalar),
    spec(VIGILANCE, ParameterShape::PerAnnotator),
];

const COUNT_NEGBINOM_PARAMETERS: &[ParameterSpec] = &[
    spec(ITEM_MEANS, ParameterShape::PerItem),
    spec(ITEM_STD, ParameterShape::Scalar),
    spec(ANNOTATOR_OFFSETS, ParameterShape::PerAnnotator),
    spec(OFFSET_STD, ParameterShape::Scalar),
    spec(PHI, ParameterShape::Scalar),
];

pub fn select_variant(inputs: &SelectionInputs) -> AggregationResult<ModelVariant> {
    if inputs.counts {
        return Ok(if inputs.dispersion {
            ModelVariant::CountNegbinom
        } else {
            ModelVariant::CountPoisson
        });
    }

    match inputs.label_count {
        0 | 1 => Err(AggregationError::UnsupportedModel(format!(
            "{} distinct response label(s) observed; at least 2 are required outside count mode",
            inputs.label_count
        ))),
        2 if inputs.vigilance => Ok(ModelVariant::BinaryVigilance),
        2 => Ok(ModelVariant::Binary),
        levels if inputs.vigilance => Ok(ModelVariant::CategoricalVigilance { levels }),
        levels => Ok(ModelVariant::Categorical { levels }),
    }
}

impl ModelVariant {
    pub const ALL_TEMPLATE_IDS: [&'static str; 6] = [
        "binary",
        "binary-vigilance",
        "categorical",
        "categorical-vigilance",
        "count-poisson",
        "count-negbinom",
    ];

    pub fn template_id(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::BinaryVigilance => "binary-vigilance",
            Self::Categorical { .. } => "categorical",
            Self::CategoricalVigilance { .. } => "categorical-vigilance",
            Self::CountPoisson => "count-poisson",
            Self::CountNegbinom => "count-negbinom",
        }
    }

    pub fn program(self) -> &'static str {
        program_for(self.template_id()).unwrap_or_default()
    }

    pub fn family(self) -> ModelFamily {
        match self {
            Self::Binary | Self::BinaryVigilance => ModelFamily::Binary,
            Self::Categorical { .. } | Self::CategoricalVigilance { .. } => ModelFamily::Categorical,
            Self::CountPoisson | Self::CountNegbinom => ModelFamily::Count,
        }
    }

    pub fn levels(self) -> Option<usize> {
        match self {
            Self::Categorical { levels } | Self::CategoricalVigilance { levels } => Some(levels),
            _ => None,
        }
    }

    pub fn has_vigilance(self) -> bool {
        matches!(self, Self::BinaryVigilance | Self::CategoricalVigilance { .. })
    }

    pub fn parameters(self) -> &'static [ParameterSpec] {
        match self {
            Self::Binary | Self::CountPoisson => BINARY_PARAMETERS,
            Self::BinaryVigilance => BINARY_VIGILANCE_PARAMETERS,
            Self::Categorical { .. } => CATEGORICAL_PARAMETERS,
            Self::CategoricalVigilance { .. } => CATEGORICAL_VIGILANCE_PARAMETERS,
            Self::CountNegbinom => COUNT_NEGBINOM_PARAMETERS,
        }
    }

    pub fn link(self) -> InverseLink {
        match self.family() {
            ModelFamily::Binary => InverseLink::Logistic,
            ModelFamily::Categorical => InverseLink::Softmax,
            ModelFamily::Count => InverseLink::ExposureLogistic,
        }
    }
}

pub fn program_for(template_id: &str) -> Option<&'static str> {
    match template_id {
        "binary" => Some(BINARY_PROGRAM),
        "binary-vigilance" => Some(BINARY_VIGILANCE_PROGRAM),
        "categorical" => Some(CATEGORICAL_PROGRAM),
        "categorical-vigilance" => Some(CATEGORICAL_VIGILANCE_PROGRAM),
        "count-poisson" => Some(COUNT_POISSON_PROGRAM),
        "count-negbinom" => Some(COUNT_NEGBINOM_PROGRAM),
        _ => None,
    }
}

impl ParameterShape {
    pub fn resolve(self, dims: &ModelDimensions) -> Vec<usize> {
        let levels = dims.n_levels.unwrap_or(0);
        match self {
            Self::Scalar => Vec::new(),
            Self::PerItem => vec![dims.n_items],
            Self::PerAnnotator => vec![dims.n_annotators],
            Self::PerItemLevel => vec![dims.n_items, levels],
            Self::PerAnnotatorLevel => vec![dims.n_annotators, levels],
        }
    }
}
