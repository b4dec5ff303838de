use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("configuration error: field `{field}`{}: {reason}", record_suffix(.record))]
    Configuration {
        field: String,
        record: Option<usize>,
        reason: String,
    },

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("inference failure ({context}): {reason}")]
    InferenceFailure { context: String, reason: String },
}

impl AggregationError {
    pub fn config(field: &str, record: Option<usize>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            record,
            reason: reason.into(),
        }
    }

    pub fn inference(context: &str, reason: impl Into<String>) -> Self {
        Self::InferenceFailure {
            context: context.to_string(),
            reason: reason.into(),
        }
    }
}

fn record_suffix(record: &Option<usize>) -> String {
    match record {
        Some(index) => format!(" at record {index}"),
        None => String::new(),
    }
}

pub type AggregationResult<T> = std::result::Result<T, AggregationError>;
