use itertools::Itertools;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum ForwarderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing required field(s) [{}] in input: {input}", .fields.iter().join(", "))]
    MissingRequiredField {
        fields: Vec<&'static str>,
        input: Value,
    },

    #[error("smart object {0} already exists")]
    AlreadyExists(String),

    #[error("mnubo API returned {status}: {body}")]
    Platform {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to reach mnubo API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to describe device {device_id} in the registry: {message}")]
    Registry { device_id: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForwarderError {
    pub(crate) fn missing(fields: Vec<&'static str>, input: &Value) -> Self {
        ForwarderError::MissingRequiredField {
            fields,
            input: input.clone(),
        }
    }
}
