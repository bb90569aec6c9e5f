//! Job input: what a submission carries.
//!
//! The orchestrator does not interpret `source` or `options`; it only checks
//! the shape before any record exists.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Submitted unit of work.
///
/// - `source`: reference to staged input data (e.g. an uploaded script path)
/// - `options`: configuration bag handed to the runner as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobInput {
    #[validate(length(min = 1, max = 1024), custom(function = "validate_source"))]
    pub source: String,

    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl JobInput {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Validate and flatten `validator` errors into one readable line.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|errors| {
            errors
                .field_errors()
                .iter()
                .flat_map(|(field, errs)| {
                    errs.iter().map(move |e| match &e.message {
                        Some(msg) => format!("{field}: {msg}"),
                        None => format!("{field}: {}", e.code),
                    })
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
    }
}

fn validate_source(source: &str) -> Result<(), ValidationError> {
    if source.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    if source.split(['/', '\\']).any(|segment| segment == "..") {
        let mut err = ValidationError::new("traversal");
        err.message = Some("must not contain '..' segments".into());
        return Err(err);
    }
    Ok(())
}
