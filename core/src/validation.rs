//! Field validation for create and full-update payloads.
//!
//! Lengths are counted in characters, not bytes. Every violated rule is
//! reported, so a caller sees all bad fields in one response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CreateTodo, FullUpdateTodo};

pub const TITLE_MAX_CHARS: usize = 255;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// One or more rejected fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", summary(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn validate_create(input: &CreateTodo) -> Result<(), ValidationError> {
    check_fields(&input.title, input.description.as_deref())
}

pub fn validate_full_update(input: &FullUpdateTodo) -> Result<(), ValidationError> {
    check_fields(&input.title, input.description.as_deref())
}

fn check_fields(title: &str, description: Option<&str>) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    if title.trim().is_empty() {
        errors.push(FieldError::new("title", "title must not be blank"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        errors.push(FieldError::new(
            "title",
            format!("title must be at most {TITLE_MAX_CHARS} characters"),
        ));
    }
    if let Some(description) = description {
        if description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.push(FieldError::new(
                "description",
                format!("description must be at most {DESCRIPTION_MAX_CHARS} characters"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { errors })
    }
}
