//! Admission control for storage keys.
//!
//! Device ids and service names are joined into `{device_id}:{service}`, so
//! both must match `^[a-zA-Z0-9_-]+$` before any store operation runs.

use thiserror::Error;

/// Identifier validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Empty { field: &'static str },

    #[error("Invalid {field} format: character {found:?} is not allowed (must be [a-zA-Z0-9_-])")]
    InvalidCharacters { field: &'static str, found: char },
}

/// Validate one key component.
///
/// `field` names the component in the error message ("device_id", "service").
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }

    if let Some(found) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
    {
        return Err(ValidationError::InvalidCharacters { field, found });
    }

    Ok(())
}

/// Validate both halves of a `(device_id, service)` key.
pub fn validate_key_parts(device_id: &str, service: &str) -> Result<(), ValidationError> {
    validate_identifier("device_id", device_id)?;
    validate_identifier("service", service)
}
