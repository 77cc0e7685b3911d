//! Request validation utilities.

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> crate::types::Result<()> {
    if s.is_empty() {
        return Err(crate::types::Error::validation(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}
