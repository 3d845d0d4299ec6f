//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator`
//! crate, plus allow-list helpers for the places caller-supplied string
//! input (sort fields, sort direction, collection names) needs checking
//! against a fixed vocabulary rather than a `validator` derive.

use crate::errors::AlyxError;
use serde::de::DeserializeOwned;
use validator::Validate;

/// Validates a request DTO that implements `Validate`.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), AlyxError> {
    data.validate().map_err(AlyxError::Validation)
}

/// Parses a JSON string and validates it in one step.
pub fn parse_and_validate<T: DeserializeOwned + Validate>(json: &str) -> Result<T, AlyxError> {
    let data: T = serde_json::from_str(json)
        .map_err(|e| AlyxError::BadRequest { message: e.to_string() })?;
    validate_request(&data)?;
    Ok(data)
}

/// Checks that `dir` is one of `"asc"` or `"desc"` (case-insensitive).
pub fn valid_sort_direction(dir: &str) -> Result<(), AlyxError> {
    match dir.to_ascii_lowercase().as_str() {
        "asc" | "desc" => Ok(()),
        other => Err(AlyxError::BadRequest {
            message: format!("invalid sort direction: {other}"),
        }),
    }
}

/// Checks that `field` appears in `allowed`, rejecting sort/filter fields
/// that aren't part of a collection's known schema.
pub fn valid_sort_field(field: &str, allowed: &[&str]) -> Result<(), AlyxError> {
    if allowed.contains(&field) {
        Ok(())
    } else {
        Err(AlyxError::BadRequest {
            message: format!("unknown sort field: {field}"),
        })
    }
}

/// Default page size used when a caller omits `limit`.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Hard ceiling on `limit`, regardless of what the caller requests.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Clamps an optional `limit` to `(0, MAX_PAGE_LIMIT]`, defaulting to
/// [`DEFAULT_PAGE_LIMIT`], and defaults a missing `offset` to zero.
///
/// Used by admin list operations (e.g. `ListUsers`) per the same
/// default-20/max-100 convention across every paginated listing.
pub fn validate_pagination(limit: Option<u32>, offset: Option<u32>) -> (u32, u32) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0);
    (limit, offset)
}

/// Custom validation functions for use with `#[validate(custom)]`.
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates a collection/field identifier: lowercase ASCII letters,
    /// digits, and underscores, must start with a letter.
    pub fn valid_identifier(value: &str) -> Result<(), ValidationError> {
        let mut chars = value.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return Err(ValidationError::new("invalid_identifier")),
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(ValidationError::new("invalid_identifier"));
        }
        Ok(())
    }

    /// Validates a URL-safe slug: lowercase letters, digits, hyphens; no
    /// leading/trailing/consecutive hyphens.
    pub fn valid_slug(value: &str) -> Result<(), ValidationError> {
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::new("invalid_slug"));
        }
        if value.starts_with('-') || value.ends_with('-') || value.contains("--") {
            return Err(ValidationError::new("invalid_slug"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validators::*;
    use super::*;

    #[test]
    fn not_blank_valid() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("  hello  ").is_ok());
    }

    #[test]
    fn not_blank_invalid() {
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
    }

    #[test]
    fn valid_identifier_accepts_snake_case() {
        assert!(valid_identifier("posts").is_ok());
        assert!(valid_identifier("user_profiles").is_ok());
    }

    #[test]
    fn valid_identifier_rejects_leading_digit_or_uppercase() {
        assert!(valid_identifier("1posts").is_err());
        assert!(valid_identifier("Posts").is_err());
        assert!(valid_identifier("").is_err());
    }

    #[test]
    fn valid_slug_rules() {
        assert!(valid_slug("my-post").is_ok());
        assert!(valid_slug("-bad").is_err());
        assert!(valid_slug("bad-").is_err());
        assert!(valid_slug("a--b").is_err());
        assert!(valid_slug("My-Post").is_err());
    }

    #[test]
    fn sort_direction_allow_list() {
        assert!(valid_sort_direction("asc").is_ok());
        assert!(valid_sort_direction("DESC").is_ok());
        assert!(valid_sort_direction("sideways").is_err());
    }

    #[test]
    fn sort_field_allow_list() {
        let allowed = ["id", "created_at", "title"];
        assert!(valid_sort_field("created_at", &allowed).is_ok());
        assert!(valid_sort_field("password_hash", &allowed).is_err());
    }

    #[test]
    fn pagination_defaults() {
        assert_eq!(validate_pagination(None, None), (20, 0));
    }

    #[test]
    fn pagination_clamps_to_max() {
        assert_eq!(validate_pagination(Some(1000), Some(5)), (100, 5));
    }

    #[test]
    fn pagination_rejects_zero_by_clamping_up() {
        assert_eq!(validate_pagination(Some(0), None).0, 1);
    }
}
