//! Field-level validators run before any mutation reaches the network.
//!
//! Each validator returns a [`ValidationResult`]; [`validate_fields`]
//! collects several of them into a per-field error map for forms.

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::{messages, LostFoundError};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s\-\+\(\)]+$").expect("valid phone regex"));
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// Minimum trimmed length of a user's name.
pub const MIN_NAME_LENGTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }

    /// Converts a failed result into a validation error, prefixed with the
    /// field name.
    pub fn into_result(self, field: &str) -> Result<(), LostFoundError> {
        if self.is_valid {
            Ok(())
        } else {
            let msg = self.error.unwrap_or_else(|| messages::REQUIRED.to_string());
            Err(LostFoundError::Validation(format!("{}: {}", field, msg)))
        }
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

pub fn validate_email(email: &str) -> ValidationResult {
    if is_blank(email) {
        return ValidationResult::invalid(messages::REQUIRED);
    }
    if !EMAIL_RE.is_match(email.trim()) {
        return ValidationResult::invalid("Please enter a valid email address.");
    }
    ValidationResult::ok()
}

pub fn validate_password(password: &str, min_length: usize) -> ValidationResult {
    if password.is_empty() {
        return ValidationResult::invalid(messages::REQUIRED);
    }
    if password.chars().count() < min_length {
        return ValidationResult::invalid(format!(
            "Password must be at least {} characters long.",
            min_length
        ));
    }
    ValidationResult::ok()
}

pub fn validate_name(name: &str, max_length: usize) -> ValidationResult {
    if is_blank(name) {
        return ValidationResult::invalid(messages::REQUIRED);
    }
    if name.trim().chars().count() < MIN_NAME_LENGTH {
        return ValidationResult::invalid("Name must be at least 2 characters long.");
    }
    if name.chars().count() > max_length {
        return ValidationResult::invalid(format!(
            "Name must be less than {} characters.",
            max_length
        ));
    }
    ValidationResult::ok()
}

/// Phone numbers are optional; an empty value is valid.
pub fn validate_phone(phone: &str) -> ValidationResult {
    if is_blank(phone) {
        return ValidationResult::ok();
    }
    if !PHONE_RE.is_match(phone) {
        return ValidationResult::invalid("Please enter a valid phone number.");
    }
    ValidationResult::ok()
}

pub fn validate_item_title(title: &str, min_length: usize, max_length: usize) -> ValidationResult {
    if is_blank(title) {
        return ValidationResult::invalid(messages::REQUIRED);
    }
    if title.trim().chars().count() < min_length {
        return ValidationResult::invalid(format!(
            "Title must be at least {} characters long.",
            min_length
        ));
    }
    if title.chars().count() > max_length {
        return ValidationResult::invalid(format!(
            "Title must be less than {} characters.",
            max_length
        ));
    }
    ValidationResult::ok()
}

/// Descriptions are optional.
pub fn validate_item_description(description: &str, max_length: usize) -> ValidationResult {
    if description.chars().count() > max_length {
        return ValidationResult::invalid(format!(
            "Description must be less than {} characters.",
            max_length
        ));
    }
    ValidationResult::ok()
}

pub fn validate_item_location(location: &str, min_length: usize) -> ValidationResult {
    if is_blank(location) {
        return ValidationResult::invalid(messages::REQUIRED);
    }
    if location.trim().chars().count() < min_length {
        return ValidationResult::invalid(format!(
            "Location must be at least {} characters long.",
            min_length
        ));
    }
    ValidationResult::ok()
}

/// Dates are optional; when present they must be a real `YYYY-MM-DD`
/// calendar date that is not in the future.
pub fn validate_date(date: &str) -> ValidationResult {
    validate_date_against(date, Local::now().date_naive())
}

pub fn validate_date_against(date: &str, today: NaiveDate) -> ValidationResult {
    if is_blank(date) {
        return ValidationResult::ok();
    }
    if !DATE_RE.is_match(date) {
        return ValidationResult::invalid("Please enter a valid date (YYYY-MM-DD).");
    }
    let parsed = match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => return ValidationResult::invalid("Please enter a valid date."),
    };
    if parsed > today {
        return ValidationResult::invalid("Date cannot be in the future.");
    }
    ValidationResult::ok()
}

pub fn is_remote_uri(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

pub fn is_local_uri(uri: &str) -> bool {
    uri.starts_with("file://") || uri.starts_with("content://")
}

/// Categories are optional; a given one must be in `allowed`, ignoring case.
pub fn validate_item_category(category: &str, allowed: &[String]) -> ValidationResult {
    if is_blank(category) {
        return ValidationResult::ok();
    }
    if !allowed.iter().any(|c| c.eq_ignore_ascii_case(category.trim())) {
        return ValidationResult::invalid("Please select a valid category.");
    }
    ValidationResult::ok()
}

/// Images are optional. `size` is checked against `max_size` when known.
pub fn validate_image(uri: &str, size: Option<u64>, max_size: u64) -> ValidationResult {
    if uri.is_empty() {
        return ValidationResult::ok();
    }
    if let Some(size) = size {
        if size > max_size {
            return ValidationResult::invalid(format!(
                "Image size must be less than {}MB.",
                max_size / 1024 / 1024
            ));
        }
    }
    if !is_remote_uri(uri) && !is_local_uri(uri) {
        return ValidationResult::invalid("Invalid image path.");
    }
    ValidationResult::ok()
}

/// Outcome of validating a whole form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldErrors {
    pub is_valid: bool,
    pub errors: BTreeMap<String, String>,
}

impl FieldErrors {
    /// Turns the first failing field into a validation error.
    pub fn into_result(self) -> Result<(), LostFoundError> {
        if self.is_valid {
            return Ok(());
        }
        let msg = self
            .errors
            .iter()
            .map(|(field, err)| format!("{}: {}", field, err))
            .collect::<Vec<_>>()
            .join("; ");
        Err(LostFoundError::Validation(msg))
    }
}

pub fn validate_fields<'a, I>(fields: I) -> FieldErrors
where
    I: IntoIterator<Item = (&'a str, ValidationResult)>,
{
    let mut out = FieldErrors {
        is_valid: true,
        errors: BTreeMap::new(),
    };
    for (field, result) in fields {
        if !result.is_valid {
            out.is_valid = false;
            if let Some(error) = result.error {
                out.errors.insert(field.to_string(), error);
            }
        }
    }
    out
}
