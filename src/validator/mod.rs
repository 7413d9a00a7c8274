//! Form validation with pipe-separated rule strings.
//!
//! ```
//! use std::collections::HashMap;
//! use sprig::validator::{Field, Validator};
//!
//! let mut input = HashMap::new();
//! input.insert("age".to_owned(), "seventeen".to_owned());
//!
//! let validator = Validator::new();
//! validator.check(&input, &[
//!     Field::new("name", "Name", "required|string|max:80"),
//!     Field::new("age", "Age", "required|integer|in:18,19,20"),
//! ])?;
//!
//! assert_eq!(validator.errors(), vec![
//!     "Name is required".to_owned(),
//!     "Age must be an integer".to_owned(),
//! ]);
//! # Ok::<(), sprig::validator::ValidatorError>(())
//! ```
//!
//! | Rule        | Passes when                                             |
//! |-------------|---------------------------------------------------------|
//! | `required`  | the field is present                                    |
//! | `string`    | the value contains no HTML tag                          |
//! | `integer`   | the value parses as a signed 64-bit integer             |
//! | `decimal`   | the value is a finite number; `,` works as the point   |
//! | `min:n`     | the value has at least `n` characters                   |
//! | `max:n`     | the value has at most `n` characters                    |
//! | `in:a,b,c`  | the value equals one of the listed options              |
//!
//! Every rule except `required` passes on a missing field. A field stops at its
//! first failing rule.

use std::cell::RefCell;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));

/// A rule list that cannot be evaluated. This is a programming error in the
/// caller, not a validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidatorError {
    #[error("unknown validation rule `{rule}` for {field}")]
    UnknownRule { field: String, rule: String },

    #[error("rule `{rule}` for {field} needs a numeric argument")]
    InvalidArgument { field: String, rule: String },
}

/// One field to check: its input name, the label used in messages, and its
/// rules.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub name: &'a str,
    pub label: &'a str,
    pub rules: &'a str,
}

impl<'a> Field<'a> {
    pub fn new(name: &'a str, label: &'a str, rules: &'a str) -> Self {
        Self { name, label, rules }
    }
}

enum Rule<'a> {
    Required,
    String,
    Integer,
    Decimal,
    Min(usize),
    Max(usize),
    In(Vec<&'a str>),
}

impl<'a> Rule<'a> {
    fn parse(field: &Field<'_>, spec: &'a str) -> Result<Self, ValidatorError> {
        let (name, argument) = match spec.split_once(':') {
            Some((name, argument)) => (name, Some(argument)),
            None => (spec, None),
        };
        let length = || {
            argument
                .and_then(|a| a.trim().parse::<usize>().ok())
                .ok_or_else(|| ValidatorError::InvalidArgument {
                    field: field.label.to_owned(),
                    rule: spec.to_owned(),
                })
        };

        Ok(match name {
            "required" => Self::Required,
            "string" => Self::String,
            "integer" => Self::Integer,
            "decimal" => Self::Decimal,
            "min" => Self::Min(length()?),
            "max" => Self::Max(length()?),
            "in" => Self::In(argument.unwrap_or("").split(',').map(str::trim).collect()),
            _ => {
                return Err(ValidatorError::UnknownRule {
                    field: field.label.to_owned(),
                    rule: name.to_owned(),
                });
            }
        })
    }

    // The error message for `label`, or `None` when `value` passes.
    fn check(&self, value: Option<&str>, label: &str) -> Option<String> {
        let Some(value) = value else {
            return matches!(self, Self::Required).then(|| format!("{label} is required"));
        };
        match self {
            Self::Required => None,
            Self::String => HTML_TAG
                .is_match(value)
                .then(|| format!("{label} must not contain HTML")),
            Self::Integer => value
                .trim()
                .parse::<i64>()
                .is_err()
                .then(|| format!("{label} must be an integer")),
            Self::Decimal => (!is_decimal(value)).then(|| format!("{label} must be a decimal number")),
            Self::Min(min) => (value.chars().count() < *min)
                .then(|| format!("{label} must have at least {min} characters")),
            Self::Max(max) => (value.chars().count() > *max)
                .then(|| format!("{label} must have at most {max} characters")),
            Self::In(options) => (!options.contains(&value))
                .then(|| format!("{label} contains an invalid value")),
        }
    }
}

fn is_decimal(value: &str) -> bool {
    value
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .is_ok_and(f64::is_finite)
}

/// Collects validation messages for the current request.
///
/// Messages from several [`Validator::check`] calls accumulate, in field order.
#[derive(Debug, Default)]
pub struct Validator {
    errors: RefCell<Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs each field's rules against `input`.
    ///
    /// # Errors
    ///
    /// [`ValidatorError`] when a rule is unknown or malformed. Messages
    /// recorded for earlier fields are kept.
    pub fn check(
        &self,
        input: &HashMap<String, String>,
        fields: &[Field<'_>],
    ) -> Result<&Self, ValidatorError> {
        for field in fields {
            let value = input.get(field.name).map(String::as_str);
            for spec in field.rules.split('|').filter(|r| !r.is_empty()) {
                let rule = Rule::parse(field, spec)?;
                if let Some(message) = rule.check(value, field.label) {
                    debug!(field = field.name, rule = spec, "validation failed");
                    self.errors.borrow_mut().push(message);
                    break;
                }
            }
        }
        Ok(self)
    }

    pub fn passes(&self) -> bool {
        self.errors.borrow().is_empty()
    }

    pub fn fails(&self) -> bool {
        !self.passes()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}
