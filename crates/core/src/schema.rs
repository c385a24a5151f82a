use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_error::FieldError;
use crate::field_path::FieldPath;
use crate::field_value::{FieldValue, Fields};

const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    Required,
    Phone,
    Email,
    Url,
    MaxLength(usize),
    OneOf(Vec<String>),
}

impl FieldRule {
    /// Check a present, non-null value. Returns the failure message, if any.
    fn check(&self, value: &FieldValue) -> Option<String> {
        match self {
            Self::Required => match value {
                FieldValue::Text(s) if s.trim().is_empty() => Some("this field is required".into()),
                _ => None,
            },
            Self::Phone => text_rule(value, |s| {
                let digits = s.chars().filter(char::is_ascii_digit).count();
                let allowed = s
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | '(' | ')' | ' '));
                if !allowed || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits) {
                    Some("enter a valid phone number".into())
                } else {
                    None
                }
            }),
            Self::Email => text_rule(value, |s| {
                let valid = match s.split_once('@') {
                    Some((local, domain)) => {
                        !local.is_empty()
                            && !domain.contains('@')
                            && domain.contains('.')
                            && !domain.starts_with('.')
                            && !domain.ends_with('.')
                            && !s.chars().any(char::is_whitespace)
                    }
                    None => false,
                };
                (!valid).then(|| "enter a valid email address".into())
            }),
            Self::Url => text_rule(value, |s| {
                let host = s
                    .strip_prefix("https://")
                    .or_else(|| s.strip_prefix("http://"));
                match host {
                    Some(rest) if !rest.is_empty() && !rest.chars().any(char::is_whitespace) => None,
                    _ => Some("enter a valid URL".into()),
                }
            }),
            Self::MaxLength(max) => text_rule(value, |s| {
                let len = s.chars().count();
                (len > *max).then(|| format!("ensure this field has no more than {max} characters"))
            }),
            Self::OneOf(choices) => text_rule(value, |s| {
                (!choices.iter().any(|c| c == s))
                    .then(|| format!("\"{s}\" is not a valid choice"))
            }),
        }
    }
}

fn text_rule(value: &FieldValue, check: impl FnOnce(&str) -> Option<String>) -> Option<String> {
    match value {
        FieldValue::Text(s) => check(s),
        _ => Some("expected a text value".into()),
    }
}

/// Field-level constraints a record store enforces on every write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    rules: BTreeMap<FieldPath, Vec<FieldRule>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, path: &str, rule: FieldRule) -> Result<Self, CoreError> {
        let path = FieldPath::parse(path)?;
        self.rules.entry(path).or_default().push(rule);
        Ok(self)
    }

    /// Constraints for the editable HSDS service fields.
    pub fn hsds() -> Self {
        let mut rules: BTreeMap<FieldPath, Vec<FieldRule>> = BTreeMap::new();
        let mut add = |path: &str, rule: FieldRule| {
            if let Ok(path) = FieldPath::parse(path) {
                rules.entry(path).or_default().push(rule);
            }
        };
        add("name", FieldRule::Required);
        add("name", FieldRule::MaxLength(255));
        add("email", FieldRule::Email);
        add("url", FieldRule::Url);
        add("phone.primary", FieldRule::Phone);
        add(
            "status",
            FieldRule::OneOf(
                ["active", "inactive", "defunct", "temporarily closed"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
        );
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn validate(&self, fields: &Fields) -> Result<(), FieldError> {
        let mut errors: Option<FieldError> = None;
        for (path, rules) in &self.rules {
            let value = path.get(fields).filter(|v| !v.is_null());
            for rule in rules {
                let message = match value {
                    Some(value) => rule.check(value),
                    None if *rule == FieldRule::Required => Some("this field is required".into()),
                    None => None,
                };
                if let Some(message) = message {
                    let error = FieldError::at(path.as_str(), message);
                    errors = Some(match errors {
                        Some(existing) => existing.merge(error),
                        None => error,
                    });
                }
            }
        }
        match errors {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }
}
