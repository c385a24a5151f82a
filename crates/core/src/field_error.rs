use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Validation failure tree. Nested maps mirror structured field values and
/// are flattened into dotted paths for display next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldError {
    Message(String),
    Nested(BTreeMap<String, FieldError>),
    Items(Vec<FieldError>),
}

impl FieldError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// A single error attached to `path`, with dotted segments expanded into nesting.
    pub fn at(path: &str, msg: impl Into<String>) -> Self {
        let mut error = Self::Message(msg.into());
        for segment in path.rsplit('.') {
            let mut map = BTreeMap::new();
            map.insert(segment.to_string(), error);
            error = Self::Nested(map);
        }
        error
    }

    /// Merge `other` into `self`, keeping every message from both trees.
    pub fn merge(self, other: FieldError) -> FieldError {
        match (self, other) {
            (Self::Nested(mut left), Self::Nested(right)) => {
                for (key, value) in right {
                    let merged = match left.remove(&key) {
                        Some(existing) => existing.merge(value),
                        None => value,
                    };
                    left.insert(key, merged);
                }
                Self::Nested(left)
            }
            (Self::Items(mut left), Self::Items(right)) => {
                left.extend(right);
                Self::Items(left)
            }
            (Self::Items(mut left), other) => {
                left.push(other);
                Self::Items(left)
            }
            (this, other) => Self::Items(vec![this, other]),
        }
    }

    /// Flatten into `(path, message)` pairs. Messages held directly by a list
    /// of items share the list's path; nested structures inside a list are
    /// addressed by index.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    /// Flattened errors grouped per path, messages joined with `", "`.
    pub fn by_path(&self) -> BTreeMap<String, String> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, message) in self.flatten() {
            grouped.entry(path).or_default().push(message);
        }
        grouped
            .into_iter()
            .map(|(path, messages)| (path, messages.join(", ")))
            .collect()
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        match self {
            Self::Message(msg) => out.push((prefix.to_string(), msg.clone())),
            Self::Nested(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    child.flatten_into(&path, out);
                }
            }
            Self::Items(items) => {
                for (index, child) in items.iter().enumerate() {
                    match child {
                        Self::Message(_) => child.flatten_into(prefix, out),
                        _ => child.flatten_into(&format!("{prefix}[{index}]"), out),
                    }
                }
            }
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flat = self.flatten();
        for (i, (path, message)) in flat.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            if path.is_empty() {
                f.write_str(message)?;
            } else {
                write!(f, "{path}: {message}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FieldError {}
