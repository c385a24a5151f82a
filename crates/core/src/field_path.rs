//! Dotted field paths with optional list indices, e.g. `contacts.phones[0].number`.
//!
//! A resource stores a flat map of top-level keys. A path resolves against that
//! map in two ways: an exact key match (`"phone.primary"` stored flat) wins,
//! otherwise the first segment names a top-level field and the remaining
//! segments navigate into its nested maps and lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{FieldValue, Fields};

/// Largest list index a path may name.
pub const MAX_LIST_INDEX: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Step {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    root: String,
    steps: Vec<Step>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidFieldPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut root = None;
        let mut steps = Vec::new();
        for segment in raw.split('.') {
            let (key, index) = match segment.find('[') {
                Some(open) => {
                    let rest = &segment[open + 1..];
                    let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                    if close + 1 != rest.len() {
                        return Err(invalid("unexpected characters after ']'"));
                    }
                    let index = rest[..close]
                        .parse::<usize>()
                        .map_err(|_| invalid("list index must be a non-negative integer"))?;
                    if index > MAX_LIST_INDEX {
                        return Err(invalid("list index out of range"));
                    }
                    (&segment[..open], Some(index))
                }
                None => (segment, None),
            };
            if key.is_empty() {
                return Err(invalid("empty segment"));
            }
            if key.contains(']') {
                return Err(invalid("unmatched ']'"));
            }

            if root.is_none() {
                root = Some(key.to_string());
            } else {
                steps.push(Step::Key(key.to_string()));
            }
            if let Some(index) = index {
                steps.push(Step::Index(index));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            root: root.ok_or_else(|| invalid("empty path"))?,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The top-level field this path lives under.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Top-level keys a `set` or `remove` through this path can touch: the
    /// flat key, and the root field when the path navigates.
    pub fn top_level_keys(&self) -> Vec<&str> {
        if self.steps.is_empty() {
            vec![self.raw.as_str()]
        } else {
            vec![self.raw.as_str(), self.root.as_str()]
        }
    }

    pub fn get<'a>(&self, fields: &'a Fields) -> Option<&'a FieldValue> {
        if let Some(value) = fields.get(&self.raw) {
            return Some(value);
        }
        let mut current = fields.get(&self.root)?;
        for step in &self.steps {
            current = match (step, current) {
                (Step::Key(key), FieldValue::Map(map)) => map.get(key)?,
                (Step::Index(index), FieldValue::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at this path. Navigates into an existing container field,
    /// creating intermediate maps and lists; otherwise stores a flat key.
    /// A list index may address an existing slot or append one past the end.
    pub fn set(&self, fields: &mut Fields, value: FieldValue) -> Result<(), CoreError> {
        let navigable = !self.steps.is_empty()
            && !fields.contains_key(&self.raw)
            && fields.get(&self.root).is_some_and(FieldValue::is_container);
        if !navigable {
            fields.insert(self.raw.clone(), value);
            return Ok(());
        }

        let mut current = fields
            .get_mut(&self.root)
            .ok_or_else(|| self.mismatch(&self.root))?;
        let last = self.steps.len() - 1;
        for (i, step) in self.steps.iter().enumerate() {
            let slot = match (step, current) {
                (Step::Key(key), FieldValue::Map(map)) => {
                    map.entry(key.clone()).or_insert(FieldValue::Null)
                }
                (Step::Index(index), FieldValue::List(items)) => {
                    if *index == items.len() {
                        items.push(FieldValue::Null);
                    }
                    match items.get_mut(*index) {
                        Some(slot) => slot,
                        None => return Err(self.mismatch(&format!("[{index}]"))),
                    }
                }
                (Step::Key(key), _) => return Err(self.mismatch(key)),
                (Step::Index(index), _) => return Err(self.mismatch(&format!("[{index}]"))),
            };
            if i == last {
                *slot = value;
                return Ok(());
            }
            if slot.is_null() {
                *slot = match self.steps[i + 1] {
                    Step::Index(_) => FieldValue::List(Vec::new()),
                    Step::Key(_) => FieldValue::Map(BTreeMap::new()),
                };
            }
            current = slot;
        }
        Ok(())
    }

    /// Remove the value at this path, returning it if it was present. A list
    /// slot is cleared to `Null` in place so later elements keep their index.
    pub fn remove(&self, fields: &mut Fields) -> Option<FieldValue> {
        if let Some(value) = fields.remove(&self.raw) {
            return Some(value);
        }
        let (last, parents) = self.steps.split_last()?;
        let mut current = fields.get_mut(&self.root)?;
        for step in parents {
            current = match (step, current) {
                (Step::Key(key), FieldValue::Map(map)) => map.get_mut(key)?,
                (Step::Index(index), FieldValue::List(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (last, current) {
            (Step::Key(key), FieldValue::Map(map)) => map.remove(key),
            (Step::Index(index), FieldValue::List(items)) => items
                .get_mut(*index)
                .map(|slot| std::mem::replace(slot, FieldValue::Null)),
            _ => None,
        }
    }

    fn mismatch(&self, segment: &str) -> CoreError {
        CoreError::PathTypeMismatch {
            path: self.raw.clone(),
            segment: segment.to_string(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

/// Every leaf path under `fields`, descending into maps and lists.
pub fn leaf_paths(fields: &Fields) -> Vec<String> {
    fn walk(value: &FieldValue, prefix: String, out: &mut Vec<String>) {
        match value {
            FieldValue::Map(map) => {
                for (key, child) in map {
                    walk(child, format!("{prefix}.{key}"), out);
                }
            }
            FieldValue::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    walk(child, format!("{prefix}[{index}]"), out);
                }
            }
            _ => out.push(prefix),
        }
    }

    let mut out = Vec::new();
    for (key, value) in fields {
        walk(value, key.clone(), &mut out);
    }
    out
}
