//! Transport-safe snapshots of traced variable values

use crate::config::ValueLimits;
use serde::{Deserialize, Serialize};

/// Container flavour of a [`TraceValue::Sequence`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    List,
    Tuple,
    Set,
    Frozenset,
}

impl SequenceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Set => "set",
            Self::Frozenset => "frozenset",
        }
    }
}

/// A closed, owned representation of one runtime value
///
/// `len` fields always carry the original size, so a truncated container or
/// string can still be told apart from a short one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceValue {
    None,
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    Str {
        value: String,
        len: usize,
    },
    Sequence {
        kind: SequenceKind,
        items: Vec<TraceValue>,
        len: usize,
    },
    Mapping {
        entries: Vec<(TraceValue, TraceValue)>,
        len: usize,
    },
    /// Anything else: functions, classes, modules, instances, over-deep or
    /// unrepresentable values
    Opaque {
        type_name: String,
        label: String,
    },
}

impl TraceValue {
    #[must_use]
    pub fn opaque(type_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::Opaque {
            type_name: type_name.into(),
            label: label.into(),
        }
    }

    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        let value = value.into();
        let len = value.chars().count();
        Self::Str { value, len }
    }

    /// Whether the snapshot dropped part of the original value
    #[must_use]
    pub fn is_partial(&self) -> bool {
        match self {
            Self::Str { value, len } => value.chars().count() < *len,
            Self::Sequence { items, len, .. } => {
                items.len() < *len || items.iter().any(Self::is_partial)
            }
            Self::Mapping { entries, len } => {
                entries.len() < *len
                    || entries.iter().any(|(k, v)| k.is_partial() || v.is_partial())
            }
            _ => false,
        }
    }

    /// Re-apply snapshot bounds
    ///
    /// Containers nested deeper than `max_depth` collapse into an opaque
    /// placeholder; longer containers and strings are cut. Never removes a
    /// value outright.
    #[must_use]
    pub fn bounded(self, limits: &ValueLimits) -> Self {
        self.bounded_at(limits, 0)
    }

    fn bounded_at(self, limits: &ValueLimits, depth: usize) -> Self {
        match self {
            Self::Str { value, len } => {
                if value.chars().count() <= limits.max_string {
                    Self::Str { value, len }
                } else {
                    Self::Str {
                        value: value.chars().take(limits.max_string).collect(),
                        len,
                    }
                }
            }
            Self::Sequence { kind, items, len } => {
                if depth >= limits.max_depth {
                    return Self::opaque(kind.as_str(), format!("<{} of {len} items>", kind.as_str()));
                }
                let items = items
                    .into_iter()
                    .take(limits.max_items)
                    .map(|item| item.bounded_at(limits, depth + 1))
                    .collect();
                Self::Sequence { kind, items, len }
            }
            Self::Mapping { entries, len } => {
                if depth >= limits.max_depth {
                    return Self::opaque("dict", format!("<dict of {len} items>"));
                }
                let entries = entries
                    .into_iter()
                    .take(limits.max_items)
                    .map(|(k, v)| (k.bounded_at(limits, depth + 1), v.bounded_at(limits, depth + 1)))
                    .collect();
                Self::Mapping { entries, len }
            }
            Self::Opaque { type_name, label } => Self::Opaque {
                type_name,
                label: label.chars().take(limits.max_string).collect(),
            },
            scalar => scalar,
        }
    }
}
