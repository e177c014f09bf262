//! Feed delta interpretation.
//!
//! Server `FeedAction` messages carry a sequence of deltas describing how the
//! feed data changed. This module provides the delta vocabulary and the
//! interpreter that applies a delta sequence to a feed data value, validating
//! every referenced path and operand type along the way.
//!
//! A delta addresses a location in the feed data with a [`Path`]: a sequence
//! of object keys and array indexes starting at the root. Operations either
//! target the value at the path (`Increment`, `Toggle`, `InsertLast`, ...) or
//! the path's parent container (`Set`, `Delete`, `InsertBefore`, ...).
//!
//! Any structural violation - a missing path, a wrong operand type, an index
//! out of range - is a [`DeltaError`]. The client treats a delta error as a
//! server protocol violation and tears the connection down.
//!
//! # Example
//!
//! ```
//! use feedlink_core::delta::{apply_deltas, Delta};
//! use serde_json::json;
//!
//! let deltas: Vec<Delta> = serde_json::from_value(json!([
//!     {"Operation": "Set", "Path": ["users"], "Value": []},
//!     {"Operation": "InsertLast", "Path": ["users"], "Value": "alice"}
//! ]))
//! .unwrap();
//!
//! let new = apply_deltas(&json!({}), &deltas).unwrap();
//! assert_eq!(new, json!({"users": ["alice"]}));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

/// One segment of a delta path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Child of an object, addressed by key.
    Key(String),
    /// Element of an array, addressed by zero-based index.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{:?}", key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A location in the feed data, starting at the root.
pub type Path = Vec<PathSegment>;

fn display_path(path: &Path) -> String {
    let segments: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    format!("[{}]", segments.join(", "))
}

/// A single feed data mutation.
///
/// The wire form is an object tagged by `Operation`, with `Path` and, for
/// the operations that take one, a `Value` operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Operation", rename_all_fields = "PascalCase")]
pub enum Delta {
    /// Writes `value` at `path`, creating an object child if absent.
    Set {
        /// Location to write; the root path replaces the entire feed data.
        path: Path,
        /// The value to write.
        value: Value,
    },
    /// Removes the object child at `path`.
    Delete {
        /// Location of the child to remove; must end in an object key.
        path: Path,
    },
    /// Removes every child of the container at `path` that equals `value`.
    DeleteValue {
        /// Location of an object or array.
        path: Path,
        /// Children equal to this value are removed.
        value: Value,
    },
    /// Prepends `value` to the string at `path`.
    Prepend {
        /// Location of a string.
        path: Path,
        /// Text to prepend.
        value: String,
    },
    /// Appends `value` to the string at `path`.
    Append {
        /// Location of a string.
        path: Path,
        /// Text to append.
        value: String,
    },
    /// Adds `value` to the number at `path`.
    Increment {
        /// Location of a number.
        path: Path,
        /// Amount to add.
        value: Number,
    },
    /// Subtracts `value` from the number at `path`.
    Decrement {
        /// Location of a number.
        path: Path,
        /// Amount to subtract.
        value: Number,
    },
    /// Inverts the boolean at `path`.
    Toggle {
        /// Location of a boolean.
        path: Path,
    },
    /// Inserts `value` at the start of the array at `path`.
    InsertFirst {
        /// Location of an array.
        path: Path,
        /// Element to insert.
        value: Value,
    },
    /// Inserts `value` at the end of the array at `path`.
    InsertLast {
        /// Location of an array.
        path: Path,
        /// Element to insert.
        value: Value,
    },
    /// Inserts `value` before the array element at `path`.
    InsertBefore {
        /// Location of an existing array element.
        path: Path,
        /// Element to insert.
        value: Value,
    },
    /// Inserts `value` after the array element at `path`.
    InsertAfter {
        /// Location of an existing array element.
        path: Path,
        /// Element to insert.
        value: Value,
    },
    /// Removes the first element of the array at `path`.
    DeleteFirst {
        /// Location of a non-empty array.
        path: Path,
    },
    /// Removes the last element of the array at `path`.
    DeleteLast {
        /// Location of a non-empty array.
        path: Path,
    },
}

/// A structural violation encountered while applying a delta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The path does not reference an existing location.
    #[error("path {path} does not exist in the feed data")]
    PathNotFound {
        /// Display form of the offending path.
        path: String,
    },
    /// The referenced value has the wrong type for the operation.
    #[error("path {path} must reference a value of type {expected}")]
    WrongType {
        /// Display form of the offending path.
        path: String,
        /// The JSON type the operation requires.
        expected: &'static str,
    },
    /// An array index is outside the array bounds.
    #[error("index {index} is out of bounds at path {path}")]
    IndexOutOfBounds {
        /// Display form of the offending path.
        path: String,
        /// The out-of-range index.
        index: usize,
    },
    /// The operation cannot be applied at the root of the feed data.
    #[error("operation cannot target the feed data root")]
    RootNotPermitted,
    /// A numeric operation produced a value JSON cannot represent.
    #[error("numeric operation at path {path} produced a non-finite value")]
    NonFiniteNumber {
        /// Display form of the offending path.
        path: String,
    },
}

/// Applies a delta sequence to `data`, returning the resulting value.
///
/// Deltas are applied in order against a working copy; `data` itself is
/// never modified. The first violation aborts the whole application.
pub fn apply_deltas(data: &Value, deltas: &[Delta]) -> Result<Value, DeltaError> {
    let mut working = data.clone();
    for delta in deltas {
        apply_delta(&mut working, delta)?;
    }
    Ok(working)
}

/// Applies a single delta to `data` in place.
pub fn apply_delta(data: &mut Value, delta: &Delta) -> Result<(), DeltaError> {
    match delta {
        Delta::Set { path, value } => set(data, path, value.clone()),
        Delta::Delete { path } => delete(data, path),
        Delta::DeleteValue { path, value } => delete_value(data, path, value),
        Delta::Prepend { path, value } => {
            edit_string(data, path, |s| format!("{}{}", value, s))
        }
        Delta::Append { path, value } => edit_string(data, path, |s| format!("{}{}", s, value)),
        Delta::Increment { path, value } => edit_number(data, path, value, false),
        Delta::Decrement { path, value } => edit_number(data, path, value, true),
        Delta::Toggle { path } => toggle(data, path),
        Delta::InsertFirst { path, value } => {
            edit_array(data, path, |a| a.insert(0, value.clone()))
        }
        Delta::InsertLast { path, value } => edit_array(data, path, |a| a.push(value.clone())),
        Delta::InsertBefore { path, value } => insert_relative(data, path, value, 0),
        Delta::InsertAfter { path, value } => insert_relative(data, path, value, 1),
        Delta::DeleteFirst { path } => delete_end(data, path, true),
        Delta::DeleteLast { path } => delete_end(data, path, false),
    }
}

/// Resolves `path` to the value it references.
fn resolve<'a>(data: &'a mut Value, path: &Path) -> Result<&'a mut Value, DeltaError> {
    let mut current = data;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => {
                map.get_mut(key).ok_or_else(|| DeltaError::PathNotFound {
                    path: display_path(path),
                })?
            }
            (PathSegment::Index(index), Value::Array(items)) => {
                items.get_mut(*index).ok_or_else(|| DeltaError::PathNotFound {
                    path: display_path(path),
                })?
            }
            _ => {
                return Err(DeltaError::PathNotFound {
                    path: display_path(path),
                })
            }
        };
    }
    Ok(current)
}

/// Splits `path` into its parent location and final segment, resolving the
/// parent. Fails on the root path.
fn resolve_parent<'a>(
    data: &'a mut Value,
    path: &Path,
) -> Result<(&'a mut Value, PathSegment), DeltaError> {
    let (last, parent_path) = path.split_last().ok_or(DeltaError::RootNotPermitted)?;
    let parent = resolve(data, &parent_path.to_vec())?;
    Ok((parent, last.clone()))
}

fn set(data: &mut Value, path: &Path, value: Value) -> Result<(), DeltaError> {
    if path.is_empty() {
        // Feed data roots are always objects.
        if !value.is_object() {
            return Err(DeltaError::WrongType {
                path: display_path(path),
                expected: "object",
            });
        }
        *data = value;
        return Ok(());
    }
    let (parent, last) = resolve_parent(data, path)?;
    match (last, parent) {
        (PathSegment::Key(key), Value::Object(map)) => {
            map.insert(key, value);
            Ok(())
        }
        (PathSegment::Index(index), Value::Array(items)) => {
            if index >= items.len() {
                return Err(DeltaError::IndexOutOfBounds {
                    path: display_path(path),
                    index,
                });
            }
            items[index] = value;
            Ok(())
        }
        _ => Err(DeltaError::PathNotFound {
            path: display_path(path),
        }),
    }
}

fn delete(data: &mut Value, path: &Path) -> Result<(), DeltaError> {
    let (parent, last) = resolve_parent(data, path)?;
    match (last, parent) {
        (PathSegment::Key(key), Value::Object(map)) => {
            if map.remove(&key).is_none() {
                return Err(DeltaError::PathNotFound {
                    path: display_path(path),
                });
            }
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "object child",
        }),
    }
}

fn delete_value(data: &mut Value, path: &Path, value: &Value) -> Result<(), DeltaError> {
    match resolve(data, path)? {
        Value::Object(map) => {
            map.retain(|_, v| v != value);
            Ok(())
        }
        Value::Array(items) => {
            items.retain(|v| v != value);
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "object or array",
        }),
    }
}

fn edit_string(
    data: &mut Value,
    path: &Path,
    edit: impl FnOnce(&str) -> String,
) -> Result<(), DeltaError> {
    let target = resolve(data, path)?;
    match target {
        Value::String(s) => {
            *s = edit(s);
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "string",
        }),
    }
}

fn edit_number(
    data: &mut Value,
    path: &Path,
    operand: &Number,
    negate: bool,
) -> Result<(), DeltaError> {
    let target = resolve(data, path)?;
    let current = match target {
        Value::Number(n) => n.clone(),
        _ => {
            return Err(DeltaError::WrongType {
                path: display_path(path),
                expected: "number",
            })
        }
    };
    *target = Value::Number(combine_numbers(&current, operand, negate).ok_or(
        DeltaError::NonFiniteNumber {
            path: display_path(path),
        },
    )?);
    Ok(())
}

/// Adds (or subtracts) two JSON numbers, staying in integer representation
/// whenever both operands are integers and the result fits.
fn combine_numbers(current: &Number, operand: &Number, negate: bool) -> Option<Number> {
    if let (Some(a), Some(b)) = (current.as_i64(), operand.as_i64()) {
        let combined = if negate {
            a.checked_sub(b)
        } else {
            a.checked_add(b)
        };
        if let Some(n) = combined {
            return Some(Number::from(n));
        }
    }
    let a = current.as_f64()?;
    let b = operand.as_f64()?;
    let combined = if negate { a - b } else { a + b };
    Number::from_f64(combined)
}

fn toggle(data: &mut Value, path: &Path) -> Result<(), DeltaError> {
    let target = resolve(data, path)?;
    match target {
        Value::Bool(b) => {
            *b = !*b;
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "boolean",
        }),
    }
}

fn edit_array(
    data: &mut Value,
    path: &Path,
    edit: impl FnOnce(&mut Vec<Value>),
) -> Result<(), DeltaError> {
    let target = resolve(data, path)?;
    match target {
        Value::Array(items) => {
            edit(items);
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "array",
        }),
    }
}

fn insert_relative(
    data: &mut Value,
    path: &Path,
    value: &Value,
    offset: usize,
) -> Result<(), DeltaError> {
    let (parent, last) = resolve_parent(data, path)?;
    match (last, parent) {
        (PathSegment::Index(index), Value::Array(items)) => {
            if index >= items.len() {
                return Err(DeltaError::IndexOutOfBounds {
                    path: display_path(path),
                    index,
                });
            }
            items.insert(index + offset, value.clone());
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "array element",
        }),
    }
}

fn delete_end(data: &mut Value, path: &Path, first: bool) -> Result<(), DeltaError> {
    let target = resolve(data, path)?;
    match target {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(DeltaError::IndexOutOfBounds {
                    path: display_path(path),
                    index: 0,
                });
            }
            if first {
                items.remove(0);
            } else {
                items.pop();
            }
            Ok(())
        }
        _ => Err(DeltaError::WrongType {
            path: display_path(path),
            expected: "array",
        }),
    }
}
