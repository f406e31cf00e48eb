//! # Diff patcher
//!
//! Streaming endpoints send the first output in full and every later output as
//! a list of edits against the previous one. On the wire an edit list is a JSON
//! array of `[action, path, value]` triples:
//!
//! ```text
//! [["replace", [0], "hello"], ["append", [1, "text"], " world"], ["delete", [2], null]]
//! ```
//!
//! Edits are applied strictly in order against the accumulator. Array deletes
//! whose index is past the end remove the last entry, so a batch of deletes
//! written against pre-batch indices still empties the container.

use std::fmt;

use serde_json::Value;

use crate::errors::{ClientError, ClientResult};
use crate::value::{display_path, PathKey, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    Add,
    Replace,
    Delete,
    Append,
}

impl DiffAction {
    pub fn parse(s: &str) -> ClientResult<Self> {
        match s {
            "add" => Ok(DiffAction::Add),
            "replace" => Ok(DiffAction::Replace),
            "delete" => Ok(DiffAction::Delete),
            "append" => Ok(DiffAction::Append),
            other => Err(ClientError::protocol(format!("unknown diff action `{}`", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffAction::Add => "add",
            DiffAction::Replace => "replace",
            DiffAction::Delete => "delete",
            DiffAction::Append => "append",
        }
    }
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structural edit.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOp {
    pub action: DiffAction,
    pub path: Vec<PathKey>,
    pub value: Payload,
}

impl DiffOp {
    pub fn new(action: DiffAction, path: Vec<PathKey>, value: Payload) -> Self {
        Self {
            action,
            path,
            value,
        }
    }

    pub fn delete(path: Vec<PathKey>) -> Self {
        Self::new(DiffAction::Delete, path, Payload::Null)
    }

    /// Parse one `[action, path, value?]` triple.
    pub fn from_json(value: &Value) -> ClientResult<Self> {
        let parts = value
            .as_array()
            .ok_or_else(|| ClientError::protocol(format!("diff entry is not an array: {}", value)))?;

        let action = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::protocol("diff entry without an action"))
            .and_then(DiffAction::parse)?;

        let path = match parts.get(1) {
            Some(Value::Array(steps)) => steps
                .iter()
                .map(PathKey::from_json)
                .collect::<ClientResult<Vec<_>>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ClientError::protocol(format!(
                    "diff path is not an array: {}",
                    other
                )))
            }
        };

        let value = parts.get(2).cloned().map(Payload::from).unwrap_or_default();

        Ok(Self::new(action, path, value))
    }
}

/// Parse a wire-form edit list.
pub fn parse_diff(value: &Value) -> ClientResult<Vec<DiffOp>> {
    value
        .as_array()
        .ok_or_else(|| ClientError::protocol(format!("diff is not an array: {}", value)))?
        .iter()
        .map(DiffOp::from_json)
        .collect()
}

/// Apply `ops` in order to `base` and return the result.
pub fn apply_diff(mut base: Payload, ops: &[DiffOp]) -> ClientResult<Payload> {
    for op in ops {
        apply_op(&mut base, op)?;
    }
    Ok(base)
}

fn apply_op(root: &mut Payload, op: &DiffOp) -> ClientResult<()> {
    let Some((last, parent_path)) = op.path.split_last() else {
        return match op.action {
            DiffAction::Replace => {
                *root = op.value.clone();
                Ok(())
            }
            DiffAction::Append => append_into(root, &op.value, &op.path),
            action => Err(ClientError::protocol(format!(
                "`{}` is not allowed at the root",
                action
            ))),
        };
    };

    let invalid = || ClientError::protocol(format!("{} at {}", op.action, display_path(&op.path)));

    let parent = root.get_path_mut(parent_path).ok_or_else(invalid)?;

    match (parent, last) {
        (Payload::Array(items), PathKey::Index(i)) => {
            let i = *i;
            match op.action {
                DiffAction::Replace => {
                    let slot = items.get_mut(i).ok_or_else(invalid)?;
                    *slot = op.value.clone();
                }
                DiffAction::Add => {
                    if i > items.len() {
                        return Err(invalid());
                    }
                    items.insert(i, op.value.clone());
                }
                DiffAction::Delete => {
                    if items.is_empty() {
                        return Err(invalid());
                    }
                    let i = i.min(items.len() - 1);
                    items.remove(i);
                }
                DiffAction::Append => {
                    let slot = items.get_mut(i).ok_or_else(invalid)?;
                    append_into(slot, &op.value, &op.path)?;
                }
            }
        }
        (Payload::Object(map), PathKey::Key(k)) => match op.action {
            DiffAction::Replace | DiffAction::Add => {
                map.insert(k.clone(), op.value.clone());
            }
            DiffAction::Delete => {
                map.shift_remove(k).ok_or_else(invalid)?;
            }
            DiffAction::Append => {
                let slot = map.get_mut(k).ok_or_else(invalid)?;
                append_into(slot, &op.value, &op.path)?;
            }
        },
        _ => return Err(invalid()),
    }

    Ok(())
}

fn append_into(target: &mut Payload, value: &Payload, path: &[PathKey]) -> ClientResult<()> {
    match (target, value) {
        (Payload::String(s), Payload::String(tail)) => s.push_str(tail),
        (Payload::Array(items), Payload::Array(tail)) => items.extend(tail.iter().cloned()),
        (target, value) => {
            return Err(ClientError::protocol(format!(
                "cannot append {} to {} at {}",
                value.kind_name(),
                target.kind_name(),
                display_path(path)
            )))
        }
    }
    Ok(())
}
