// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Application of edit scripts produced by the [delta codec](crate::delta).
//!
//! A script is a flat JSON array of opcodes and their operands, e.g.
//! `[2,1]` (delete index 1) or `[5,0,2,[9,9],1,4,"x"]` (replace the range
//! `[0,2)` with `[9,9]`, then set index 4 to `"x"`). Because every opcode
//! addresses the *running* state, concatenating two scripts composes them;
//! the versioned-node history relies on exactly that.

use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Opcode numbers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Opcode {
    UpdateAt = 1,
    DeleteAt = 2,
    InsertAt = 3,
    DeleteRange = 4,
    UpdateRange = 5,
    EditAt = 6,
}

impl Opcode {
    pub const fn number(self) -> i64 {
        self as i64
    }

    pub(crate) const fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::UpdateAt),
            2 => Some(Self::DeleteAt),
            3 => Some(Self::InsertAt),
            4 => Some(Self::DeleteRange),
            5 => Some(Self::UpdateRange),
            6 => Some(Self::EditAt),
            _ => None,
        }
    }
}

/// A malformed edit script. These are hard errors: a script that does not
/// fit its base value indicates protocol corruption, not a recoverable
/// client mistake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("invalid update operation: {0}")]
    UnknownOpcode(i64),
    #[error("edit script ended inside an operation")]
    Truncated,
    #[error("operand has the wrong type, expected {0}")]
    BadOperand(&'static str),
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid range {from}..{to} for length {len}")]
    BadRange { from: usize, to: usize, len: usize },
    #[error("no member {0:?} in object")]
    NoSuchKey(String),
    #[error("operation {0:?} cannot be applied to an object")]
    NotAnObjectOperation(Opcode),
}

/// Applies `script` to `base` and returns the edited value.
///
/// A non-array script replaces the value wholesale; so does an array
/// script applied to a non-container base (the array *is* the new value).
///
/// # Errors
///
/// Returns an [`ApplyError`] for unknown opcodes, missing operands, or
/// positions that do not exist in the running state.
pub fn apply(base: &Value, script: &Value) -> Result<Value, ApplyError> {
    let Some(ops) = script.as_array() else {
        return Ok(script.clone());
    };

    match base {
        Value::Array(items) => apply_to_array(items, ops),
        Value::Object(members) => apply_to_object(members, ops),
        _ => Ok(script.clone()),
    }
}

struct Cursor<'a> {
    ops: &'a [Value],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<&'a Value, ApplyError> {
        let item = self.ops.get(self.at).ok_or(ApplyError::Truncated)?;
        self.at += 1;
        Ok(item)
    }

    fn next_opcode(&mut self) -> Result<Opcode, ApplyError> {
        let n = self.next()?.as_i64().ok_or(ApplyError::BadOperand("opcode number"))?;
        Opcode::from_number(n).ok_or(ApplyError::UnknownOpcode(n))
    }

    fn next_index(&mut self) -> Result<usize, ApplyError> {
        let n = self.next()?.as_i64().ok_or(ApplyError::BadOperand("index"))?;
        usize::try_from(n).map_err(|_| ApplyError::BadOperand("non-negative index"))
    }

    fn next_key(&mut self) -> Result<&'a str, ApplyError> {
        self.next()?.as_str().ok_or(ApplyError::BadOperand("object key"))
    }

    const fn done(&self) -> bool {
        self.at == self.ops.len()
    }
}

fn check_index(index: usize, len: usize) -> Result<(), ApplyError> {
    if index < len {
        Ok(())
    } else {
        Err(ApplyError::IndexOutOfRange { index, len })
    }
}

fn apply_to_array(base: &Arc<Vec<Value>>, ops: &[Value]) -> Result<Value, ApplyError> {
    let mut result: Vec<Value> = base.as_ref().clone();
    let mut cursor = Cursor { ops, at: 0 };

    while !cursor.done() {
        match cursor.next_opcode()? {
            Opcode::UpdateAt => {
                let index = cursor.next_index()?;
                let new_value = cursor.next()?;
                check_index(index, result.len())?;
                result[index] = new_value.clone();
            },
            Opcode::DeleteAt => {
                let index = cursor.next_index()?;
                check_index(index, result.len())?;
                result.remove(index);
            },
            Opcode::InsertAt => {
                let index = cursor.next_index()?;
                let new_value = cursor.next()?;
                if index > result.len() {
                    return Err(ApplyError::IndexOutOfRange { index, len: result.len() });
                }
                result.insert(index, new_value.clone());
            },
            Opcode::DeleteRange => {
                let from = cursor.next_index()?;
                let to = cursor.next_index()?;
                check_range(from, to, result.len())?;
                result.drain(from..to);
            },
            Opcode::UpdateRange => {
                let from = cursor.next_index()?;
                let to = cursor.next_index()?;
                let fill =
                    cursor.next()?.as_array().ok_or(ApplyError::BadOperand("fill array"))?;
                check_range(from, to, result.len())?;
                drop(result.splice(from..to, fill.iter().cloned()));
            },
            Opcode::EditAt => {
                let index = cursor.next_index()?;
                let nested = cursor.next()?;
                check_index(index, result.len())?;
                result[index] = apply(&result[index], nested)?;
            },
        }
    }

    Ok(Value::array(result))
}

fn check_range(from: usize, to: usize, len: usize) -> Result<(), ApplyError> {
    if from <= to && to <= len {
        Ok(())
    } else {
        Err(ApplyError::BadRange { from, to, len })
    }
}

fn apply_to_object(
    base: &Arc<IndexMap<String, Value>>,
    ops: &[Value],
) -> Result<Value, ApplyError> {
    let mut result: IndexMap<String, Value> = base.as_ref().clone();
    let mut cursor = Cursor { ops, at: 0 };

    while !cursor.done() {
        match cursor.next_opcode()? {
            Opcode::UpdateAt => {
                let key = cursor.next_key()?;
                let new_value = cursor.next()?.clone();
                let slot = result
                    .get_mut(key)
                    .ok_or_else(|| ApplyError::NoSuchKey(key.to_owned()))?;
                *slot = new_value;
            },
            Opcode::DeleteAt => {
                let key = cursor.next_key()?;
                result.shift_remove(key);
            },
            Opcode::InsertAt => {
                let key = cursor.next_key()?;
                let new_value = cursor.next()?;
                result.insert(key.to_owned(), new_value.clone());
            },
            Opcode::EditAt => {
                let key = cursor.next_key()?;
                let nested = cursor.next()?;
                let current = result
                    .get(key)
                    .ok_or_else(|| ApplyError::NoSuchKey(key.to_owned()))?;
                let edited = apply(current, nested)?;
                result[key] = edited;
            },
            other @ (Opcode::DeleteRange | Opcode::UpdateRange) => {
                return Err(ApplyError::NotAnObjectOperation(other));
            },
        }
    }

    Ok(Value::object(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Value {
        Value::from_json(text).expect("test input parses")
    }

    fn apply_text(base: &str, script: &str) -> String {
        apply(&parse(base), &parse(script)).expect("script applies").to_json()
    }

    #[test]
    fn non_array_script_replaces_wholesale() {
        assert_eq!(apply_text("[1,2,3]", "null"), "null");
        assert_eq!(apply_text(r#"{"a":1}"#, "42"), "42");
        assert_eq!(apply_text("1", r#""x""#), r#""x""#);
    }

    #[test]
    fn array_script_on_scalar_is_the_new_value() {
        assert_eq!(apply_text("1", "[4,5,6]"), "[4,5,6]");
    }

    #[test]
    fn update_at() {
        assert_eq!(apply_text("[1,2,3]", r#"[1,1,"x"]"#), r#"[1,"x",3]"#);
    }

    #[test]
    fn delete_at() {
        assert_eq!(apply_text("[1,2,3]", "[2,0]"), "[2,3]");
    }

    #[test]
    fn insert_at_start_middle_end() {
        assert_eq!(apply_text("[1,2]", "[3,0,0]"), "[0,1,2]");
        assert_eq!(apply_text("[1,2]", "[3,1,9]"), "[1,9,2]");
        assert_eq!(apply_text("[1,2]", "[3,2,9]"), "[1,2,9]");
    }

    #[test]
    fn delete_range_is_half_open() {
        assert_eq!(apply_text("[1,2,3,4,5]", "[4,1,3]"), "[1,4,5]");
        assert_eq!(apply_text("[1,2,3]", "[4,1,1]"), "[1,2,3]");
    }

    #[test]
    fn update_range_replaces_and_fills() {
        assert_eq!(apply_text("[1,2,3,4]", "[5,1,3,[9,9,9]]"), "[1,9,9,9,4]");
        assert_eq!(apply_text("[1,2]", "[5,0,2,[]]"), "[]");
    }

    #[test]
    fn edit_at_recurses() {
        assert_eq!(apply_text("[[1,2],3]", "[6,0,[2,0]]"), "[[2],3]");
        assert_eq!(apply_text(r#"[{"a":1}]"#, r#"[6,0,[1,"a",2]]"#), r#"[{"a":2}]"#);
    }

    #[test]
    fn opcodes_address_the_running_state() {
        // delete shifts the following update's index
        assert_eq!(apply_text("[1,2,3,4]", "[2,0,1,0,9]"), "[9,3,4]");
        // concatenated scripts compose
        assert_eq!(apply_text("[1,2,3]", "[2,0,2,0]"), "[3]");
    }

    #[test]
    fn object_operations() {
        assert_eq!(apply_text(r#"{"a":1,"b":2}"#, r#"[1,"a",3]"#), r#"{"a":3,"b":2}"#);
        assert_eq!(apply_text(r#"{"a":1,"b":2}"#, r#"[2,"a"]"#), r#"{"b":2}"#);
        assert_eq!(apply_text(r#"{"a":1}"#, r#"[3,"c",null]"#), r#"{"a":1,"c":null}"#);
        assert_eq!(apply_text(r#"{"a":[1]}"#, r#"[6,"a",[3,1,2]]"#), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert_eq!(
            apply(&parse("[1]"), &parse("[7,0]")),
            Err(ApplyError::UnknownOpcode(7))
        );
    }

    #[test]
    fn truncated_script_is_an_error() {
        assert_eq!(apply(&parse("[1]"), &parse("[1,0]")), Err(ApplyError::Truncated));
    }

    #[test]
    fn bounds_violations_are_errors() {
        assert_eq!(
            apply(&parse("[1]"), &parse("[2,5]")),
            Err(ApplyError::IndexOutOfRange { index: 5, len: 1 })
        );
        assert_eq!(
            apply(&parse("[1,2]"), &parse("[4,2,1]")),
            Err(ApplyError::BadRange { from: 2, to: 1, len: 2 })
        );
        assert_eq!(
            apply(&parse(r#"{"a":1}"#), &parse(r#"[1,"nope",2]"#)),
            Err(ApplyError::NoSuchKey("nope".to_owned()))
        );
    }

    #[test]
    fn range_operations_do_not_apply_to_objects() {
        assert_eq!(
            apply(&parse(r#"{"a":1}"#), &parse("[4,0,1]")),
            Err(ApplyError::NotAnObjectOperation(Opcode::DeleteRange))
        );
    }
}
