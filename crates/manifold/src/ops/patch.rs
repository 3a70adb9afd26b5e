//! Applying patch operations to a document tree.

use serde_yaml::{Mapping, Value};

use super::error::{ApplyError, PatchError};
use super::pointer::{Pointer, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOperation {
    Add { path: Pointer, value: Value },
    Replace { path: Pointer, value: Value },
    Remove { path: Pointer },
}

impl PatchOperation {
    pub fn verb(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Replace { .. } => "replace",
            PatchOperation::Remove { .. } => "remove",
        }
    }

    pub fn path(&self) -> &Pointer {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Add,
    Replace,
    Remove,
}

/// Applies `ops` in order to a copy of `base`.
///
/// `base` is never modified; on error no partially patched document escapes.
pub fn apply(base: &Value, ops: &[PatchOperation]) -> Result<Value, ApplyError> {
    let mut doc = base.clone();
    for (index, op) in ops.iter().enumerate() {
        apply_operation(&mut doc, op).map_err(|source| ApplyError {
            index,
            verb: op.verb(),
            path: op.path().to_string(),
            source,
        })?;
    }
    Ok(doc)
}

/// Applies a single operation in place.
pub fn apply_operation(doc: &mut Value, op: &PatchOperation) -> Result<(), PatchError> {
    let (mode, value) = match op {
        PatchOperation::Add { value, .. } => (Mode::Add, Some(value)),
        PatchOperation::Replace { value, .. } => (Mode::Replace, Some(value)),
        PatchOperation::Remove { .. } => (Mode::Remove, None),
    };
    let tokens = op.path().tokens();

    let Some((last, parents)) = tokens.split_last() else {
        return match value {
            Some(value) => {
                *doc = value.clone();
                Ok(())
            }
            None => Err(PatchError::InvalidOperations(
                "cannot remove the document root".to_string(),
            )),
        };
    };

    let mut node = doc;
    let mut optional = false;
    for (i, token) in parents.iter().enumerate() {
        optional |= token.is_optional();
        let at = Location { tokens, index: i };
        match step(node, token, &tokens[i + 1], mode, optional, &at)? {
            Some(child) => node = child,
            None => return Ok(()),
        }
    }

    optional |= last.is_optional();
    let at = Location {
        tokens,
        index: parents.len(),
    };
    finish(node, last, mode, value, optional, &at)
}

/// Position of a token within its pointer, for error reporting.
struct Location<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl Location<'_> {
    fn path(&self) -> String {
        self.tokens[..=self.index]
            .iter()
            .map(|t| format!("/{}", t))
            .collect()
    }

    fn token(&self) -> String {
        self.tokens[self.index].to_string()
    }

    fn not_found(&self) -> PatchError {
        PatchError::PathNotFound {
            path: self.path(),
            token: self.token(),
        }
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> PatchError {
        PatchError::TypeMismatch {
            path: self.path(),
            token: self.token(),
            expected,
            found: kind_name(found),
        }
    }
}

/// Descends one intermediate token. `Ok(None)` means an optional segment was
/// missing during a remove, which makes the whole operation a no-op.
fn step<'a>(
    node: &'a mut Value,
    token: &Token,
    next: &Token,
    mode: Mode,
    optional: bool,
    at: &Location<'_>,
) -> Result<Option<&'a mut Value>, PatchError> {
    match token {
        Token::Key { name, .. } => {
            let map = as_mapping(node, at)?;
            if !map.contains_key(name.as_str()) {
                if !optional {
                    return Err(at.not_found());
                }
                if mode == Mode::Remove {
                    return Ok(None);
                }
                map.insert(Value::String(name.clone()), empty_container(next));
            }
            match map.get_mut(name.as_str()) {
                Some(child) => Ok(Some(child)),
                None => Err(at.not_found()),
            }
        }
        Token::Index(index) => {
            let seq = as_sequence(node, at)?;
            match seq.get_mut(*index) {
                Some(child) => Ok(Some(child)),
                None if optional && mode == Mode::Remove => Ok(None),
                None => Err(at.not_found()),
            }
        }
        Token::Append => {
            let seq = as_sequence(node, at)?;
            if mode == Mode::Remove {
                return if optional {
                    Ok(None)
                } else {
                    Err(at.not_found())
                };
            }
            seq.push(empty_container(next));
            match seq.last_mut() {
                Some(child) => Ok(Some(child)),
                None => Err(at.not_found()),
            }
        }
        Token::Matcher { field, value, .. } => {
            let seq = as_sequence(node, at)?;
            let position = match seq.iter().position(|item| matches_field(item, field, value)) {
                Some(position) => position,
                None if !optional => return Err(at.not_found()),
                None if mode == Mode::Remove => return Ok(None),
                None => {
                    seq.push(matcher_element(field, value));
                    seq.len() - 1
                }
            };
            Ok(Some(&mut seq[position]))
        }
    }
}

/// Applies the operation at the final token.
fn finish(
    node: &mut Value,
    token: &Token,
    mode: Mode,
    value: Option<&Value>,
    optional: bool,
    at: &Location<'_>,
) -> Result<(), PatchError> {
    match token {
        Token::Key { name, .. } => {
            let map = as_mapping(node, at)?;
            match value {
                Some(value) => {
                    map.insert(Value::String(name.clone()), value.clone());
                    Ok(())
                }
                None => match map.shift_remove(name.as_str()) {
                    Some(_) => Ok(()),
                    None if optional => Ok(()),
                    None => Err(at.not_found()),
                },
            }
        }
        Token::Index(index) => {
            let index = *index;
            let seq = as_sequence(node, at)?;
            match (mode, value) {
                (Mode::Replace, Some(value)) if index < seq.len() => {
                    seq[index] = value.clone();
                    Ok(())
                }
                (Mode::Add, Some(value)) if index <= seq.len() => {
                    seq.insert(index, value.clone());
                    Ok(())
                }
                (Mode::Remove, _) if index < seq.len() => {
                    seq.remove(index);
                    Ok(())
                }
                (Mode::Remove, _) if optional => Ok(()),
                _ => Err(at.not_found()),
            }
        }
        Token::Append => {
            let seq = as_sequence(node, at)?;
            match value {
                Some(value) => {
                    seq.push(value.clone());
                    Ok(())
                }
                None if optional => Ok(()),
                None => Err(at.not_found()),
            }
        }
        Token::Matcher {
            field,
            value: literal,
            ..
        } => {
            let seq = as_sequence(node, at)?;
            let position = seq
                .iter()
                .position(|item| matches_field(item, field, literal));
            match (position, value) {
                (Some(position), Some(value)) => {
                    seq[position] = value.clone();
                    Ok(())
                }
                (Some(position), None) => {
                    seq.remove(position);
                    Ok(())
                }
                (None, _) if !optional => Err(at.not_found()),
                (None, Some(value)) => {
                    seq.push(value.clone());
                    Ok(())
                }
                (None, None) => Ok(()),
            }
        }
    }
}

fn as_mapping<'a>(node: &'a mut Value, at: &Location<'_>) -> Result<&'a mut Mapping, PatchError> {
    match node {
        Value::Mapping(map) => Ok(map),
        other => Err(at.mismatch("map", other)),
    }
}

fn as_sequence<'a>(
    node: &'a mut Value,
    at: &Location<'_>,
) -> Result<&'a mut Vec<Value>, PatchError> {
    match node {
        Value::Sequence(seq) => Ok(seq),
        other => Err(at.mismatch("array", other)),
    }
}

/// Container created for a missing optional segment, shaped for the token
/// that will address into it.
fn empty_container(next: &Token) -> Value {
    match next {
        Token::Key { .. } => Value::Mapping(Mapping::new()),
        Token::Index(_) | Token::Append | Token::Matcher { .. } => Value::Sequence(Vec::new()),
    }
}

fn matcher_element(field: &str, literal: &str) -> Value {
    let mut map = Mapping::new();
    map.insert(
        Value::String(field.to_string()),
        Value::String(literal.to_string()),
    );
    Value::Mapping(map)
}

/// Compares a matcher literal against scalar field values.
fn matches_field(item: &Value, field: &str, literal: &str) -> bool {
    let Some(candidate) = item.as_mapping().and_then(|map| map.get(field)) else {
        return false;
    };
    match candidate {
        Value::String(s) => s == literal,
        Value::Number(n) => n.to_string() == literal,
        Value::Bool(b) => b.to_string() == literal,
        _ => false,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged value",
    }
}
