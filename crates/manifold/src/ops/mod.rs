//! Ops files: ordered patch operations overlaid onto a manifest.
//!
//! An ops file is a YAML sequence of `{type, path, value?}` entries where
//! `type` is `add`, `replace` or `remove`.

pub mod error;
pub mod patch;
pub mod pointer;

use serde_yaml::Value;

pub use error::{ApplyError, PatchError};
pub use patch::{apply, apply_operation, PatchOperation};
pub use pointer::{Pointer, Token};

/// Parses an ops document. An empty document yields no operations.
pub fn parse_ops(bytes: &[u8]) -> Result<Vec<PatchOperation>, PatchError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let doc: Value = serde_yaml::from_slice(bytes)
        .map_err(|e| PatchError::InvalidOperations(format!("not valid YAML: {}", e)))?;

    let entries = match doc {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(entries) => entries,
        _ => {
            return Err(PatchError::InvalidOperations(
                "expected a list of operations".to_string(),
            ))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_operation(index, entry))
        .collect()
}

fn parse_operation(index: usize, entry: Value) -> Result<PatchOperation, PatchError> {
    let invalid = |message: String| {
        PatchError::InvalidOperations(format!("operation #{}: {}", index, message))
    };

    let Value::Mapping(mut map) = entry else {
        return Err(invalid("expected a map".to_string()));
    };

    let verb = match map.get("type") {
        Some(Value::String(verb)) => verb.clone(),
        Some(_) => return Err(invalid("'type' must be a string".to_string())),
        None => return Err(invalid("missing 'type'".to_string())),
    };
    let path = match map.get("path") {
        Some(Value::String(path)) => Pointer::parse(path)?,
        Some(_) => return Err(invalid("'path' must be a string".to_string())),
        None => return Err(invalid("missing 'path'".to_string())),
    };
    let value = map.shift_remove("value");

    match (verb.as_str(), value) {
        ("add", Some(value)) => Ok(PatchOperation::Add { path, value }),
        ("replace", Some(value)) => Ok(PatchOperation::Replace { path, value }),
        ("add" | "replace", None) => Err(invalid(format!("'{}' requires a value", verb))),
        ("remove", None) => Ok(PatchOperation::Remove { path }),
        ("remove", Some(_)) => Err(invalid("'remove' does not take a value".to_string())),
        (other, _) => Err(invalid(format!("unknown type '{}'", other))),
    }
}
