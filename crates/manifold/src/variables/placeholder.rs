//! Finding and rewriting `((name))` / `((name.field))` placeholders.

use regex::{Captures, Regex};
use serde_yaml::Value;
use std::sync::LazyLock;

static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\(([A-Za-z0-9_\-/]+)(?:\.([A-Za-z0-9_\-]+))?\)\)").unwrap()
});

/// Anything shaped like a placeholder, well-formed or not.
static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\(([^()]*)\)\)").unwrap());

/// A parsed placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    pub name: String,
    pub field: Option<String>,
}

impl Placeholder {
    fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            name: caps[1].to_string(),
            field: caps.get(2).map(|m| m.as_str().to_string()),
        }
    }
}

/// A placeholder together with the document path it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub placeholder: Placeholder,
    pub location: String,
}

/// Returns the placeholders in `text`, in order.
pub fn scan(text: &str) -> Vec<Placeholder> {
    RE_PLACEHOLDER
        .captures_iter(text)
        .map(|caps| Placeholder::from_captures(&caps))
        .collect()
}

/// Returns every `((...))` token in `text`, including ones [`scan`] does not
/// accept. The name is the trimmed token body.
pub fn scan_tokens(text: &str) -> Vec<Placeholder> {
    RE_TOKEN
        .captures_iter(text)
        .map(|caps| Placeholder {
            name: caps[1].trim().to_string(),
            field: None,
        })
        .collect()
}

/// Collects every placeholder in string values of `doc`, in document order.
/// The top-level key `skip`, if given, is not descended into.
pub fn collect(doc: &Value, skip: Option<&str>) -> Vec<Occurrence> {
    collect_with(doc, skip, scan)
}

/// Like [`collect`], but reports every token [`scan_tokens`] finds.
pub fn collect_tokens(doc: &Value, skip: Option<&str>) -> Vec<Occurrence> {
    collect_with(doc, skip, scan_tokens)
}

fn collect_with(
    doc: &Value,
    skip: Option<&str>,
    scanner: fn(&str) -> Vec<Placeholder>,
) -> Vec<Occurrence> {
    let mut found = Vec::new();
    match (doc, skip) {
        (Value::Mapping(map), Some(skip)) => {
            for (key, value) in map {
                let key = key_segment(key);
                if key == skip {
                    continue;
                }
                walk(value, &format!("/{}", key), scanner, &mut found);
            }
        }
        _ => walk(doc, "", scanner, &mut found),
    }
    found
}

fn walk(
    node: &Value,
    path: &str,
    scanner: fn(&str) -> Vec<Placeholder>,
    found: &mut Vec<Occurrence>,
) {
    match node {
        Value::String(s) => {
            let location = if path.is_empty() { "/" } else { path };
            for placeholder in scanner(s) {
                found.push(Occurrence {
                    placeholder,
                    location: location.to_string(),
                });
            }
        }
        Value::Sequence(seq) => {
            for (i, item) in seq.iter().enumerate() {
                walk(item, &format!("{}/{}", path, i), scanner, found);
            }
        }
        Value::Mapping(map) => {
            for (key, value) in map {
                walk(value, &format!("{}/{}", path, key_segment(key)), scanner, found);
            }
        }
        Value::Tagged(tagged) => walk(&tagged.value, path, scanner, found),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn key_segment(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Rewrites placeholders in string values of `doc`.
///
/// `lookup` returns the replacement for a placeholder, or `None` to leave it
/// in place. A string that is exactly one placeholder becomes the returned
/// value; embedded placeholders are replaced textually. The top-level key
/// `skip`, if given, is left untouched.
pub fn rewrite<E, F>(doc: &mut Value, skip: Option<&str>, lookup: &mut F) -> Result<(), E>
where
    F: FnMut(&Placeholder) -> Result<Option<String>, E>,
{
    match (doc, skip) {
        (Value::Mapping(map), Some(skip)) => {
            for (key, value) in map.iter_mut() {
                if key.as_str() == Some(skip) {
                    continue;
                }
                rewrite_node(value, lookup)?;
            }
            Ok(())
        }
        (doc, _) => rewrite_node(doc, lookup),
    }
}

fn rewrite_node<E, F>(node: &mut Value, lookup: &mut F) -> Result<(), E>
where
    F: FnMut(&Placeholder) -> Result<Option<String>, E>,
{
    match node {
        Value::String(s) => {
            if let Some(rewritten) = rewrite_string(s, lookup)? {
                *s = rewritten;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                rewrite_node(item, lookup)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                rewrite_node(value, lookup)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => rewrite_node(&mut tagged.value, lookup),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

/// Returns the rewritten string, or `None` when nothing changed.
fn rewrite_string<E, F>(s: &str, lookup: &mut F) -> Result<Option<String>, E>
where
    F: FnMut(&Placeholder) -> Result<Option<String>, E>,
{
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    let mut changed = false;

    for caps in RE_PLACEHOLDER.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if let Some(value) = lookup(&Placeholder::from_captures(&caps))? {
            out.push_str(&s[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
            changed = true;
        }
    }

    if !changed {
        return Ok(None);
    }
    out.push_str(&s[last..]);
    Ok(Some(out))
}
