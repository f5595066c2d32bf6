//! Chart values: merging, `key=value` overrides and path lookup.

use serde_yaml::{Mapping, Value};

use super::{RenderError, RenderResult};

/// Parse a values document; an empty document yields an empty mapping.
pub(crate) fn parse(text: &str) -> RenderResult<Value> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        v @ Value::Mapping(_) => Ok(v),
        _ => Err(RenderError::Values(
            "values document must be a mapping".to_string(),
        )),
    }
}

/// Merge `src` into `dest`. Mappings merge key by key; anything else in
/// `src` replaces what `dest` had.
pub(crate) fn merge(dest: &mut Value, src: Value) {
    match (dest, src) {
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (d, s) => *d = s,
    }
}

/// Apply one `a.b.c=value` assignment.
pub(crate) fn apply_override(values: &mut Value, assignment: &str) -> RenderResult<()> {
    let (path, raw) = assignment
        .split_once('=')
        .ok_or_else(|| RenderError::Values(format!("{assignment:?} is not key=value")))?;
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RenderError::Values(format!("bad key {path:?}")));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| RenderError::Values(format!("bad key {path:?}")))?;
    let mut node = values;
    for segment in parents {
        node = as_mapping(node)?
            .entry(Value::String(segment.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    as_mapping(node)?.insert(Value::String(last.to_string()), scalar(raw));
    Ok(())
}

/// View `node` as a mapping, replacing a scalar or sequence with an empty one.
fn as_mapping(node: &mut Value) -> RenderResult<&mut Mapping> {
    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    node.as_mapping_mut()
        .ok_or_else(|| RenderError::Values("expected a mapping".to_string()))
}

fn scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

/// Look up a dotted path.
pub(crate) fn lookup<'a>(values: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(values, |node, segment| node.as_mapping()?.get(segment))
}

/// Text form of a scalar value; `None` for mappings and sequences.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
