//! Schema skeleton synthesizer.
//!
//! Builds a minimal, shape-valid instance for a JSON Schema (Draft 2020-12).
//! The skeleton is embedded in coercion instructions to steer the generator
//! toward the right shape; it is never the final answer. Purely structural:
//! no semantics are inspected.
//!
//! Rules:
//! - Objects include every declared property (required or not) with a
//!   recursively minimal value.
//! - Arrays are empty unless `minItems > 0`, in which case exactly one item
//!   is synthesized.
//! - `const` > `default` > first `enum` entry > first `examples` entry.
//! - `$ref` resolves against `$defs`/`definitions` in the root schema;
//!   external refs yield an empty object.
//! - `allOf` merges by union; `anyOf`/`oneOf` take the first viable branch.
//! - Recursion is depth-bounded with a visited set keyed by schema node
//!   identity, so cyclic `$ref` graphs terminate with an empty container.

use serde_json::{json, Map, Value};
use std::collections::HashSet;

const MAX_DEPTH: usize = 40;

/// Build a minimal shape-valid instance for `schema`.
pub fn json_skeleton(schema: &Value) -> Value {
    let mut on_stack = HashSet::new();
    build(schema, schema, 0, &mut on_stack)
}

/// Build a skeleton and render it as compact JSON for prompt embedding.
pub fn json_skeleton_string(schema: &Value) -> String {
    json_skeleton(schema).to_string()
}

fn build(root: &Value, schema: &Value, depth: usize, on_stack: &mut HashSet<usize>) -> Value {
    if depth > MAX_DEPTH {
        return json!({});
    }

    let node_id = schema as *const Value as usize;
    if !on_stack.insert(node_id) {
        // Cycle: break with an empty container of the declared type.
        return match schema.get("type").and_then(Value::as_str) {
            Some("object") => json!({}),
            Some("array") => json!([]),
            _ => Value::Null,
        };
    }
    let value = build_inner(root, schema, depth, on_stack);
    on_stack.remove(&node_id);
    value
}

fn build_inner(root: &Value, schema: &Value, depth: usize, on_stack: &mut HashSet<usize>) -> Value {
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        return match resolve_ref(root, reference) {
            Some(target) => build(root, target, depth + 1, on_stack),
            None => json!({}),
        };
    }

    if let Some(branches) = schema.get("allOf").and_then(Value::as_array) {
        let mut merged = Map::new();
        for branch in branches {
            if let Value::Object(fields) = build(root, branch, depth + 1, on_stack) {
                merge_objects(&mut merged, fields);
            }
        }
        if !merged.is_empty() {
            return Value::Object(merged);
        }
        // Not object-shaped: merge the schemas themselves and retry.
        let mut combined = Map::new();
        for branch in branches {
            if let Value::Object(fields) = branch {
                merge_objects(&mut combined, fields.clone());
            }
        }
        return build_inner(root, &Value::Object(combined), depth + 1, on_stack);
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(branches) = schema.get(key).and_then(Value::as_array) {
            if let Some(first) = branches.first() {
                for branch in branches {
                    let candidate = build(root, branch, depth + 1, on_stack);
                    if !candidate.is_null() {
                        return candidate;
                    }
                }
                return build(root, first, depth + 1, on_stack);
            }
        }
    }

    if let Some(constant) = schema.get("const") {
        return constant.clone();
    }
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return first.clone();
    }
    if let Some(first) = schema
        .get("examples")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
    {
        return first.clone();
    }

    let declared = declared_type(schema);

    if declared == Some("object") || schema.get("properties").is_some() || schema.get("required").is_some()
    {
        let mut result = Map::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                result.insert(name.clone(), build(root, property, depth + 1, on_stack));
            }
        }
        // additionalProperties as a schema: show one representative key.
        if let Some(additional) = schema.get("additionalProperties") {
            if additional.is_object() {
                result.insert(
                    "additional".to_string(),
                    build(root, additional, depth + 1, on_stack),
                );
            }
        }
        return Value::Object(result);
    }

    if declared == Some("array") || schema.get("items").is_some() {
        let min_items = schema
            .get("minItems")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if min_items == 0 {
            return json!([]);
        }
        let items = schema.get("items").cloned().unwrap_or_else(|| json!({}));
        return json!([build(root, &items, depth + 1, on_stack)]);
    }

    match declared {
        Some("string") => json!(""),
        Some("integer") | Some("number") => json!(0),
        Some("boolean") => json!(false),
        Some("null") => Value::Null,
        _ => json!({}),
    }
}

/// First concrete type from `type`, which may be a string or a list.
fn declared_type(schema: &Value) -> Option<&str> {
    const CONCRETE: [&str; 7] = [
        "object", "array", "string", "number", "integer", "boolean", "null",
    ];
    match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| CONCRETE.contains(t))
            .or_else(|| types.first().and_then(Value::as_str)),
        _ => None,
    }
}

/// Resolve an internal `#/...` reference against the root schema.
fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

/// Deep-merge `incoming` into `target`; on conflict, `incoming` wins.
fn merge_objects(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(new)) => merge_objects(existing, new),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
