//! Result Truncation
//!
//! Keeps tool results under the sandbox's byte cap. Row arrays are cut and
//! flagged `truncated`; anything else is replaced by a structural summary.
//! Truncation never turns a result into an error.

use serde_json::{json, Map, Value};

/// Number of object keys listed in a structural summary.
const SUMMARY_MAX_KEYS: usize = 20;

/// Serialized size of a value in bytes.
pub fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
}

/// Shrink `value` to at most `max_bytes` serialized bytes.
///
/// Returns the (possibly replaced) value and whether anything was cut.
pub fn truncate_result(value: Value, max_bytes: usize) -> (Value, bool) {
    let original = serialized_len(&value);
    if original <= max_bytes {
        return (value, false);
    }

    match value {
        Value::Object(mut object) if object.get("rows").is_some_and(|r| r.is_array()) => {
            let rows = match object.remove("rows") {
                Some(Value::Array(rows)) => rows,
                _ => Vec::new(),
            };
            let total = rows.len();
            let fitted = fit_rows(rows, max_bytes, |kept| {
                let mut candidate = object.clone();
                mark_rows(&mut candidate, kept, total);
                Value::Object(candidate)
            });
            match fitted {
                Some(result) => (result, true),
                None => (summarize(&Value::Object(object), original, max_bytes), true),
            }
        }
        Value::Array(items) => {
            let total = items.len();
            let fitted = fit_rows(items, max_bytes, |kept| {
                json!({
                    "items": kept,
                    "truncated": true,
                    "total_items": total,
                })
            });
            match fitted {
                Some(result) => (result, true),
                None => (summarize(&json!([]), original, max_bytes), true),
            }
        }
        other => (summarize(&other, original, max_bytes), true),
    }
}

fn mark_rows(object: &mut Map<String, Value>, kept: Vec<Value>, total: usize) {
    let count = kept.len();
    object.insert("rows".to_string(), Value::Array(kept));
    object.insert("row_count".to_string(), json!(count));
    object.insert("truncated".to_string(), Value::Bool(true));
    object.insert("omitted_rows".to_string(), json!(total - count));
}

/// Largest prefix of `rows` whose wrapped form fits, by binary search.
fn fit_rows<F>(rows: Vec<Value>, max_bytes: usize, wrap: F) -> Option<Value>
where
    F: Fn(Vec<Value>) -> Value,
{
    let fits = |n: usize| {
        let candidate = wrap(rows[..n].to_vec());
        (serialized_len(&candidate) <= max_bytes).then_some(candidate)
    };

    let mut best = fits(0)?;
    let (mut lo, mut hi) = (1usize, rows.len());
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        match fits(mid) {
            Some(candidate) => {
                best = candidate;
                lo = mid + 1;
            }
            None => hi = mid - 1,
        }
    }
    Some(best)
}

fn summarize(value: &Value, original_bytes: usize, max_bytes: usize) -> Value {
    let mut summary = json!({
        "truncated": true,
        "original_bytes": original_bytes,
        "shape": shape(value),
    });

    // Leave room for the envelope around the preview.
    let budget = max_bytes.saturating_sub(serialized_len(&summary) + 32) / 2;
    if budget > 0 {
        let text = value.to_string();
        let preview = prefix_at_char_boundary(&text, budget);
        if !preview.is_empty() {
            summary["preview"] = Value::String(preview.to_string());
        }
    }
    summary
}

fn shape(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let keys: Vec<&String> = object.keys().take(SUMMARY_MAX_KEYS).collect();
            json!({"type": "object", "keys": keys, "key_count": object.len()})
        }
        Value::Array(items) => json!({"type": "array", "length": items.len()}),
        Value::String(s) => json!({"type": "string", "length": s.len()}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Null => json!({"type": "null"}),
    }
}

fn prefix_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
