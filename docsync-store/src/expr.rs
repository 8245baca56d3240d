//! Aggregation-expression evaluation for pipeline updates.
//!
//! Supports the subset used by conditional upserts: field paths (`"$a.b"`),
//! `$literal`, `$eq`, `$ne`, `$cond`, `$ifNull`, and nested documents and
//! arrays of expressions. Stages: `$set` / `$addFields` and `$unset`.

use docsync_core::types::Document;
use serde_json::Value;

use crate::error::StoreError;
use crate::model::UpdatePipeline;
use crate::query::{compare_values, get_path};

/// Evaluate `expr` against `doc`. `Ok(None)` means "missing".
pub fn evaluate(expr: &Value, doc: &Document) -> Result<Option<Value>, StoreError> {
    match expr {
        Value::String(s) if s.starts_with("$$") => {
            Err(StoreError::Unsupported(format!("variable {s}")))
        }
        Value::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).cloned()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, doc)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((op, arg)) = map.iter().next() {
                    if op.starts_with('$') {
                        return operator(op, arg, doc);
                    }
                }
            }
            let mut out = Document::new();
            for (key, value) in map {
                if let Some(v) = evaluate(value, doc)? {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

fn operator(op: &str, arg: &Value, doc: &Document) -> Result<Option<Value>, StoreError> {
    match op {
        "$literal" => Ok(Some(arg.clone())),
        "$eq" | "$ne" => {
            let [left, right] = two_args(op, arg)?;
            let l = evaluate(left, doc)?;
            let r = evaluate(right, doc)?;
            let equal = compare_values(l.as_ref(), r.as_ref()).is_eq()
                && same_presence_class(l.as_ref(), r.as_ref());
            Ok(Some(Value::Bool(if op == "$eq" { equal } else { !equal })))
        }
        "$cond" => {
            let (condition, then, otherwise) = cond_args(arg)?;
            let picked = if truthy(evaluate(condition, doc)?.as_ref()) {
                then
            } else {
                otherwise
            };
            evaluate(picked, doc)
        }
        "$ifNull" => {
            let Value::Array(items) = arg else {
                return Err(StoreError::InvalidQuery("$ifNull takes an array".into()));
            };
            let Some((fallback, candidates)) = items.split_last() else {
                return Err(StoreError::InvalidQuery("$ifNull needs arguments".into()));
            };
            for candidate in candidates {
                match evaluate(candidate, doc)? {
                    Some(Value::Null) | None => continue,
                    found => return Ok(found),
                }
            }
            evaluate(fallback, doc)
        }
        other => Err(StoreError::Unsupported(other.to_string())),
    }
}

// Missing and null compare equal under `compare_values`; `$eq` keeps them apart
// only when both operands are present.
fn same_presence_class(l: Option<&Value>, r: Option<&Value>) -> bool {
    match (l, r) {
        (None, None) => true,
        (None, Some(v)) | (Some(v), None) => !v.is_null(),
        _ => true,
    }
}

fn two_args<'a>(op: &str, arg: &'a Value) -> Result<[&'a Value; 2], StoreError> {
    match arg {
        Value::Array(items) if items.len() == 2 => Ok([&items[0], &items[1]]),
        _ => Err(StoreError::InvalidQuery(format!("{op} takes two arguments"))),
    }
}

fn cond_args(arg: &Value) -> Result<(&Value, &Value, &Value), StoreError> {
    match arg {
        Value::Array(items) if items.len() == 3 => Ok((&items[0], &items[1], &items[2])),
        Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
            (Some(i), Some(t), Some(e)) => Ok((i, t, e)),
            _ => Err(StoreError::InvalidQuery(
                "$cond needs if, then and else".into(),
            )),
        },
        _ => Err(StoreError::InvalidQuery("$cond takes three arguments".into())),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(_) => true,
    }
}

/// Apply an update pipeline to `doc`, returning the new document.
///
/// Each `$set` stage evaluates every expression against the stage's input,
/// so fields assigned in the same stage never observe each other.
pub fn apply_pipeline(doc: &Document, pipeline: &UpdatePipeline) -> Result<Document, StoreError> {
    let mut current = doc.clone();
    for stage in &pipeline.0 {
        if stage.len() != 1 {
            return Err(StoreError::InvalidQuery(
                "pipeline stage must have exactly one operator".into(),
            ));
        }
        for (op, fields_arg) in stage {
            current = match op.as_str() {
                "$set" | "$addFields" => set_stage(&current, fields_arg)?,
                "$unset" => unset_stage(current, fields_arg)?,
                other => return Err(StoreError::Unsupported(other.to_string())),
            };
        }
    }
    Ok(current)
}

fn set_stage(input: &Document, fields_arg: &Value) -> Result<Document, StoreError> {
    let Value::Object(fields) = fields_arg else {
        return Err(StoreError::InvalidQuery("$set takes a document".into()));
    };
    let mut output = input.clone();
    for (field, expr) in fields {
        if field.contains('.') {
            return Err(StoreError::Unsupported(format!("dotted $set path {field}")));
        }
        match evaluate(expr, input)? {
            Some(value) => {
                output.insert(field.clone(), value);
            }
            None => {
                output.remove(field);
            }
        }
    }
    Ok(output)
}

fn unset_stage(mut doc: Document, fields_arg: &Value) -> Result<Document, StoreError> {
    match fields_arg {
        Value::String(field) => {
            doc.remove(field);
        }
        Value::Array(fields) => {
            for field in fields {
                let Value::String(name) = field else {
                    return Err(StoreError::InvalidQuery(
                        "$unset takes field names".into(),
                    ));
                };
                doc.remove(name);
            }
        }
        _ => {
            return Err(StoreError::InvalidQuery(
                "$unset takes a field name or a list".into(),
            ))
        }
    }
    Ok(doc)
}
