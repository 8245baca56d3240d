//! Filter, sort and projection semantics over JSON documents.
//!
//! Values order by type class first (missing/null < numbers < strings <
//! objects < arrays < booleans), then within the class. Range operators
//! (`$gt`, `$lt`, ...) only match values of the same class as the operand;
//! `$type` selects by class.

use std::cmp::Ordering;

use docsync_core::types::{Document, ID_FIELD};
use serde_json::{Number, Value};

use crate::error::StoreError;
use crate::model::{SortDirection, SortKey};

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Object(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Bool(_)) => 8,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Total order over optional JSON values; `None` is a missing field.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(Some(lv), Some(rv)));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn same_class(a: Option<&Value>, b: Option<&Value>) -> bool {
    type_rank(a) == type_rank(b)
}

fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    same_class(a, b) && compare_values(a, b) == Ordering::Equal
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Resolve a dotted path (`a.b.c`) inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let Some((head, rest)) = path.split_once('.') else {
        doc.insert(path.to_string(), value);
        return;
    };
    let entry = doc
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Document::new()));
    if !entry.is_object() {
        *entry = Value::Object(Document::new());
    }
    if let Value::Object(inner) = entry {
        set_path(inner, rest, value);
    }
}

/// Remove a dotted path, returning the removed value.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Evaluate a query filter against a document.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => all_clauses(doc, condition)?.iter().all(|m| *m),
            "$or" => all_clauses(doc, condition)?.iter().any(|m| *m),
            "$nor" => !all_clauses(doc, condition)?.iter().any(|m| *m),
            op if op.starts_with('$') => return Err(StoreError::Unsupported(op.to_string())),
            field => field_matches(get_path(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_clauses(doc: &Document, clauses: &Value) -> Result<Vec<bool>, StoreError> {
    let Value::Array(items) = clauses else {
        return Err(StoreError::InvalidQuery(
            "logical operators take an array of filters".into(),
        ));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(sub) => matches(doc, sub),
            _ => Err(StoreError::InvalidQuery(
                "logical operator clause must be a document".into(),
            )),
        })
        .collect()
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> Result<bool, StoreError> {
    let Value::Object(ops) = condition else {
        return Ok(equals(actual, condition));
    };
    if !is_operator_document(condition) {
        return Ok(equals(actual, condition));
    }
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => range(actual, operand, |o| o == Ordering::Greater),
            "$gte" => range(actual, operand, |o| o != Ordering::Less),
            "$lt" => range(actual, operand, |o| o == Ordering::Less),
            "$lte" => range(actual, operand, |o| o != Ordering::Greater),
            "$in" => in_list(actual, operand)?,
            "$type" => type_matches(actual, operand)?,
            "$nin" => !in_list(actual, operand)?,
            "$exists" => {
                let want = operand.as_bool().unwrap_or(true);
                actual.is_some() == want
            }
            other => return Err(StoreError::Unsupported(other.to_string())),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with null-matches-missing and array-contains semantics.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    if expected.is_null() {
        return matches!(actual, None | Some(Value::Null));
    }
    if values_equal(actual, Some(expected)) {
        return true;
    }
    match actual {
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(Some(item), Some(expected)))
        }
        _ => false,
    }
}

fn range(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |value: Option<&Value>| {
        // null bounds only compare equal to null/missing
        same_class(value, Some(operand)) && accept(compare_values(value, Some(operand)))
    };
    match actual {
        Some(Value::Array(items)) if !operand.is_array() => {
            items.iter().any(|item| check(Some(item)))
        }
        _ => check(actual),
    }
}

/// `$type` by alias or list of aliases. Array fields also match on their
/// elements. Aliases of types JSON cannot hold match nothing.
fn type_matches(actual: Option<&Value>, operand: &Value) -> Result<bool, StoreError> {
    let invalid = || StoreError::InvalidQuery("$type takes a type alias or a list of aliases".into());
    let aliases: Vec<&str> = match operand {
        Value::String(alias) => vec![alias.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(invalid))
            .collect::<Result<_, _>>()?,
        _ => return Err(invalid()),
    };
    let Some(value) = actual else {
        return Ok(false);
    };
    Ok(aliases.iter().any(|alias| match value {
        Value::Array(items) => *alias == "array" || items.iter().any(|i| has_type(i, alias)),
        other => has_type(other, alias),
    }))
}

fn has_type(value: &Value, alias: &str) -> bool {
    match value {
        Value::Null => alias == "null",
        Value::Bool(_) => alias == "bool",
        Value::Number(n) => match alias {
            "number" => true,
            "double" => n.is_f64(),
            "int" | "long" => !n.is_f64(),
            _ => false,
        },
        Value::String(_) => alias == "string",
        Value::Object(_) => alias == "object",
        Value::Array(_) => alias == "array",
    }
}

fn in_list(actual: Option<&Value>, operand: &Value) -> Result<bool, StoreError> {
    let Value::Array(candidates) = operand else {
        return Err(StoreError::InvalidQuery("$in/$nin need an array".into()));
    };
    Ok(candidates.iter().any(|c| equals(actual, c)))
}

// ---------------------------------------------------------------------------
// Sort and projection
// ---------------------------------------------------------------------------

/// Compare two documents under a sort specification.
pub fn compare_by_keys(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ord = compare_values(get_path(a, &key.field), get_path(b, &key.field));
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort of `docs` by `sort`.
pub fn sort_documents(docs: &mut [Document], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| compare_by_keys(a, b, sort));
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

/// Apply an inclusion (`{a: 1}`) or exclusion (`{a: 0}`) projection. Keys
/// may be dotted paths. `_id` is kept unless excluded explicitly.
pub fn project(doc: Document, projection: &Document) -> Result<Document, StoreError> {
    let inclusion = projection
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .any(|(_, v)| truthy(v));
    let mixed = inclusion
        && projection
            .iter()
            .any(|(k, v)| k.as_str() != ID_FIELD && !truthy(v));
    if mixed {
        return Err(StoreError::InvalidQuery(
            "projection cannot mix inclusion and exclusion".into(),
        ));
    }
    let keep_id = projection.get(ID_FIELD).map(truthy).unwrap_or(true);

    if !inclusion {
        let mut doc = doc;
        for (path, flag) in projection {
            if !truthy(flag) {
                remove_path(&mut doc, path);
            }
        }
        return Ok(doc);
    }

    let mut projected = Document::new();
    if keep_id {
        if let Some(id) = doc.get(ID_FIELD) {
            projected.insert(ID_FIELD.to_string(), id.clone());
        }
    }
    for (path, flag) in projection {
        if path == ID_FIELD || !truthy(flag) {
            continue;
        }
        if let Some(value) = get_path(&doc, path) {
            set_path(&mut projected, path, value.clone());
        }
    }
    Ok(projected)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn numbers_sort_before_strings() {
        assert_eq!(
            compare_values(Some(&json!(999)), Some(&json!("1"))),
            Ordering::Less
        );
        assert_eq!(compare_values(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(2.5))),
            Ordering::Less
        );
    }

    #[rstest]
    #[case(json!({"_id": {"$gt": "b"}}), json!({"_id": "c"}), true)]
    #[case(json!({"_id": {"$gt": "b"}}), json!({"_id": "b"}), false)]
    #[case(json!({"_id": {"$gt": 5}}), json!({"_id": "zzz"}), false)]
    #[case(json!({"v": {"$gte": 1, "$lt": 3}}), json!({"v": 2}), true)]
    #[case(json!({"v": {"$lte": null}}), json!({}), true)]
    #[case(json!({"v": null}), json!({}), true)]
    #[case(json!({"v": null}), json!({"v": 0}), false)]
    #[case(json!({"doc_hash": {"$exists": false}}), json!({"v": 1}), true)]
    #[case(json!({"doc_hash": {"$ne": "x"}}), json!({}), true)]
    #[case(json!({"tags": "a"}), json!({"tags": ["b", "a"]}), true)]
    #[case(json!({"v": {"$in": [1, 2]}}), json!({"v": 2}), true)]
    #[case(json!({"v": {"$nin": [1, 2]}}), json!({"v": 2}), false)]
    #[case(json!({"a.b": 1}), json!({"a": {"b": 1}}), true)]
    #[case(json!({"v": {"k": 1}}), json!({"v": {"k": 1}}), true)]
    fn filter_cases(#[case] filter: Value, #[case] document: Value, #[case] expected: bool) {
        assert_eq!(matches(&doc(document), &doc(filter)).unwrap(), expected);
    }

    #[test]
    fn logical_operators() {
        let d = doc(json!({"utime": "2024-01-01 00:00:00", "_id": 4}));
        let filter = doc(json!({
            "$or": [
                {"utime": {"$gt": "2024-01-01 00:00:00"}},
                {"utime": "2024-01-01 00:00:00", "_id": {"$gt": 3}}
            ]
        }));
        assert!(matches(&d, &filter).unwrap());
        let filter = doc(json!({"$and": [{"_id": 4}, {"_id": {"$lt": 4}}]}));
        assert!(!matches(&d, &filter).unwrap());
        let filter = doc(json!({"$nor": [{"_id": 5}]}));
        assert!(matches(&d, &filter).unwrap());
    }

    #[test]
    fn unknown_operator_is_unsupported() {
        let err = matches(&doc(json!({"v": 1})), &doc(json!({"v": {"$regex": "x"}})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(op) if op == "$regex"));
    }

    #[test]
    fn sort_is_stable_and_directional() {
        let mut docs = vec![
            doc(json!({"_id": 2, "utime": "b"})),
            doc(json!({"_id": 1, "utime": "b"})),
            doc(json!({"_id": 3})),
            doc(json!({"_id": 0, "utime": "a"})),
        ];
        sort_documents(&mut docs, &[SortKey::asc("utime"), SortKey::asc("_id")]);
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(0), json!(1), json!(2)]);

        sort_documents(&mut docs, &[SortKey::desc("_id")]);
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(2), json!(1), json!(0)]);
    }

    #[test]
    fn inclusion_projection_keeps_id() {
        let projected = project(
            doc(json!({"_id": 1, "a": 1, "b": 2})),
            &doc(json!({"a": 1})),
        )
        .unwrap();
        assert_eq!(Value::Object(projected), json!({"_id": 1, "a": 1}));
    }

    #[test]
    fn exclusion_projection_can_drop_id() {
        let projected = project(
            doc(json!({"_id": 1, "a": 1, "b": 2})),
            &doc(json!({"_id": 0, "b": 0})),
        )
        .unwrap();
        assert_eq!(Value::Object(projected), json!({"a": 1}));
    }

    #[test]
    fn projection_follows_dotted_paths() {
        let source = json!({"_id": 1, "meta": {"rank": 2, "label": "x"}, "b": 3});
        let projected = project(doc(source.clone()), &doc(json!({"meta.rank": 1}))).unwrap();
        assert_eq!(Value::Object(projected), json!({"_id": 1, "meta": {"rank": 2}}));

        let projected = project(doc(source), &doc(json!({"meta.label": 0, "b": 0}))).unwrap();
        assert_eq!(Value::Object(projected), json!({"_id": 1, "meta": {"rank": 2}}));
    }

    #[rstest]
    #[case(json!("a"), json!("string"), true)]
    #[case(json!(1), json!("number"), true)]
    #[case(json!(1.5), json!("int"), false)]
    #[case(json!(["a", 2]), json!("number"), true)]
    #[case(json!([1]), json!("array"), true)]
    #[case(json!({"k": 1}), json!(["string", "object"]), true)]
    #[case(json!(true), json!(["date", "regex"]), false)]
    fn type_selection(#[case] value: Value, #[case] alias: Value, #[case] expected: bool) {
        let d = doc(json!({"v": value}));
        let filter = doc(json!({"v": {"$type": alias}}));
        assert_eq!(matches(&d, &filter).unwrap(), expected);
        let missing = matches(&Document::new(), &filter).unwrap();
        assert!(!missing);
    }

    #[test]
    fn mixed_projection_is_rejected() {
        let err = project(doc(json!({"a": 1})), &doc(json!({"a": 1, "b": 0}))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }
}
