//! Content fingerprints: SHA-1 over a canonical JSON rendering.
//!
//! The rendering sorts object keys at every depth, indents by four spaces,
//! separates items with `,` and keys with `": "`, and escapes every
//! non-ASCII character as `\uXXXX`. Floats use the shortest round-trip
//! digits, switching to exponent form below `1e-4` and from `1e16` up.
//! Stored `doc_hash` values written by earlier tooling used the same layout,
//! so equal content keeps equal hashes across both.

use std::io;

use docsync_core::types::{is_reserved_field, Document, Fingerprint};
use serde::ser::{Serialize, Serializer};
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::error::SyncError;

/// Which business fields participate in the fingerprint.
///
/// `_id` and the bookkeeping fields never do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl FieldSelection {
    pub fn includes(&self, field: &str) -> bool {
        if is_reserved_field(field) {
            return false;
        }
        match self {
            FieldSelection::All => true,
            FieldSelection::Only(fields) => fields.iter().any(|f| f == field),
        }
    }
}

/// Fingerprint of `record` restricted to `selection`.
pub fn fingerprint(record: &Document, selection: &FieldSelection) -> Fingerprint {
    let fields = SortedFields::new(record.iter().filter(|(k, _)| selection.includes(k)));
    let blob = render(&fields);
    let digest: [u8; 20] = Sha1::digest(&blob).into();
    Fingerprint::from(digest)
}

/// Fingerprint a batch on the blocking pool.
///
/// Returns the records unchanged alongside one fingerprint per record.
pub async fn fingerprint_batch(
    records: Vec<Document>,
    selection: FieldSelection,
) -> Result<(Vec<Document>, Vec<Fingerprint>), SyncError> {
    tokio::task::spawn_blocking(move || {
        let hashes = records
            .iter()
            .map(|record| fingerprint(record, &selection))
            .collect();
        (records, hashes)
    })
    .await
    .map_err(|e| SyncError::Hashing(e.to_string()))
}

/// Canonical rendering of `value` used as fingerprint input.
pub fn canonical_json(value: &Value) -> String {
    String::from_utf8_lossy(&render(&Canonical(value))).into_owned()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

fn render<T: Serialize>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter::new());
    // writes go to memory and every key is a string, so this cannot fail
    let _ = value.serialize(&mut serializer);
    out
}

/// A value whose objects serialize with sorted keys at every depth.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            Value::Object(map) => SortedFields::new(map.iter()).serialize(serializer),
            scalar => scalar.serialize(serializer),
        }
    }
}

struct SortedFields<'a>(Vec<(&'a String, &'a Value)>);

impl<'a> SortedFields<'a> {
    fn new(fields: impl Iterator<Item = (&'a String, &'a Value)>) -> Self {
        let mut fields: Vec<_> = fields.collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        Self(fields)
    }
}

impl Serialize for SortedFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, Canonical(v))))
    }
}

/// Four-space pretty printing with ASCII-only strings and Python float text.
struct CanonicalFormatter {
    pretty: PrettyFormatter<'static>,
}

impl CanonicalFormatter {
    fn new() -> Self {
        Self {
            pretty: PrettyFormatter::with_indent(b"    "),
        }
    }
}

impl Formatter for CanonicalFormatter {
    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(float_repr(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if fragment.bytes().all(|b| (b' '..=b'~').contains(&b)) {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }
}

/// Shortest round-trip float text, fixed notation for exponents in
/// `-4..16`, otherwise `d.ddde±XX`.
fn float_repr(f: f64) -> String {
    let sci = format!("{f:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if (-4..16).contains(&exponent) {
        if exponent < 0 {
            let zeros = "0".repeat((-exponent - 1) as usize);
            return format!("{sign}0.{zeros}{digits}");
        }
        let int_len = exponent as usize + 1;
        if digits.len() <= int_len {
            let pad = "0".repeat(int_len - digits.len());
            return format!("{sign}{digits}{pad}.0");
        }
        let (int_part, frac) = digits.split_at(int_len);
        return format!("{sign}{int_part}.{frac}");
    }

    let (lead, rest) = digits.split_at(1);
    let exp_sign = if exponent < 0 { '-' } else { '+' };
    let body = if rest.is_empty() {
        lead.to_string()
    } else {
        format!("{lead}.{rest}")
    };
    format!("{sign}{body}e{exp_sign}{:02}", exponent.abs())
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
    fn known_digests() {
        let all = FieldSelection::All;
        assert_eq!(
            fingerprint(&doc(json!({"name": "Ann", "age": 30})), &all).as_str(),
            "0565a99016a3d203308bf053047b399b4df18794"
        );
        assert_eq!(
            fingerprint(&Document::new(), &all).as_str(),
            "bf21a9e8fbc5a3846fb05b4fa0859e0917b2202f"
        );
        assert_eq!(
            fingerprint(&doc(json!({"_id": "a", "v": 1})), &all).as_str(),
            "e4bf3c82af05acd11b53f6b137cb116680bd3bc2"
        );
    }

    #[test]
    fn canonical_layout_of_nested_values() {
        let value = json!({
            "b": [1, {"z": null, "a": true}],
            "a": "h\u{e9}llo \u{1F600}",
            "c": 1.5,
            "d": 1e16,
            "e": 1.5e-7,
            "f": [],
            "g": {},
            "h": "tab\there\u{1}",
            "i": 5.0,
            "j": 123456.789
        });
        let expected = r#"{
    "a": "h\u00e9llo \ud83d\ude00",
    "b": [
        1,
        {
            "a": true,
            "z": null
        }
    ],
    "c": 1.5,
    "d": 1e+16,
    "e": 1.5e-07,
    "f": [],
    "g": {},
    "h": "tab\there\u0001",
    "i": 5.0,
    "j": 123456.789
}"#;
        assert_eq!(canonical_json(&value), expected);
        assert_eq!(
            fingerprint(&doc(value), &FieldSelection::All).as_str(),
            "2d7debb4f536f63d84ad8ab5d160e2c6468c5b6e"
        );
    }

    #[test]
    fn insertion_order_does_not_change_the_rendering() {
        let forward: Document = [("b", json!(1)), ("a", json!({"y": 2, "x": 3}))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut backward = Document::new();
        backward.insert("a".into(), json!({"x": 3, "y": 2}));
        backward.insert("b".into(), json!(1));
        assert_ne!(
            forward.keys().collect::<Vec<_>>(),
            backward.keys().collect::<Vec<_>>()
        );
        assert_eq!(
            canonical_json(&Value::Object(forward.clone())),
            canonical_json(&Value::Object(backward.clone()))
        );
        assert_eq!(
            fingerprint(&forward, &FieldSelection::All),
            fingerprint(&backward, &FieldSelection::All)
        );
    }

    #[test]
    fn delete_character_is_escaped() {
        assert_eq!(canonical_json(&json!("a\u{7f}\"b")), "\"a\\u007f\\\"b\"");
    }

    #[rstest]
    #[case(0.0, "0.0")]
    #[case(-2.5, "-2.5")]
    #[case(0.0001, "0.0001")]
    #[case(0.00001, "1e-05")]
    #[case(1e15, "1000000000000000.0")]
    #[case(1.25e22, "1.25e+22")]
    #[case(-3e-9, "-3e-09")]
    fn float_rendering(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(float_repr(value), expected);
    }

    #[test]
    fn bookkeeping_fields_are_ignored() {
        let plain = doc(json!({"v": 1}));
        let tracked = doc(json!({
            "_id": "x",
            "v": 1,
            "doc_hash": "0000000000000000000000000000000000000000",
            "utime": "2024-01-01 00:00:00",
            "ctime": "2023-01-01 00:00:00"
        }));
        assert_eq!(
            fingerprint(&plain, &FieldSelection::All),
            fingerprint(&tracked, &FieldSelection::All)
        );
    }

    #[test]
    fn only_selection_limits_fields() {
        let selection = FieldSelection::Only(vec!["v".into(), "_id".into()]);
        let a = doc(json!({"_id": 1, "v": 1, "noise": "a"}));
        let b = doc(json!({"_id": 2, "v": 1, "noise": "b"}));
        assert_eq!(fingerprint(&a, &selection), fingerprint(&b, &selection));
        assert!(!selection.includes("_id"));
    }

    #[tokio::test]
    async fn batch_hashing_keeps_order() {
        let records = vec![doc(json!({"v": 1})), doc(json!({"v": 99}))];
        let (records, hashes) = fingerprint_batch(records, FieldSelection::All)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(hashes[0].as_str(), "e4bf3c82af05acd11b53f6b137cb116680bd3bc2");
        assert_eq!(hashes[1].as_str(), "4256528c905a541d0585f52f3f170d3312fec95d");
    }
}
