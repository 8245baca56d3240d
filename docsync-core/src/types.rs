//! Domain types shared by the store backends and the sync engine.
//!
//! Documents are plain JSON objects; every backend converts to and from
//! [`Document`] at its boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primary-key field of every stored document.
pub const ID_FIELD: &str = "_id";
/// Last computed content fingerprint.
pub const DOC_HASH_FIELD: &str = "doc_hash";
/// Last-changed timestamp; moves only when `doc_hash` moves.
pub const UTIME_FIELD: &str = "utime";
/// Creation timestamp; written once.
pub const CTIME_FIELD: &str = "ctime";

/// Fields maintained by the sync engine rather than by the source system.
pub const BOOKKEEPING_FIELDS: [&str; 3] = [DOC_HASH_FIELD, UTIME_FIELD, CTIME_FIELD];

/// Timestamp layout used for `utime` / `ctime`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One stored entity: field name to JSON value.
pub type Document = Map<String, Value>;

/// Returns true for `_id` and the bookkeeping fields.
pub fn is_reserved_field(name: &str) -> bool {
    name == ID_FIELD || BOOKKEEPING_FIELDS.contains(&name)
}

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionName(pub String);

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CollectionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CollectionName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Fully-qualified collection address: `<database>.<collection>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: CollectionName,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<CollectionName>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A 20-byte content digest rendered as 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex length of a fingerprint.
    pub const HEX_LEN: usize = 40;

    /// Wrap an already-computed hex digest.
    ///
    /// Returns `None` unless `hex` is exactly 40 lowercase hex characters.
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        let valid = hex.len() == Self::HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then_some(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<[u8; 20]> for Fingerprint {
    fn from(digest: [u8; 20]) -> Self {
        Self(hex::encode(digest))
    }
}

impl From<Fingerprint> for Value {
    fn from(fp: Fingerprint) -> Self {
        Value::String(fp.0)
    }
}

// ---------------------------------------------------------------------------
// Pool bounds
// ---------------------------------------------------------------------------

/// Minimum / maximum concurrent connections of the process-wide pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub min: u32,
    pub max: u32,
}

impl PoolBounds {
    pub const DEFAULT_MIN: u32 = 5;
    pub const DEFAULT_MAX: u32 = 50;
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            min: Self::DEFAULT_MIN,
            max: Self::DEFAULT_MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(CollectionName::from("FILT_RECORDS").to_string(), "FILT_RECORDS");
        assert_eq!(Namespace::new("Test", "users").to_string(), "Test.users");
    }

    #[test]
    fn fingerprint_accepts_only_lower_hex_of_right_length() {
        let ok = "a".repeat(40);
        assert!(Fingerprint::from_hex(ok.clone()).is_some());
        assert!(Fingerprint::from_hex("A".repeat(40)).is_none());
        assert!(Fingerprint::from_hex("a".repeat(39)).is_none());
        assert!(Fingerprint::from_hex("g".repeat(40)).is_none());
        assert_eq!(
            Value::from(Fingerprint::from_hex(ok.clone()).unwrap()),
            Value::String(ok)
        );
    }

    #[test]
    fn fingerprint_from_digest_is_lower_hex() {
        let mut digest = [0u8; 20];
        digest[0] = 0xAB;
        digest[19] = 0x01;
        let fp = Fingerprint::from(digest);
        assert_eq!(fp.as_str().len(), Fingerprint::HEX_LEN);
        assert!(fp.as_str().starts_with("ab00"));
        assert!(fp.as_str().ends_with("01"));
        assert_eq!(Fingerprint::from_hex(fp.as_str()), Some(fp));
    }

    #[test]
    fn reserved_fields() {
        assert!(is_reserved_field("_id"));
        assert!(is_reserved_field("doc_hash"));
        assert!(is_reserved_field("utime"));
        assert!(is_reserved_field("ctime"));
        assert!(!is_reserved_field("mobile"));
    }

    #[test]
    fn pool_bounds_default() {
        let bounds = PoolBounds::default();
        assert_eq!(bounds.min, 5);
        assert_eq!(bounds.max, 50);
    }
}
