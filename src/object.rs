//! Value storage. The core treats values as an opaque tagged union — it
//! observes type tag, reference count and string encoding (for copy-on-write)
//! but never interprets list/set/hash/zset contents.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// How a string value is physically encoded. Only `Raw` is mutable in place;
/// anything else (e.g. a small integer kept unboxed) must be converted to
/// `Raw` before an in-place mutation, see `Database::unshare_string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Raw,
    Int,
}

#[derive(Debug, Clone)]
pub struct RudisString {
    value: Bytes,
    encoding: StringEncoding,
}

impl RudisString {
    pub fn from_bytes(value: Bytes) -> Self {
        let encoding = if Self::looks_like_int(&value) {
            StringEncoding::Int
        } else {
            StringEncoding::Raw
        };
        RudisString { value, encoding }
    }

    fn looks_like_int(value: &Bytes) -> bool {
        value.len() <= 20
            && !value.is_empty()
            && std::str::from_utf8(value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .is_some()
    }

    pub fn get(&self) -> &Bytes {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    /// In-place mutation. Callers must have already gone through
    /// `Database::unshare_string` so this never observes `refcount > 1`.
    pub fn append(&mut self, data: &[u8]) {
        let mut buf = Vec::with_capacity(self.value.len() + data.len());
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(data);
        self.value = Bytes::from(buf);
        self.encoding = StringEncoding::Raw;
    }
}

#[derive(Debug, Clone, Default)]
pub struct RudisList {
    items: Vec<Bytes>,
}

impl RudisList {
    pub fn new() -> Self {
        RudisList::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RudisSet {
    members: HashSet<Bytes>,
}

impl RudisSet {
    pub fn new() -> Self {
        RudisSet::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RudisHash {
    fields: HashMap<Bytes, Bytes>,
}

impl RudisHash {
    pub fn new() -> Self {
        RudisHash::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// `BTreeMap` needs `Ord`; scores only need to order among themselves, so a
/// tiny local newtype stands in rather than pulling in a crate for one trait
/// impl.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f64);
impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RudisZSet {
    members: BTreeMap<Bytes, OrderedFloat>,
}

impl RudisZSet {
    pub fn new() -> Self {
        RudisZSet::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The tagged union the keyspace core stores per key. Held behind an `Arc`
/// inside [`KeyEntry`] so sharing (and therefore the need to copy-on-write)
/// is visible via `Arc::strong_count`.
#[derive(Debug, Clone)]
pub enum Value {
    String(RudisString),
    List(RudisList),
    Set(RudisSet),
    Hash(RudisHash),
    ZSet(RudisZSet),
}

impl Value {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> Option<&RudisString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_mut(&mut self) -> Option<&mut RudisString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A key's migration flag: whether it is currently locked for single-key
/// transfer (`Transfering`) or has already been handed off (`Transfered`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFlag {
    Normal,
    Transfering,
    Transfered,
}

/// The value slot stored in a database's primary map.
///
/// The reference design links `KeyEntry` into its owning bucket via an
/// intrusive pointer; this port instead derives bucket membership from
/// `hash(key)` and keeps each bucket's member set in a plain
/// `HashSet<Bytes>` (`bucket::Bucket::members`), which preserves the
/// O(bucket size) iteration property without unsafe pointers.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub value: Arc<Value>,
    pub flag: KeyFlag,
    /// Bumped on every `lookup_read` touch, unless a snapshot/rewrite child
    /// is active.
    pub lru: u64,
}

impl KeyEntry {
    pub fn new(value: Value) -> Self {
        KeyEntry {
            value: Arc::new(value),
            flag: KeyFlag::Normal,
            lru: 0,
        }
    }

    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}
