// SPDX-License-Identifier: MIT OR Apache-2.0

//! The message envelope ([`Msg`]) and its copy-on-write payload
//! ([`SharedData`]) and metadata ([`Metadata`]).
//!
//! Copying a [`Msg`] is O(1): it clones two `Arc`s and a handful of scalar
//! fields. Every downstream node dispatch gets its own copy via
//! [`Msg::copy`] so that concurrent branches never race on the same bytes —
//! see the module-level note in `rcr-runtime` for why that matters.

use crate::error::RuleError;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// The wire/runtime tag for a message's payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    /// Bytes are a JSON document.
    Json,
    /// Bytes are UTF-8 text that is not JSON.
    Text,
    /// Bytes are arbitrary binary data.
    Binary,
}

/// Minimum hex-string length (characters, not bytes) for the decode-side
/// heuristic to tag a value `BINARY` instead of `TEXT`. Anything shorter is
/// more likely to be a short text token that happens to look hex-ish (e.g.
/// `"cafe"`).
const MIN_BINARY_HEX_CHARS: usize = 16;

fn looks_like_hex(s: &str) -> bool {
    s.len() >= MIN_BINARY_HEX_CHARS
        && s.len() % 2 == 0
        && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

/// Infer the `dataType` of a decoded wire string: hex of sufficient length
/// decodes to `BINARY`, else a successful JSON parse is `JSON`, else `TEXT`.
fn infer_data_type(raw: &str) -> (DataType, Vec<u8>) {
    if looks_like_hex(raw) {
        if let Some(bytes) = from_hex(raw) {
            return (DataType::Binary, bytes);
        }
    }
    if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
        return (DataType::Json, raw.as_bytes().to_vec());
    }
    (DataType::Text, raw.as_bytes().to_vec())
}

struct PayloadInner {
    bytes: Vec<u8>,
    data_type: DataType,
    json_cache: Option<serde_json::Value>,
}

/// A reference-counted, copy-on-write byte payload with a lazily parsed and
/// cached JSON view.
///
/// Cloning a [`SharedData`] increments the refcount reported by
/// [`SharedData::refcount`] (backed by `Arc::strong_count`); any `set_*`
/// call clones the bytes into a fresh allocation first if the refcount is
/// greater than one, so the clone never observes the mutation.
#[derive(Clone)]
pub struct SharedData {
    inner: Arc<RwLock<PayloadInner>>,
}

impl SharedData {
    /// Construct a payload from raw bytes with an explicit data type.
    #[must_use]
    pub fn new(bytes: Vec<u8>, data_type: DataType) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PayloadInner {
                bytes,
                data_type,
                json_cache: None,
            })),
        }
    }

    /// Construct a JSON payload from a `serde_json::Value`, caching it
    /// immediately since it is already parsed.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(&value).unwrap_or_default();
        Self {
            inner: Arc::new(RwLock::new(PayloadInner {
                bytes,
                data_type: DataType::Json,
                json_cache: Some(value),
            })),
        }
    }

    /// The number of live [`SharedData`] handles sharing this payload.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Borrow the raw bytes. Blocking-free for readers; never clones.
    #[must_use]
    pub fn get_bytes(&self) -> Vec<u8> {
        self.inner.read().expect("payload lock poisoned").bytes.clone()
    }

    /// Borrow the bytes as a UTF-8 string, if valid.
    #[must_use]
    pub fn get_data(&self) -> Option<String> {
        String::from_utf8(self.get_bytes()).ok()
    }

    /// The data type this payload was tagged with.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.inner.read().expect("payload lock poisoned").data_type
    }

    /// Parse (and cache) the payload as JSON. Concurrent readers of an
    /// already-cached value never see a torn parse: the cache is filled
    /// under the same write lock used to invalidate it.
    pub fn get_json(&self) -> Result<serde_json::Value, RuleError> {
        {
            let guard = self.inner.read().expect("payload lock poisoned");
            if let Some(cached) = &guard.json_cache {
                return Ok(cached.clone());
            }
        }
        let mut guard = self.inner.write().expect("payload lock poisoned");
        if let Some(cached) = &guard.json_cache {
            return Ok(cached.clone());
        }
        let value: serde_json::Value =
            serde_json::from_slice(&guard.bytes).map_err(RuleError::InvalidJson)?;
        guard.json_cache = Some(value.clone());
        Ok(value)
    }

    /// Copy-on-write byte replacement. Preserves the current `dataType`
    /// unless `data_type` is given.
    pub fn set_bytes(&mut self, bytes: Vec<u8>, data_type: Option<DataType>) {
        if Arc::strong_count(&self.inner) > 1 {
            let current_type = self.data_type();
            self.inner = Arc::new(RwLock::new(PayloadInner {
                bytes,
                data_type: data_type.unwrap_or(current_type),
                json_cache: None,
            }));
        } else {
            let mut guard = self.inner.write().expect("payload lock poisoned");
            guard.bytes = bytes;
            guard.json_cache = None;
            if let Some(dt) = data_type {
                guard.data_type = dt;
            }
        }
    }

    /// Copy-on-write string replacement; equivalent to
    /// `set_bytes(s.into_bytes(), None)`.
    pub fn set_data(&mut self, s: impl Into<String>) {
        self.set_bytes(s.into().into_bytes(), None);
    }
}

/// A reference-counted, copy-on-write string-to-string mapping.
#[derive(Clone)]
pub struct Metadata {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    /// An empty metadata map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build metadata from an owned map.
    #[must_use]
    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of live handles sharing this map.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Read a single value.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<String> {
        self.inner.read().expect("metadata lock poisoned").get(key).cloned()
    }

    /// Snapshot the whole map.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.inner.read().expect("metadata lock poisoned").clone()
    }

    /// Copy-on-write insert.
    pub fn put_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.clone_if_shared();
        self.inner
            .write()
            .expect("metadata lock poisoned")
            .insert(key.into(), value.into());
    }

    /// Copy-on-write bulk replace. `overlay` entries win on key collision.
    pub fn replace_all(&mut self, overlay: HashMap<String, String>) {
        self.clone_if_shared();
        self.inner.write().expect("metadata lock poisoned").extend(overlay);
    }

    fn clone_if_shared(&mut self) {
        if Arc::strong_count(&self.inner) > 1 {
            let snapshot = self.to_map();
            self.inner = Arc::new(RwLock::new(snapshot));
        }
    }
}

/// The message envelope routed through a compiled chain.
///
/// `id` and `type_` are immutable once the message is in flight; `data` and
/// `metadata` are mutated only through their own COW methods. The envelope
/// itself is value-typed — [`Msg::copy`] is O(1) and always safe to hand to
/// a concurrently scheduled task.
#[derive(Clone)]
pub struct Msg {
    id: String,
    timestamp: i64,
    type_: String,
    data: SharedData,
    metadata: Metadata,
}

impl Msg {
    /// Build a new message. `ts = 0` means "now" (current epoch millis).
    #[must_use]
    pub fn new(
        ts: i64,
        type_: impl Into<String>,
        data_type: DataType,
        metadata: Metadata,
        data: Vec<u8>,
    ) -> Self {
        let timestamp = if ts == 0 {
            chrono::Utc::now().timestamp_millis()
        } else {
            ts
        };
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            type_: type_.into(),
            data: SharedData::new(data, data_type),
            metadata,
        }
    }

    /// O(1) copy: clones the id/type/timestamp scalars and increments the
    /// refcount on the shared payload and metadata.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The message's opaque unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Epoch-millis timestamp.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The user-chosen event-type tag.
    #[must_use]
    pub fn msg_type(&self) -> &str {
        &self.type_
    }

    /// The payload's current data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Borrow the payload as a UTF-8 string, if valid.
    #[must_use]
    pub fn get_data(&self) -> Option<String> {
        self.data.get_data()
    }

    /// Borrow the raw payload bytes.
    #[must_use]
    pub fn get_bytes(&self) -> Vec<u8> {
        self.data.get_bytes()
    }

    /// Parse the payload as JSON.
    pub fn get_json(&self) -> Result<serde_json::Value, RuleError> {
        self.data.get_json()
    }

    /// COW-replace the payload bytes.
    pub fn set_bytes(&mut self, bytes: Vec<u8>, data_type: Option<DataType>) {
        self.data.set_bytes(bytes, data_type);
    }

    /// COW-replace the payload with a string, preserving `dataType`.
    pub fn set_data(&mut self, s: impl Into<String>) {
        self.data.set_data(s);
    }

    /// Borrow the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutably borrow the metadata map (COW on first write).
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Handle to the underlying shared payload, e.g. to check its refcount.
    #[must_use]
    pub fn shared_data(&self) -> &SharedData {
        &self.data
    }
}

impl Serialize for Msg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("ts", &self.timestamp)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", &self.type_)?;
        map.serialize_entry("dataType", &self.data.data_type())?;

        let bytes = self.data.get_bytes();
        let as_text = std::str::from_utf8(&bytes).ok();
        let encoded = match (self.data.data_type(), as_text) {
            (DataType::Binary, _) | (_, None) => to_hex(&bytes),
            (_, Some(text)) => text.to_string(),
        };
        map.serialize_entry("data", &encoded)?;
        map.serialize_entry("metadata", &self.metadata.to_map())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Msg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MsgVisitor;

        impl<'de> Visitor<'de> for MsgVisitor {
            type Value = Msg;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a rule-chain message envelope")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Msg, A::Error> {
                let mut ts: Option<i64> = None;
                let mut id: Option<String> = None;
                let mut type_: Option<String> = None;
                let mut data_raw: Option<String> = None;
                let mut metadata: Option<HashMap<String, String>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "ts" => ts = Some(map.next_value()?),
                        "id" => id = Some(map.next_value()?),
                        "type" => type_ = Some(map.next_value()?),
                        // dataType is accepted on the wire for readability
                        // but re-inferred below per the decode contract.
                        "dataType" => {
                            let _: DataType = map.next_value()?;
                        }
                        "data" => data_raw = Some(map.next_value()?),
                        "metadata" => metadata = Some(map.next_value()?),
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                let raw = data_raw.unwrap_or_default();
                let (data_type, bytes) = infer_data_type(&raw);

                Ok(Msg {
                    id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    timestamp: ts.unwrap_or(0),
                    type_: type_.unwrap_or_default(),
                    data: SharedData::new(bytes, data_type),
                    metadata: Metadata::from_map(metadata.unwrap_or_default()),
                })
            }
        }

        deserializer.deserialize_map(MsgVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn msg(data: &str, data_type: DataType) -> Msg {
        Msg::new(0, "T", data_type, Metadata::new(), data.as_bytes().to_vec())
    }

    #[test]
    fn copy_is_isolated_from_later_mutation() {
        let m1 = msg("a", DataType::Json);
        let mut m2 = m1.copy();
        m2.set_data("b");
        assert_eq!(m1.get_data().as_deref(), Some("a"));
        assert_eq!(m2.get_data().as_deref(), Some("b"));
        assert_eq!(m1.shared_data().refcount(), 1);
        assert_eq!(m2.shared_data().refcount(), 1);
    }

    #[test]
    fn refcount_reflects_live_copies() {
        let m1 = msg("a", DataType::Text);
        assert_eq!(m1.shared_data().refcount(), 1);
        let m2 = m1.copy();
        assert_eq!(m1.shared_data().refcount(), 2);
        assert_eq!(m2.shared_data().refcount(), 2);
        drop(m2);
        assert_eq!(m1.shared_data().refcount(), 1);
    }

    #[test]
    fn metadata_mutation_does_not_leak_across_copies() {
        let mut m1 = msg("a", DataType::Text);
        let m2 = m1.copy();
        m1.metadata_mut().put_value("k", "v1");
        assert_eq!(m1.metadata().get_value("k").as_deref(), Some("v1"));
        assert_eq!(m2.metadata().get_value("k"), None);
    }

    #[test]
    fn json_roundtrip_preserves_observable_fields() {
        let mut m = msg("{\"k\":\"v\"}", DataType::Json);
        m.metadata_mut().put_value("a", "1");
        let wire = serde_json::to_string(&m).unwrap();
        let decoded: Msg = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.msg_type(), m.msg_type());
        assert_eq!(decoded.data_type(), DataType::Json);
        assert_eq!(decoded.get_data(), m.get_data());
        assert_eq!(decoded.metadata().to_map(), m.metadata().to_map());
    }

    #[test]
    fn text_roundtrip_stays_text() {
        let m = msg("hello world", DataType::Text);
        let wire = serde_json::to_string(&m).unwrap();
        let decoded: Msg = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.data_type(), DataType::Text);
        assert_eq!(decoded.get_data().as_deref(), Some("hello world"));
    }

    #[test]
    fn binary_roundtrips_as_hex_and_decodes_back_to_binary() {
        let bytes = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0, 1, 2, 3, 4, 5];
        let m = Msg::new(0, "IMG", DataType::Binary, Metadata::new(), bytes.clone());
        let wire = serde_json::to_string(&m).unwrap();
        assert!(wire.contains(&to_hex(&bytes)));
        let decoded: Msg = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.data_type(), DataType::Binary);
        assert_eq!(decoded.get_bytes(), bytes);
    }

    #[test]
    fn short_hex_like_text_stays_text() {
        // "cafe" is valid hex but shorter than the binary-detection floor.
        let m = msg("cafe", DataType::Text);
        let wire = serde_json::to_string(&m).unwrap();
        let decoded: Msg = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.data_type(), DataType::Text);
        assert_eq!(decoded.get_data().as_deref(), Some("cafe"));
    }

    #[test]
    fn odd_length_hex_like_string_stays_text() {
        let raw = "abcdef0123456789a"; // 17 chars, odd length disqualifies
        let m = msg(raw, DataType::Text);
        let wire = serde_json::to_string(&m).unwrap();
        let decoded: Msg = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.data_type(), DataType::Text);
    }

    #[test]
    fn get_json_caches_and_fails_on_non_json() {
        let m = msg("not json", DataType::Text);
        assert!(m.get_json().is_err());
        let m2 = msg("{\"a\":1}", DataType::Json);
        let first = m2.get_json().unwrap();
        let second = m2.get_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn set_bytes_invalidates_json_cache() {
        let mut m = msg("{\"a\":1}", DataType::Json);
        let _ = m.get_json().unwrap();
        m.set_bytes(b"{\"a\":2}".to_vec(), None);
        let value = m.get_json().unwrap();
        assert_eq!(value["a"], 2);
    }

    proptest::proptest! {
        /// Refcount always equals the number of live clones sharing a payload,
        /// regardless of the order copies are made and dropped in.
        #[test]
        fn refcount_matches_live_copy_count(copies in 0usize..8, drop_first in proptest::bool::ANY) {
            let root = msg("seed", DataType::Text);
            let mut held: Vec<Msg> = (0..copies).map(|_| root.copy()).collect();
            prop_assert_eq!(root.shared_data().refcount(), copies + 1);

            if drop_first && !held.is_empty() {
                held.remove(0);
                prop_assert_eq!(root.shared_data().refcount(), copies);
            }

            held.clear();
            prop_assert_eq!(root.shared_data().refcount(), 1);
        }

        /// Mutating one copy's payload never changes what any other live copy
        /// observes, no matter the byte content.
        #[test]
        fn mutation_never_leaks_across_copies(a in ".{0,32}", b in ".{0,32}") {
            let m1 = msg(&a, DataType::Text);
            let mut m2 = m1.copy();
            m2.set_data(&b);
            let d1 = m1.get_data();
            let d2 = m2.get_data();
            prop_assert_eq!(d1.as_deref(), Some(a.as_str()));
            prop_assert_eq!(d2.as_deref(), Some(b.as_str()));
        }
    }
}
