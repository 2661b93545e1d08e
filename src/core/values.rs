//! # Value Objects
//!
//! Immutable building blocks for requests and responses flowing through the pipeline.
//!
//! ## Key Features
//! - `Header` and `Query`: ordered, multi-valued maps (case-insensitive keys for headers)
//! - `Params`: ordered single-valued path parameters
//! - `UrlPath`: a `:name` path template resolved against `Params`
//! - `Body`: JSON, text or raw bytes
//!
//! ## Rust Concepts Used
//! - Every container keeps its entries behind an `Arc`. A modification clones the handle and
//!   calls `Arc::make_mut`, which copies the entries only when another snapshot still shares
//!   them. Old snapshots stay untouched, so history entries never change after they are recorded.
//! - Modification methods take `&self` and return a new value, never mutating in place.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::Engine;
use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Key comparison rule for a [`ValueMap`]
pub trait KeyRule: Send + Sync + 'static {
    fn matches(stored: &str, wanted: &str) -> bool;
}

/// HTTP header names compare without regard to ASCII case
#[derive(Debug)]
pub struct CaseInsensitive;

/// Query parameter names compare exactly
#[derive(Debug)]
pub struct CaseSensitive;

impl KeyRule for CaseInsensitive {
    fn matches(stored: &str, wanted: &str) -> bool {
        stored.eq_ignore_ascii_case(wanted)
    }
}

impl KeyRule for CaseSensitive {
    fn matches(stored: &str, wanted: &str) -> bool {
        stored == wanted
    }
}

/// Ordered multi-valued map with copy-on-write storage
pub struct ValueMap<R: KeyRule> {
    entries: Arc<Vec<(String, Vec<String>)>>,
    _rule: PhantomData<R>,
}

/// Request/response header set
pub type Header = ValueMap<CaseInsensitive>;

/// URL query parameters
pub type Query = ValueMap<CaseSensitive>;

impl<R: KeyRule> ValueMap<R> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            _rule: PhantomData,
        }
    }

    /// Build a map from `(key, value)` pairs, grouping repeated keys in first-seen order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            match entries.iter_mut().find(|(k, _)| R::matches(k, &key)) {
                Some((_, values)) => values.push(value.into()),
                None => entries.push((key, vec![value.into()])),
            }
        }
        Self {
            entries: Arc::new(entries),
            _rule: PhantomData,
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| R::matches(k, key))
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// All values stored under `key`, empty when absent
    pub fn get_all(&self, key: &str) -> &[String] {
        self.position(key)
            .map(|index| self.entries[index].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Create-or-overwrite `key` with a single value
    pub fn set(&self, key: &str, value: impl Into<String>) -> Self {
        self.set_all(key, vec![value.into()])
    }

    /// Create-or-overwrite `key` with all of `values`
    pub fn set_all(&self, key: &str, values: Vec<String>) -> Self {
        let mut next = self.clone();
        let entries = Arc::make_mut(&mut next.entries);
        match entries.iter_mut().find(|(k, _)| R::matches(k, key)) {
            Some((_, existing)) => *existing = values,
            None => entries.push((key.to_string(), values)),
        }
        next
    }

    /// Append a value, preserving whatever is already stored under `key`
    pub fn add(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let entries = Arc::make_mut(&mut next.entries);
        match entries.iter_mut().find(|(k, _)| R::matches(k, key)) {
            Some((_, existing)) => existing.push(value.into()),
            None => entries.push((key.to_string(), vec![value.into()])),
        }
        next
    }

    /// Overwrite `key` only if it already exists
    pub fn replace(&self, key: &str, values: Vec<String>) -> Self {
        if self.contains(key) {
            self.set_all(key, values)
        } else {
            self.clone()
        }
    }

    pub fn remove(&self, key: &str) -> Self {
        let Some(index) = self.position(key) else {
            return self.clone();
        };
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).remove(index);
        next
    }

    /// Move the values of `from` to `to`, replacing anything stored under `to`
    pub fn rename(&self, from: &str, to: &str) -> Self {
        let values = self.get_all(from).to_vec();
        if !self.contains(from) {
            return self.clone();
        }
        self.remove(from).set_all(to, values)
    }

    /// Overlay every key of `other` onto this map
    pub fn merge(&self, other: &Self) -> Self {
        other
            .iter()
            .fold(self.clone(), |acc, (key, values)| acc.set_all(key, values.to_vec()))
    }

    /// Keep only the keys accepted by `keep`
    pub fn filter(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            entries: Arc::new(
                self.entries
                    .iter()
                    .filter(|(k, _)| keep(k.as_str()))
                    .cloned()
                    .collect(),
            ),
            _rule: PhantomData,
        }
    }
}

impl Header {
    /// Copy an `http` header map, keeping the first-seen order of names
    pub fn from_http(headers: &HeaderMap) -> Self {
        Self::from_pairs(headers.iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        }))
    }

    /// Convert to an `http` header map, skipping names or values that are not valid HTTP
    pub fn to_http(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (key, values) in self.iter() {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                tracing::warn!(header = %key, "Skipping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        map.append(name.clone(), value);
                    }
                    Err(_) => tracing::warn!(header = %key, "Skipping invalid header value"),
                }
            }
        }
        map
    }
}

impl Query {
    /// Parse a raw query string (`a=1&b=2&a=3`), percent-decoding keys and values
    pub fn parse(raw: &str) -> Self {
        Self::from_pairs(raw.split('&').filter(|pair| !pair.is_empty()).map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        }))
    }

    /// Encode back into a query string
    pub fn encode(&self) -> String {
        self.iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| {
                    format!(
                        "{}={}",
                        urlencoding::encode(key),
                        urlencoding::encode(value)
                    )
                })
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

impl<R: KeyRule> Clone for ValueMap<R> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            _rule: PhantomData,
        }
    }
}

impl<R: KeyRule> Default for ValueMap<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: KeyRule> PartialEq for ValueMap<R> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<R: KeyRule> Eq for ValueMap<R> {}

impl<R: KeyRule> fmt::Debug for ValueMap<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<R: KeyRule> Serialize for ValueMap<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, values) in self.iter() {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

impl<'de, R: KeyRule> Deserialize<'de> for ValueMap<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<R>(PhantomData<R>);

        impl<'de, R: KeyRule> Visitor<'de> for OrderedVisitor<R> {
            type Value = ValueMap<R>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, values)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push((key, values));
                }
                Ok(ValueMap {
                    entries: Arc::new(entries),
                    _rule: PhantomData,
                })
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Ordered single-valued path parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Arc<Vec<(String, String)>>);

impl Params {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(Arc::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let entries = Arc::make_mut(&mut next.0);
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.into(),
            None => entries.push((key.to_string(), value.into())),
        }
        next
    }

    /// Params hold one value per key, so adding only fills a missing key
    pub fn add(&self, key: &str, value: impl Into<String>) -> Self {
        if self.contains(key) {
            self.clone()
        } else {
            self.set(key, value)
        }
    }

    pub fn replace(&self, key: &str, value: impl Into<String>) -> Self {
        if self.contains(key) {
            self.set(key, value)
        } else {
            self.clone()
        }
    }

    pub fn remove(&self, key: &str) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.0).retain(|(k, _)| k != key);
        next
    }

    pub fn rename(&self, from: &str, to: &str) -> Self {
        match self.get(from) {
            Some(value) => {
                let value = value.to_string();
                self.remove(from).set(to, value)
            }
            None => self.clone(),
        }
    }
}

/// Path template such as `/users/:id/orders`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPath(Arc<str>);

impl UrlPath {
    pub fn new(template: impl AsRef<str>) -> Self {
        Self(Arc::from(template.as_ref()))
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    /// Names of the `:name` and `*name` placeholders, in order
    pub fn param_names(&self) -> Vec<&str> {
        self.0
            .split('/')
            .filter_map(|segment| {
                segment
                    .strip_prefix(':')
                    .or_else(|| segment.strip_prefix('*'))
            })
            .collect()
    }

    /// Substitute placeholders from `params`; unknown placeholders stay literal
    pub fn resolve(&self, params: &Params) -> String {
        self.0
            .split('/')
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    params
                        .get(name)
                        .map(|v| urlencoding::encode(v).into_owned())
                        .unwrap_or_else(|| segment.to_string())
                } else if let Some(name) = segment.strip_prefix('*') {
                    params
                        .get(name)
                        .map(str::to_string)
                        .unwrap_or_else(|| segment.to_string())
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Rename a placeholder so it follows a renamed param
    pub fn rename_param(&self, from: &str, to: &str) -> Self {
        let renamed = self
            .0
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) if name == from => format!(":{}", to),
                _ => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/");
        Self::new(renamed)
    }
}

impl fmt::Display for UrlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request or response payload
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Parsed JSON document
    Json(Arc<Value>),
    /// UTF-8 text that is not JSON
    Text(Arc<str>),
    /// Anything else
    Raw(Bytes),
}

impl Body {
    /// Classify raw bytes using the content type; empty payloads are no body at all
    pub fn from_bytes(bytes: Bytes, content_type: Option<&str>) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(true);
        if is_json {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                return Some(Body::Json(Arc::new(value)));
            }
        }

        match std::str::from_utf8(&bytes) {
            Ok(text) => Some(Body::Text(Arc::from(text))),
            Err(_) => Some(Body::Raw(bytes)),
        }
    }

    pub fn json(value: Value) -> Self {
        Body::Json(Arc::new(value))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Serialized bytes for the wire
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Json(value) => Bytes::from(serde_json::to_vec(value.as_ref()).unwrap_or_default()),
            Body::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Body::Raw(bytes) => bytes.clone(),
        }
    }

    /// JSON view used when bodies are aggregated or referenced; raw bytes become base64
    pub fn to_json_value(&self) -> Value {
        match self {
            Body::Json(value) => value.as_ref().clone(),
            Body::Text(text) => Value::String(text.to_string()),
            Body::Raw(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }

    /// Content type this body is serialized as, when it implies one
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Json(_) => Some("application/json"),
            Body::Text(_) | Body::Raw(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_keys_are_case_insensitive() {
        let header = Header::new().set("Content-Type", "application/json");
        assert_eq!(header.get("content-type"), Some("application/json"));
        assert!(header.contains("CONTENT-TYPE"));

        let header = header.set("content-type", "text/plain");
        assert_eq!(header.len(), 1);
        assert_eq!(header.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_query_keys_are_case_sensitive() {
        let query = Query::parse("page=1&Page=2");
        assert_eq!(query.get("page"), Some("1"));
        assert_eq!(query.get("Page"), Some("2"));
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn test_modifications_leave_original_untouched() {
        let original = Header::from_pairs([("X-One", "1"), ("X-Two", "2")]);
        let modified = original.add("X-One", "again").remove("X-Two");

        assert_eq!(original.get_all("X-One"), ["1".to_string()]);
        assert!(original.contains("X-Two"));
        assert_eq!(modified.get_all("X-One"), ["1".to_string(), "again".to_string()]);
        assert!(!modified.contains("X-Two"));
    }

    #[test]
    fn test_replace_only_touches_existing_keys() {
        let header = Header::new().set("X-Present", "old");
        let header = header
            .replace("X-Present", vec!["new".to_string()])
            .replace("X-Missing", vec!["value".to_string()]);

        assert_eq!(header.get("X-Present"), Some("new"));
        assert!(!header.contains("X-Missing"));
    }

    #[test]
    fn test_rename_moves_all_values() {
        let header = Header::from_pairs([("X-Old", "a"), ("X-Old", "b"), ("X-Keep", "c")]);
        let renamed = header.rename("x-old", "X-New");

        assert!(!renamed.contains("X-Old"));
        assert_eq!(renamed.get_all("X-New"), ["a".to_string(), "b".to_string()]);
        assert_eq!(renamed.rename("X-Absent", "X-Other"), renamed);
    }

    #[test]
    fn test_header_serialization_keeps_insertion_order() {
        let header = Header::from_pairs([("Zeta", "1"), ("Alpha", "2"), ("Zeta", "3")]);
        let serialized = serde_json::to_string(&header).unwrap();
        assert_eq!(serialized, r#"{"Zeta":["1","3"],"Alpha":["2"]}"#);

        let parsed: Header = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_query_parse_and_encode() {
        let query = Query::parse("name=John%20Doe&tag=a&tag=b&empty=");
        assert_eq!(query.get("name"), Some("John Doe"));
        assert_eq!(query.get_all("tag").len(), 2);
        assert_eq!(query.get("empty"), Some(""));
        assert_eq!(query.encode(), "name=John%20Doe&tag=a&tag=b&empty=");
    }

    #[test]
    fn test_params_operations() {
        let params = Params::from_pairs([("id", "42")]);
        assert_eq!(params.add("id", "7").get("id"), Some("42"));
        assert_eq!(params.replace("other", "1"), params);
        assert_eq!(params.rename("id", "user_id").get("user_id"), Some("42"));
        assert!(params.remove("id").is_empty());
    }

    #[test]
    fn test_url_path_resolution() {
        let path = UrlPath::new("/users/:id/orders/:order");
        let params = Params::from_pairs([("id", "42"), ("order", "a b")]);

        assert_eq!(path.param_names(), vec!["id", "order"]);
        assert_eq!(path.resolve(&params), "/users/42/orders/a%20b");
        assert_eq!(
            path.resolve(&Params::default()),
            "/users/:id/orders/:order"
        );

        let renamed = path.rename_param("id", "user");
        assert_eq!(renamed.template(), "/users/:user/orders/:order");
    }

    #[test]
    fn test_body_classification() {
        let json = Body::from_bytes(Bytes::from_static(br#"{"a":1}"#), Some("application/json"));
        assert_eq!(json, Some(Body::json(json!({"a": 1}))));

        let text = Body::from_bytes(Bytes::from_static(b"hello"), Some("text/plain"));
        assert_eq!(text, Some(Body::Text(Arc::from("hello"))));

        let raw = Body::from_bytes(Bytes::from_static(&[0xff, 0xfe]), None).unwrap();
        assert_eq!(raw.to_json_value(), json!("//4="));

        assert!(Body::from_bytes(Bytes::new(), None).is_none());
    }
}
