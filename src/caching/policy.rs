//! # Cache Policy
//!
//! [`Cache`] holds the gateway-wide defaults and [`EndpointCache`] the per-endpoint settings.
//! At load time each endpoint gets one merged [`EndpointCache`]: fields the endpoint sets win,
//! unset fields (`None`) fall back to the global accessor. `enabled` and `ignore_query` only
//! ever come from the endpoint.
//!
//! ## Allow-list semantics
//! | list                   | `None`      | `Some([])`  | `Some(list)`   |
//! |------------------------|-------------|-------------|----------------|
//! | `only_if_methods`      | any method  | `GET` only  | listed methods |
//! | `only_if_status_codes` | any status  | 200..=299   | listed codes   |

use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::core::types::{GatewayResponse, Request, CACHE_CONTROL};
use crate::core::values::Header;

const DEFAULT_DURATION: Duration = Duration::from_secs(60);

/// Global cache defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default, with = "humantime_serde")]
    duration: Option<Duration>,

    /// Request headers whose values become part of the cache key
    #[serde(default)]
    strategy_headers: Option<Vec<String>>,

    #[serde(default)]
    only_if_status_codes: Option<Vec<u16>>,

    #[serde(default)]
    only_if_methods: Option<Vec<String>>,

    /// Honor `Cache-Control: no-cache` / `no-store`
    #[serde(default)]
    allow_cache_control: Option<bool>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_strategy_headers(mut self, headers: Vec<String>) -> Self {
        self.strategy_headers = Some(headers);
        self
    }

    pub fn with_only_if_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.only_if_status_codes = Some(codes);
        self
    }

    pub fn with_only_if_methods(mut self, methods: Vec<String>) -> Self {
        self.only_if_methods = Some(methods);
        self
    }

    pub fn with_allow_cache_control(mut self, allow: bool) -> Self {
        self.allow_cache_control = Some(allow);
        self
    }

    /// Configured duration, one minute when unset or zero
    pub fn duration(&self) -> Duration {
        self.duration
            .filter(|duration| !duration.is_zero())
            .unwrap_or(DEFAULT_DURATION)
    }

    pub fn strategy_headers(&self) -> Option<&[String]> {
        self.strategy_headers.as_deref()
    }

    pub fn only_if_status_codes(&self) -> Option<&[u16]> {
        self.only_if_status_codes.as_deref()
    }

    pub fn only_if_methods(&self) -> Option<&[String]> {
        self.only_if_methods.as_deref()
    }

    pub fn allow_cache_control(&self) -> Option<bool> {
        self.allow_cache_control
    }
}

/// Directives read from a `Cache-Control` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    NoCache,
    NoStore,
}

impl CacheControl {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "no-cache" => Some(CacheControl::NoCache),
            "no-store" => Some(CacheControl::NoStore),
            _ => None,
        }
    }
}

/// Cache settings of one endpoint; after [`EndpointCache::merge`] this is the effective policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointCache {
    #[serde(default)]
    enabled: bool,

    /// Key on the path only, so every query string shares one entry
    #[serde(default)]
    ignore_query: bool,

    #[serde(default, with = "humantime_serde")]
    duration: Option<Duration>,

    #[serde(default)]
    strategy_headers: Option<Vec<String>>,

    #[serde(default)]
    only_if_status_codes: Option<Vec<u16>>,

    #[serde(default)]
    only_if_methods: Option<Vec<String>>,

    #[serde(default)]
    allow_cache_control: Option<bool>,
}

impl EndpointCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn with_ignore_query(mut self, ignore_query: bool) -> Self {
        self.ignore_query = ignore_query;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_strategy_headers(mut self, headers: Vec<String>) -> Self {
        self.strategy_headers = Some(headers);
        self
    }

    pub fn with_only_if_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.only_if_status_codes = Some(codes);
        self
    }

    pub fn with_only_if_methods(mut self, methods: Vec<String>) -> Self {
        self.only_if_methods = Some(methods);
        self
    }

    pub fn with_allow_cache_control(mut self, allow: bool) -> Self {
        self.allow_cache_control = Some(allow);
        self
    }

    /// Effective endpoint policy from the global defaults and the endpoint settings.
    ///
    /// `None` when neither exists. Without a parent, an endpoint that sets no duration keeps
    /// it unset and is therefore disabled.
    pub fn merge(parent: Option<&Cache>, child: Option<&EndpointCache>) -> Option<EndpointCache> {
        if parent.is_none() && child.is_none() {
            return None;
        }

        let mut merged = EndpointCache::default();

        if let Some(parent) = parent {
            merged.duration = Some(parent.duration());
            merged.strategy_headers = parent.strategy_headers.clone();
            merged.only_if_status_codes = parent.only_if_status_codes.clone();
            merged.only_if_methods = parent.only_if_methods.clone();
            merged.allow_cache_control = parent.allow_cache_control;
        }

        if let Some(child) = child {
            merged.enabled = child.enabled;
            merged.ignore_query = child.ignore_query;
            if child.duration.is_some() {
                merged.duration = child.duration;
            }
            if child.strategy_headers.is_some() {
                merged.strategy_headers = child.strategy_headers.clone();
            }
            if child.only_if_status_codes.is_some() {
                merged.only_if_status_codes = child.only_if_status_codes.clone();
            }
            if child.only_if_methods.is_some() {
                merged.only_if_methods = child.only_if_methods.clone();
            }
            if child.allow_cache_control.is_some() {
                merged.allow_cache_control = child.allow_cache_control;
            }
        }

        Some(merged)
    }

    /// Switched on and holding a positive duration
    pub fn enabled(&self) -> bool {
        self.enabled && self.duration.is_some_and(|duration| !duration.is_zero())
    }

    pub fn disabled(&self) -> bool {
        !self.enabled()
    }

    pub fn ignore_query(&self) -> bool {
        self.ignore_query
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn strategy_headers(&self) -> Option<&[String]> {
        self.strategy_headers.as_deref()
    }

    pub fn only_if_status_codes(&self) -> Option<&[u16]> {
        self.only_if_status_codes.as_deref()
    }

    pub fn only_if_methods(&self) -> Option<&[String]> {
        self.only_if_methods.as_deref()
    }

    pub fn allow_cache_control(&self) -> Option<bool> {
        self.allow_cache_control
    }

    /// A cached response may be served for this request
    pub fn can_read(&self, request: &Request) -> bool {
        if self.disabled() {
            return false;
        }
        self.cache_control(request.header()) != Some(CacheControl::NoCache)
            && self.allow_method(request.method())
    }

    /// This response may be stored for this request
    pub fn can_write(&self, request: &Request, response: &GatewayResponse) -> bool {
        if self.disabled() {
            return false;
        }
        self.cache_control(&response.header) != Some(CacheControl::NoStore)
            && self.allow_method(request.method())
            && self.allow_status_code(response.status)
    }

    /// `Cache-Control` directive, only when the endpoint honors the header
    pub fn cache_control(&self, header: &Header) -> Option<CacheControl> {
        if self.allow_cache_control != Some(true) {
            return None;
        }
        header.get(CACHE_CONTROL).and_then(CacheControl::parse)
    }

    pub fn allow_method(&self, method: &Method) -> bool {
        match self.only_if_methods.as_deref() {
            None => true,
            Some([]) => method == Method::GET,
            Some(methods) => methods
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str())),
        }
    }

    pub fn allow_status_code(&self, status: StatusCode) -> bool {
        match self.only_if_status_codes.as_deref() {
            None => true,
            Some([]) => status.is_success(),
            Some(codes) => codes.contains(&status.as_u16()),
        }
    }

    /// Cache key: `METHOD:url`, followed by the non-empty strategy header values
    pub fn strategy_key(&self, request: &Request) -> String {
        let target = if self.ignore_query {
            request.path()
        } else {
            request.url()
        };
        let mut key = format!("{}:{}", request.method(), target);

        let values: Vec<&str> = self
            .strategy_headers()
            .unwrap_or_default()
            .iter()
            .filter_map(|name| request.header().get(name))
            .filter(|value| !value.is_empty())
            .collect();
        if !values.is_empty() {
            key.push(':');
            key.push_str(&values.join(":"));
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(method: Method, path: &str, query: Option<&str>, header: Header) -> Request {
        Request::new(method, path, query, header, None)
    }

    fn response(status: StatusCode, header: Header) -> GatewayResponse {
        GatewayResponse::new(status, header, Bytes::new())
    }

    #[test]
    fn test_global_duration_defaults_to_one_minute() {
        assert_eq!(Cache::new().duration(), Duration::from_secs(60));
        assert_eq!(
            Cache::new().with_duration(Duration::ZERO).duration(),
            Duration::from_secs(60)
        );
        assert_eq!(
            Cache::new().with_duration(Duration::from_secs(5)).duration(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_merge_without_any_cache() {
        assert!(EndpointCache::merge(None, None).is_none());
    }

    #[test]
    fn test_merge_unset_child_fields_take_parent_values() {
        let parent = Cache::new()
            .with_strategy_headers(vec!["X-Tenant".to_string()])
            .with_only_if_status_codes(vec![200])
            .with_only_if_methods(vec!["GET".to_string()])
            .with_allow_cache_control(true);
        let child = EndpointCache::new(true);

        let merged = EndpointCache::merge(Some(&parent), Some(&child)).unwrap();
        assert_eq!(merged.duration(), Some(parent.duration()));
        assert_eq!(merged.strategy_headers(), parent.strategy_headers());
        assert_eq!(merged.only_if_status_codes(), parent.only_if_status_codes());
        assert_eq!(merged.only_if_methods(), parent.only_if_methods());
        assert_eq!(merged.allow_cache_control(), Some(true));
        assert!(merged.enabled());
    }

    #[test]
    fn test_merge_set_child_fields_win() {
        let parent = Cache::new()
            .with_duration(Duration::from_secs(120))
            .with_strategy_headers(vec!["X-Tenant".to_string()])
            .with_allow_cache_control(true);
        let child = EndpointCache::new(true)
            .with_ignore_query(true)
            .with_duration(Duration::from_secs(5))
            .with_strategy_headers(Vec::new())
            .with_allow_cache_control(false);

        let merged = EndpointCache::merge(Some(&parent), Some(&child)).unwrap();
        assert_eq!(merged.duration(), Some(Duration::from_secs(5)));
        assert_eq!(merged.strategy_headers(), Some(&[][..]));
        assert_eq!(merged.allow_cache_control(), Some(false));
        assert!(merged.ignore_query());
    }

    #[test]
    fn test_merge_parent_only_is_disabled() {
        let merged = EndpointCache::merge(Some(&Cache::new()), None).unwrap();
        assert!(merged.disabled());
        assert_eq!(merged.duration(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_child_without_parent_or_duration_is_disabled() {
        let merged = EndpointCache::merge(None, Some(&EndpointCache::new(true))).unwrap();
        assert!(merged.duration().is_none());
        assert!(merged.disabled());

        let get = request(Method::GET, "/a", None, Header::new());
        assert!(!merged.can_read(&get));
        assert!(!merged.can_write(&get, &response(StatusCode::OK, Header::new())));
    }

    #[test]
    fn test_zero_duration_disables() {
        let cache = EndpointCache::new(true).with_duration(Duration::ZERO);
        assert!(cache.disabled());
    }

    #[test]
    fn test_empty_method_list_allows_get_only() {
        let cache = EndpointCache::new(true)
            .with_duration(Duration::from_secs(10))
            .with_only_if_methods(Vec::new());

        assert!(cache.can_read(&request(Method::GET, "/a", None, Header::new())));
        assert!(!cache.can_read(&request(Method::POST, "/a", None, Header::new())));
    }

    #[test]
    fn test_method_list_matches_case_insensitively() {
        let cache = EndpointCache::new(true).with_only_if_methods(vec!["post".to_string()]);
        assert!(cache.allow_method(&Method::POST));
        assert!(!cache.allow_method(&Method::GET));
        assert!(EndpointCache::new(true).allow_method(&Method::DELETE));
    }

    #[test]
    fn test_empty_status_list_allows_2xx_only() {
        let cache = EndpointCache::new(true)
            .with_duration(Duration::from_secs(10))
            .with_only_if_status_codes(Vec::new());
        let get = request(Method::GET, "/a", None, Header::new());

        assert!(cache.can_write(&get, &response(StatusCode::OK, Header::new())));
        assert!(cache.can_write(&get, &response(StatusCode::CREATED, Header::new())));
        assert!(!cache.can_write(&get, &response(StatusCode::NOT_FOUND, Header::new())));

        let listed = cache.with_only_if_status_codes(vec![200]);
        assert!(listed.can_write(&get, &response(StatusCode::OK, Header::new())));
        assert!(!listed.can_write(&get, &response(StatusCode::CREATED, Header::new())));
    }

    #[test]
    fn test_cache_control_honored_only_when_allowed() {
        let no_cache = Header::from_pairs([("Cache-Control", "no-cache")]);
        let no_store = Header::from_pairs([("Cache-Control", "no-store")]);
        let get = request(Method::GET, "/a", None, no_cache);

        let ignoring = EndpointCache::new(true).with_duration(Duration::from_secs(10));
        assert!(ignoring.can_read(&get));
        assert!(ignoring.can_write(&get, &response(StatusCode::OK, no_store.clone())));

        let honoring = ignoring.with_allow_cache_control(true);
        assert!(!honoring.can_read(&get));
        assert!(!honoring.can_write(&get, &response(StatusCode::OK, no_store)));

        let other = Header::from_pairs([("Cache-Control", "no-cache, max-age=0")]);
        assert_eq!(honoring.cache_control(&other), None);
    }

    #[test]
    fn test_strategy_key_uses_url_and_strategy_headers() {
        let cache = EndpointCache::new(true)
            .with_strategy_headers(vec!["X-Tenant".to_string(), "X-Region".to_string()]);

        let plain = request(Method::GET, "/a", Some("x=1"), Header::new());
        assert_eq!(cache.strategy_key(&plain), "GET:/a?x=1");

        let tenant = request(
            Method::GET,
            "/a",
            Some("x=1"),
            Header::from_pairs([("x-tenant", "acme"), ("X-Region", "")]),
        );
        assert_eq!(cache.strategy_key(&tenant), "GET:/a?x=1:acme");
        assert_eq!(cache.strategy_key(&tenant), cache.strategy_key(&tenant.clone()));

        let other = request(
            Method::GET,
            "/a",
            Some("x=1"),
            Header::from_pairs([("X-Tenant", "globex"), ("X-Region", "eu")]),
        );
        assert_eq!(cache.strategy_key(&other), "GET:/a?x=1:globex:eu");
    }

    #[test]
    fn test_ignore_query_shares_key() {
        let cache = EndpointCache::new(true).with_ignore_query(true);
        let first = request(Method::GET, "/a", Some("x=1"), Header::new());
        let second = request(Method::GET, "/a", Some("x=2"), Header::new());

        assert_eq!(cache.strategy_key(&first), cache.strategy_key(&second));
        assert_eq!(cache.strategy_key(&first), "GET:/a");
    }

    #[test]
    fn test_deserialize_endpoint_cache() {
        let cache: EndpointCache = serde_yaml::from_str(
            "enabled: true\nduration: 30s\nonly_if_status_codes: []\nallow_cache_control: true\n",
        )
        .unwrap();

        assert!(cache.enabled());
        assert_eq!(cache.only_if_status_codes(), Some(&[][..]));
        assert!(cache.only_if_methods().is_none());
        assert_eq!(cache.allow_cache_control(), Some(true));
    }
}
