//! # Router Module
//!
//! Endpoint routing on a radix tree (`matchit`). Each distinct path template owns one slot
//! listing the methods configured for it, so a lookup can tell an unknown path (`404`) from a
//! known path requested with another method (`405`).
//!
//! ## Rust Concepts Used
//!
//! - `matchit` provides the radix tree and parameter extraction (`:name`, `*name`)
//! - Routes map to endpoint indices; the endpoints themselves live in the runtime

use axum::http::Method;
use matchit::{Match, Router as RadixRouter};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::values::Params;

/// Methods registered for one path template
#[derive(Debug)]
struct RouteSlot {
    template: String,
    methods: Vec<(Method, usize)>,
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Index of the endpoint in the runtime
    pub endpoint: usize,
    /// Path template the request matched
    pub template: String,
    pub params: Params,
}

/// Router from `(method, path)` to endpoint index
pub struct EndpointRouter {
    tree: RadixRouter<usize>,
    slots: Vec<RouteSlot>,
}

impl EndpointRouter {
    pub fn new() -> Self {
        Self {
            tree: RadixRouter::new(),
            slots: Vec::new(),
        }
    }

    /// Register `endpoint` under `method` and `template`.
    ///
    /// Conflicting templates and duplicate `(method, template)` pairs are configuration errors.
    pub fn insert(&mut self, method: Method, template: &str, endpoint: usize) -> GatewayResult<()> {
        let slot = match self.tree.at(template) {
            Ok(Match { value, .. }) if self.slots[*value].template == template => *value,
            _ => {
                let slot = self.slots.len();
                self.tree.insert(template, slot).map_err(|e| {
                    GatewayError::config(format!("Failed to add route {}: {}", template, e))
                })?;
                self.slots.push(RouteSlot {
                    template: template.to_string(),
                    methods: Vec::new(),
                });
                slot
            }
        };

        let slot = &mut self.slots[slot];
        if slot.methods.iter().any(|(m, _)| *m == method) {
            return Err(GatewayError::config(format!(
                "Duplicate route {} {}",
                method, template
            )));
        }
        slot.methods.push((method, endpoint));
        Ok(())
    }

    /// Find the endpoint serving `method` on `path`
    pub fn lookup(&self, method: &Method, path: &str) -> GatewayResult<RouteMatch> {
        let Ok(Match { value, params }) = self.tree.at(path) else {
            return Err(GatewayError::RouteNotFound {
                path: path.to_string(),
            });
        };
        let slot = &self.slots[*value];

        let endpoint = slot
            .methods
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, endpoint)| *endpoint)
            .ok_or_else(|| GatewayError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            })?;

        let params = Params::from_pairs(params.iter().map(|(key, value)| {
            let value = urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (key.to_string(), value)
        }));

        Ok(RouteMatch {
            endpoint,
            template: slot.template.clone(),
            params,
        })
    }

    /// Methods allowed on `path`, for the `Allow` header of a 405
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        match self.tree.at(path) {
            Ok(Match { value, .. }) => self.slots[*value]
                .methods
                .iter()
                .map(|(m, _)| m.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().map(|slot| slot.methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for EndpointRouter {
    fn default() -> Self {
        Self::new()
    }
}
