//! # Modifier Engine
//!
//! Declarative rewrites applied to requests and responses as they move through an endpoint.
//! A [`Modifier`] is parsed and validated once from configuration and then reused by every
//! request; applying it never mutates its inputs, it returns the next request/response pair.
//!
//! ## Key Features
//! - Targets: path params, headers, query parameters, JSON bodies and status codes
//! - Actions: `SET`, `ADD`, `REPLACE`, `REMOVE`, `RENAME`
//! - `LOCAL` scope touches only the backend step in progress, `GLOBAL` scope also rewrites the
//!   pipeline state inherited by later backends and by the client response
//! - Values are literals or references into the request and earlier responses (see [`value`])
//! - Failures are best-effort: an unresolvable value or path logs a warning and skips the change
//!
//! ## Rust Concepts Used
//! - Each target is handled by a unit struct implementing [`ModifierStrategy`]; the dispatch
//!   table is a `match` returning `&'static dyn ModifierStrategy`

pub mod body;
pub mod header;
pub mod param;
pub mod query;
pub mod status_code;
pub mod value;

pub use value::ValueExpr;

use axum::http::{HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::config::ModifierConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Request, Response};
use crate::core::values::{KeyRule, ValueMap};

/// Which half of the exchange a modifier runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModifierContext {
    Request,
    Response,
}

/// How far a modification propagates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModifierScope {
    /// Only the backend step currently executing
    #[default]
    Local,
    /// The pipeline request/response seen by later backends and the client
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModifierTarget {
    Param,
    Header,
    Query,
    Body,
    StatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModifierAction {
    Set,
    Add,
    Replace,
    Remove,
    Rename,
}

/// Strategy for one modifier target
pub trait ModifierStrategy: Send + Sync {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response);
}

impl ModifierTarget {
    /// Dispatch table from target to its strategy
    pub fn strategy(self) -> &'static dyn ModifierStrategy {
        match self {
            ModifierTarget::Param => &param::ParamStrategy,
            ModifierTarget::Header => &header::HeaderStrategy,
            ModifierTarget::Query => &query::QueryStrategy,
            ModifierTarget::Body => &body::BodyStrategy,
            ModifierTarget::StatusCode => &status_code::StatusCodeStrategy,
        }
    }
}

/// A validated modification directive
#[derive(Debug, Clone)]
pub struct Modifier {
    context: ModifierContext,
    scope: ModifierScope,
    target: ModifierTarget,
    action: ModifierAction,
    key: String,
    value: Option<ValueExpr>,
}

impl Modifier {
    /// Validate a configured modifier for the given context
    pub fn new(context: ModifierContext, config: &ModifierConfig) -> GatewayResult<Self> {
        let describe = || {
            format!(
                "{:?} modifier {:?} {:?} '{}'",
                context, config.action, config.target, config.key
            )
        };

        match (config.target, context) {
            (ModifierTarget::Param | ModifierTarget::Query, ModifierContext::Response) => {
                return Err(GatewayError::config(format!(
                    "{}: target is only available on requests",
                    describe()
                )));
            }
            (ModifierTarget::StatusCode, ModifierContext::Request) => {
                return Err(GatewayError::config(format!(
                    "{}: status codes can only be modified on responses",
                    describe()
                )));
            }
            _ => {}
        }

        if config.target == ModifierTarget::StatusCode {
            if !matches!(config.action, ModifierAction::Set | ModifierAction::Replace) {
                return Err(GatewayError::config(format!(
                    "{}: status codes only support SET and REPLACE",
                    describe()
                )));
            }
        } else if config.key.trim().is_empty() {
            return Err(GatewayError::config(format!("{}: key is required", describe())));
        }

        if config.target == ModifierTarget::Header {
            HeaderName::from_bytes(config.key.as_bytes()).map_err(|e| {
                GatewayError::config(format!("{}: invalid header name: {}", describe(), e))
            })?;
        }

        let value = match (&config.value, config.action) {
            (_, ModifierAction::Remove) => None,
            (None, _) => {
                return Err(GatewayError::config(format!("{}: value is required", describe())));
            }
            (Some(raw), ModifierAction::Rename) => {
                if raw.trim().is_empty() || raw.starts_with('#') {
                    return Err(GatewayError::config(format!(
                        "{}: RENAME needs the new key as a literal value",
                        describe()
                    )));
                }
                Some(ValueExpr::Literal(raw.clone()))
            }
            (Some(raw), _) => Some(ValueExpr::parse(raw)?),
        };

        if let (ModifierTarget::StatusCode, Some(ValueExpr::Literal(raw))) =
            (config.target, &value)
        {
            parse_status(&Value::String(raw.clone())).ok_or_else(|| {
                GatewayError::config(format!("{}: '{}' is not a status code", describe(), raw))
            })?;
        }

        Ok(Self {
            context,
            scope: config.scope,
            target: config.target,
            action: config.action,
            key: config.key.clone(),
            value,
        })
    }

    pub fn context(&self) -> ModifierContext {
        self.context
    }

    pub fn scope(&self) -> ModifierScope {
        self.scope
    }

    pub fn target(&self) -> ModifierTarget {
        self.target
    }

    pub fn action(&self) -> ModifierAction {
        self.action
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&ValueExpr> {
        self.value.as_ref()
    }

    /// Apply this modifier, returning the next request/response pair
    pub fn apply(&self, request: Request, response: Response) -> (Request, Response) {
        debug!(
            target = ?self.target,
            action = ?self.action,
            scope = ?self.scope,
            key = %self.key,
            "Applying modifier"
        );
        self.target.strategy().execute(self, request, response)
    }

    /// Operand as text values, for params, headers and query parameters.
    ///
    /// `REMOVE` needs no operand and yields an empty list. `None` means the value could not be
    /// resolved and the modification must be skipped.
    pub(crate) fn resolve_text(&self, request: &Request, response: &Response) -> Option<Vec<String>> {
        if self.action == ModifierAction::Remove {
            return Some(Vec::new());
        }

        let values = match &self.value {
            Some(ValueExpr::Literal(literal)) => vec![literal.clone()],
            Some(expr) => expr
                .resolve(request, response)
                .map(|resolved| value::json_to_strings(&resolved))
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if values.is_empty() {
            self.warn_unresolved();
            return None;
        }
        Some(values)
    }

    /// Operand as JSON, for bodies and status codes. Literals that parse as JSON are used as
    /// JSON, anything else as a string.
    pub(crate) fn resolve_json(&self, request: &Request, response: &Response) -> Option<Value> {
        if self.action == ModifierAction::Remove {
            return Some(Value::Null);
        }

        let resolved = match &self.value {
            Some(ValueExpr::Literal(literal)) => Some(
                serde_json::from_str(literal).unwrap_or_else(|_| Value::String(literal.clone())),
            ),
            Some(expr) => expr.resolve(request, response),
            None => None,
        };

        if resolved.is_none() {
            self.warn_unresolved();
        }
        resolved
    }

    fn warn_unresolved(&self) {
        warn!(
            target = ?self.target,
            action = ?self.action,
            key = %self.key,
            value = ?self.value,
            "Modifier value could not be resolved, skipping"
        );
    }
}

/// Apply modifiers in order
pub fn apply_all<'a>(
    modifiers: impl IntoIterator<Item = &'a Modifier>,
    request: Request,
    response: Response,
) -> (Request, Response) {
    modifiers
        .into_iter()
        .fold((request, response), |(request, response), modifier| {
            modifier.apply(request, response)
        })
}

/// Apply an action to a multi-valued map such as headers or query parameters
pub(crate) fn modify_map<R: KeyRule>(
    map: &ValueMap<R>,
    action: ModifierAction,
    key: &str,
    values: &[String],
) -> ValueMap<R> {
    match action {
        ModifierAction::Set => map.set_all(key, values.to_vec()),
        ModifierAction::Add => values
            .iter()
            .fold(map.clone(), |acc, value| acc.add(key, value.as_str())),
        ModifierAction::Replace => map.replace(key, values.to_vec()),
        ModifierAction::Remove => map.remove(key),
        ModifierAction::Rename => match values.first() {
            Some(to) => map.rename(key, to),
            None => map.clone(),
        },
    }
}

pub(crate) fn parse_status(value: &Value) -> Option<StatusCode> {
    let code = match value {
        Value::Number(number) => number.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u16>().ok(),
        _ => None,
    }?;
    StatusCode::from_u16(code).ok()
}
