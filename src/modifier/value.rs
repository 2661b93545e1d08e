//! Modifier value expressions.
//!
//! A value is either a literal or a `#` reference into the exchange:
//!
//! | Expression | Resolves to |
//! |---|---|
//! | `#request.header.<name>` | pipeline request header values |
//! | `#request.query.<name>` | pipeline request query values |
//! | `#request.params.<name>` | pipeline request path param |
//! | `#request.body[.<path>]` | pipeline request body, or a node inside it |
//! | `#response.header.<name>` / `.body[.<path>]` / `.status_code` | backend response in progress |
//! | `#responses.<i>.header.<name>` / `.body[.<path>]` / `.status_code` | i-th completed backend response |

use serde_json::Value;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{BackendResponse, Request, Response};
use crate::core::values::{Body, Header};
use crate::modifier::body::{lookup, parse_path};

#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Literal(String),
    Reference(ValueRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    source: ValueSource,
    field: ValueField,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueSource {
    Request,
    Response,
    Responses(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueField {
    Header(String),
    Query(String),
    Param(String),
    Body(Vec<String>),
    StatusCode,
}

impl ValueExpr {
    /// Parse a configured value, validating references
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let Some(reference) = raw.strip_prefix('#') else {
            return Ok(ValueExpr::Literal(raw.to_string()));
        };

        let invalid = |reason: &str| {
            GatewayError::config(format!("Invalid value reference '{}': {}", raw, reason))
        };

        let mut segments = reference.splitn(2, '.');
        let root = segments.next().unwrap_or_default();
        let rest = segments.next().unwrap_or_default();

        let (source, rest) = match root {
            "request" => (ValueSource::Request, rest),
            "response" => (ValueSource::Response, rest),
            "responses" => {
                let (index, rest) = rest.split_once('.').unwrap_or((rest, ""));
                let index = index
                    .parse::<usize>()
                    .map_err(|_| invalid("expected a response index after 'responses'"))?;
                (ValueSource::Responses(index), rest)
            }
            _ => return Err(invalid("must start with request, response or responses")),
        };

        let (field, name) = rest.split_once('.').unwrap_or((rest, ""));
        let field = match (source, field) {
            (_, "header") => ValueField::Header(name.to_string()),
            (ValueSource::Request, "query") => ValueField::Query(name.to_string()),
            (ValueSource::Request, "params") => ValueField::Param(name.to_string()),
            (_, "body") => ValueField::Body(parse_path(name)),
            (ValueSource::Response | ValueSource::Responses(_), "status_code" | "statusCode") => {
                if !name.is_empty() {
                    return Err(invalid("status_code has no sub fields"));
                }
                ValueField::StatusCode
            }
            _ => return Err(invalid("unknown field")),
        };

        if let ValueField::Header(name) | ValueField::Query(name) | ValueField::Param(name) = &field
        {
            if name.is_empty() {
                return Err(invalid("a name is required"));
            }
        }

        Ok(ValueExpr::Reference(ValueRef { source, field }))
    }

    /// Resolve against the exchange; `None` when the referenced data is absent
    pub fn resolve(&self, request: &Request, response: &Response) -> Option<Value> {
        match self {
            ValueExpr::Literal(literal) => Some(Value::String(literal.clone())),
            ValueExpr::Reference(reference) => reference.resolve(request, response),
        }
    }
}

impl ValueRef {
    fn resolve(&self, request: &Request, response: &Response) -> Option<Value> {
        match self.source {
            ValueSource::Request => match &self.field {
                ValueField::Header(name) => header_value(request.header(), name),
                ValueField::Query(name) => strings_to_json(request.query().get_all(name)),
                ValueField::Param(name) => request
                    .params()
                    .get(name)
                    .map(|value| Value::String(value.to_string())),
                ValueField::Body(path) => body_value(request.body(), path),
                ValueField::StatusCode => None,
            },
            ValueSource::Response => response
                .current()
                .and_then(|current| self.resolve_backend(current)),
            ValueSource::Responses(index) => response
                .history()
                .get(index)
                .and_then(|backend| self.resolve_backend(backend)),
        }
    }

    fn resolve_backend(&self, backend: &BackendResponse) -> Option<Value> {
        match &self.field {
            ValueField::Header(name) => header_value(backend.header(), name),
            ValueField::Body(path) => body_value(backend.body(), path),
            ValueField::StatusCode => Some(Value::from(backend.status().as_u16())),
            ValueField::Query(_) | ValueField::Param(_) => None,
        }
    }
}

fn header_value(header: &Header, name: &str) -> Option<Value> {
    strings_to_json(header.get_all(name))
}

fn strings_to_json(values: &[String]) -> Option<Value> {
    match values {
        [] => None,
        [single] => Some(Value::String(single.clone())),
        many => Some(Value::Array(
            many.iter().cloned().map(Value::String).collect(),
        )),
    }
}

fn body_value(body: Option<&Body>, path: &[String]) -> Option<Value> {
    match body? {
        Body::Json(json) => lookup(json, path).cloned(),
        other if path.is_empty() => Some(other.to_json_value()),
        _ => None,
    }
}

/// Flatten a resolved value into header-style text values
pub(crate) fn json_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}
