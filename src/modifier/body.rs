//! Body modifications addressed by dot paths (`user.tags.0`).
//!
//! Numeric segments index arrays. `SET` and `ADD` create missing intermediate objects and
//! start an empty JSON object when there is no body. Every other unresolvable path, and any
//! body that is not JSON, leaves the body unchanged.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::core::types::{Request, Response};
use crate::core::values::Body;
use crate::modifier::{Modifier, ModifierAction, ModifierContext, ModifierScope, ModifierStrategy};

pub struct BodyStrategy;

impl ModifierStrategy for BodyStrategy {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response) {
        let Some(operand) = modifier.resolve_json(&request, &response) else {
            return (request, response);
        };
        let path = parse_path(modifier.key());
        let modify = |body: Option<&Body>| modify_body(body, modifier.action(), &path, &operand);

        match (modifier.context(), modifier.scope()) {
            (ModifierContext::Request, scope) => {
                let request = request.map_current(|current| {
                    let body = modify(current.body());
                    current.with_body(body)
                });
                let request = match scope {
                    ModifierScope::Local => request,
                    ModifierScope::Global => {
                        let body = modify(request.body());
                        request.with_body(body)
                    }
                };
                (request, response)
            }
            (ModifierContext::Response, ModifierScope::Local) => {
                let response = response.map_current(|current| {
                    let body = modify(current.body());
                    current.with_body(body)
                });
                (request, response)
            }
            (ModifierContext::Response, ModifierScope::Global) => {
                let body = modify(response.body());
                (request, response.with_body(body))
            }
        }
    }
}

/// Split a dot path into segments; an empty key addresses the root
pub fn parse_path(key: &str) -> Vec<String> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Node at `path`, if every segment resolves
pub fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn modify_body(
    body: Option<&Body>,
    action: ModifierAction,
    path: &[String],
    operand: &Value,
) -> Option<Body> {
    let mut json = match body {
        Some(Body::Json(json)) => Arc::clone(json),
        None if matches!(action, ModifierAction::Set | ModifierAction::Add) => {
            Arc::new(Value::Object(Map::new()))
        }
        _ => {
            warn!(path = ?path, "Body modifier needs a JSON body, skipping");
            return body.cloned();
        }
    };
    let root = Arc::make_mut(&mut json);
    let applied = match action {
        ModifierAction::Set => set_path(root, path, operand.clone()),
        ModifierAction::Add => add_path(root, path, operand.clone()),
        ModifierAction::Replace => replace_path(root, path, operand.clone()),
        ModifierAction::Remove => remove_path(root, path).is_some(),
        ModifierAction::Rename => match operand {
            Value::String(new_key) => rename_path(root, path, new_key),
            _ => false,
        },
    };

    if !applied {
        warn!(path = ?path, action = ?action, "Body path could not be resolved, skipping");
        return body.cloned();
    }
    Some(Body::Json(json))
}

fn child_mut<'a>(node: &'a mut Value, segment: &str, create: bool) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => {
            if create && !map.contains_key(segment) {
                map.insert(segment.to_string(), Value::Object(Map::new()));
            }
            map.get_mut(segment)
        }
        Value::Array(items) => segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Parent node of the last segment, plus that segment
fn parent_mut<'a>(
    root: &'a mut Value,
    path: &'a [String],
    create: bool,
) -> Option<(&'a mut Value, &'a str)> {
    let (last, parents) = path.split_last()?;
    let mut node = root;
    for segment in parents {
        node = child_mut(node, segment, create)?;
    }
    Some((node, last.as_str()))
}

fn set_path(root: &mut Value, path: &[String], value: Value) -> bool {
    if path.is_empty() {
        *root = value;
        return true;
    }
    let Some((parent, last)) = parent_mut(root, path, true) else {
        return false;
    };
    match parent {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            true
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items[index] = value;
                true
            }
            Ok(index) if index == items.len() => {
                items.push(value);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn add_path(root: &mut Value, path: &[String], value: Value) -> bool {
    let existing = parent_mut(root, path, true)
        .and_then(|(parent, last)| child_mut(parent, last, false));

    match existing {
        Some(Value::Array(items)) => {
            items.push(value);
            true
        }
        Some(other) => {
            let previous = other.take();
            *other = Value::Array(vec![previous, value]);
            true
        }
        None => set_path(root, path, value),
    }
}

fn replace_path(root: &mut Value, path: &[String], value: Value) -> bool {
    if path.is_empty() {
        *root = value;
        return true;
    }
    match parent_mut(root, path, false).and_then(|(parent, last)| child_mut(parent, last, false)) {
        Some(node) => {
            *node = value;
            true
        }
        None => false,
    }
}

fn remove_path(root: &mut Value, path: &[String]) -> Option<Value> {
    let (parent, last) = parent_mut(root, path, false)?;
    match parent {
        Value::Object(map) => {
            let removed = map.get(last).cloned()?;
            map.retain(|key, _| key != last);
            Some(removed)
        }
        Value::Array(items) => {
            let index = last.parse::<usize>().ok().filter(|i| *i < items.len())?;
            Some(items.remove(index))
        }
        _ => None,
    }
}

/// Move the node at `path` to a sibling key named `new_key`
fn rename_path(root: &mut Value, path: &[String], new_key: &str) -> bool {
    let Some((parent, last)) = parent_mut(root, path, false) else {
        return false;
    };
    let Value::Object(map) = parent else {
        return false;
    };
    let Some(value) = map.get(last).cloned() else {
        return false;
    };
    map.retain(|key, _| key != last);
    map.insert(new_key.to_string(), value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::tests::{create_test_request, create_test_response, modifier};
    use crate::modifier::ModifierTarget;
    use serde_json::json;

    fn body_json(body: Option<&Body>) -> Value {
        body.and_then(Body::as_json).cloned().unwrap_or(Value::Null)
    }

    #[test]
    fn test_lookup_walks_objects_and_arrays() {
        let value = json!({"a": {"b": [10, {"c": true}]}});
        assert_eq!(lookup(&value, &parse_path("a.b.1.c")), Some(&json!(true)));
        assert_eq!(lookup(&value, &parse_path("a.b.5")), None);
        assert_eq!(lookup(&value, &parse_path("")), Some(&value));
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut value = json!({});
        assert!(set_path(&mut value, &parse_path("meta.source"), json!("gateway")));
        assert_eq!(value, json!({"meta": {"source": "gateway"}}));
    }

    #[test]
    fn test_add_appends_or_promotes_to_array() {
        let mut value = json!({"tags": ["a"], "single": 1});
        assert!(add_path(&mut value, &parse_path("tags"), json!("b")));
        assert!(add_path(&mut value, &parse_path("single"), json!(2)));
        assert!(add_path(&mut value, &parse_path("fresh"), json!(true)));
        assert_eq!(
            value,
            json!({"tags": ["a", "b"], "single": [1, 2], "fresh": true})
        );
    }

    #[test]
    fn test_replace_and_remove_require_existing_path() {
        let mut value = json!({"a": 1});
        assert!(!replace_path(&mut value, &parse_path("b"), json!(2)));
        assert!(replace_path(&mut value, &parse_path("a"), json!(2)));
        assert!(remove_path(&mut value, &parse_path("missing.deep")).is_none());
        assert_eq!(remove_path(&mut value, &parse_path("a")), Some(json!(2)));
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_rename_moves_value_to_sibling_key() {
        let mut value = json!({"user": {"name": "Ana"}});
        assert!(rename_path(&mut value, &parse_path("user.name"), "fullName"));
        assert_eq!(value, json!({"user": {"fullName": "Ana"}}));
        assert!(!rename_path(&mut value, &parse_path("user.age"), "years"));
    }

    #[test]
    fn test_local_request_body_modifier() {
        let m = modifier(
            ModifierContext::Request,
            ModifierScope::Local,
            ModifierTarget::Body,
            ModifierAction::Set,
            "user.age",
            Some("30"),
        );
        let request = create_test_request();
        let (request, _) = m.apply(request, Response::new());

        let current = body_json(request.current().unwrap().body());
        assert_eq!(current["user"]["age"], json!(30));
        assert!(body_json(request.body())["user"].get("age").is_none());
    }

    #[test]
    fn test_global_request_body_modifier_reads_reference() {
        let m = modifier(
            ModifierContext::Request,
            ModifierScope::Global,
            ModifierTarget::Body,
            ModifierAction::Set,
            "client",
            Some("#request.header.X-Client"),
        );
        let (request, _) = m.apply(create_test_request(), Response::new());

        assert_eq!(body_json(request.body())["client"], json!("web"));
        assert_eq!(
            body_json(request.current().unwrap().body())["client"],
            json!("web")
        );
    }

    #[test]
    fn test_response_body_remove() {
        let m = modifier(
            ModifierContext::Response,
            ModifierScope::Local,
            ModifierTarget::Body,
            ModifierAction::Remove,
            "secret",
            None,
        );
        let (_, response) = m.apply(create_test_request(), create_test_response());
        assert_eq!(body_json(response.current().unwrap().body()), json!({"id": 42}));
    }

    #[test]
    fn test_non_json_body_is_left_alone() {
        let m = modifier(
            ModifierContext::Response,
            ModifierScope::Global,
            ModifierTarget::Body,
            ModifierAction::Set,
            "a",
            Some("1"),
        );
        let response = Response::new().with_body(Some(Body::Text(Arc::from("plain"))));
        let (_, response) = m.apply(create_test_request(), response);
        assert_eq!(response.body(), Some(&Body::Text(Arc::from("plain"))));
    }

    #[test]
    fn test_set_on_missing_body_starts_json_object() {
        let set = modifier(
            ModifierContext::Response,
            ModifierScope::Global,
            ModifierTarget::Body,
            ModifierAction::Set,
            "meta.source",
            Some("gateway"),
        );
        let (_, response) = set.apply(create_test_request(), Response::new());
        assert_eq!(body_json(response.body()), json!({"meta": {"source": "gateway"}}));

        let replace = modifier(
            ModifierContext::Response,
            ModifierScope::Global,
            ModifierTarget::Body,
            ModifierAction::Replace,
            "meta",
            Some("1"),
        );
        let (_, response) = replace.apply(create_test_request(), Response::new());
        assert!(response.body().is_none());
    }
}
