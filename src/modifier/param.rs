//! Path parameter modifications, request side only.
//!
//! Renaming a param also renames the matching `:name` placeholder of the backend path, so the
//! upstream URL keeps resolving.

use crate::core::types::{Request, Response};
use crate::core::values::Params;
use crate::modifier::{Modifier, ModifierAction, ModifierScope, ModifierStrategy};

pub struct ParamStrategy;

impl ModifierStrategy for ParamStrategy {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response) {
        let Some(values) = modifier.resolve_text(&request, &response) else {
            return (request, response);
        };
        let value = values.first().cloned().unwrap_or_default();
        let action = modifier.action();
        let key = modifier.key();
        let modify = |params: &Params| modify_params(params, action, key, &value);

        let request = request.map_current(|current| {
            let path = match action {
                ModifierAction::Rename => current.path().rename_param(key, &value),
                _ => current.path().clone(),
            };
            let params = modify(current.params());
            current.with_params(params).with_path(path)
        });

        let request = match modifier.scope() {
            ModifierScope::Local => request,
            ModifierScope::Global => {
                let params = modify(request.params());
                request.with_params(params)
            }
        };
        (request, response)
    }
}

fn modify_params(params: &Params, action: ModifierAction, key: &str, value: &str) -> Params {
    match action {
        ModifierAction::Set => params.set(key, value),
        ModifierAction::Add => params.add(key, value),
        ModifierAction::Replace => params.replace(key, value),
        ModifierAction::Remove => params.remove(key),
        ModifierAction::Rename => params.rename(key, value),
    }
}
