//! Header modifications for requests and responses.

use crate::core::types::{Request, Response};
use crate::core::values::Header;
use crate::modifier::{modify_map, Modifier, ModifierContext, ModifierScope, ModifierStrategy};

pub struct HeaderStrategy;

impl ModifierStrategy for HeaderStrategy {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response) {
        let Some(values) = modifier.resolve_text(&request, &response) else {
            return (request, response);
        };
        let modify = |header: &Header| modify_map(header, modifier.action(), modifier.key(), &values);

        match (modifier.context(), modifier.scope()) {
            (ModifierContext::Request, scope) => {
                let request = request.map_current(|current| {
                    let header = modify(current.header());
                    current.with_header(header)
                });
                let request = match scope {
                    ModifierScope::Local => request,
                    ModifierScope::Global => {
                        let header = modify(request.header());
                        request.with_header(header)
                    }
                };
                (request, response)
            }
            (ModifierContext::Response, ModifierScope::Local) => {
                let response = response.map_current(|current| {
                    let header = modify(current.header());
                    current.with_header(header)
                });
                (request, response)
            }
            (ModifierContext::Response, ModifierScope::Global) => {
                let header = modify(response.header());
                (request, response.with_header(header))
            }
        }
    }
}
