//! Query parameter modifications, request side only.

use crate::core::types::{Request, Response};
use crate::core::values::Query;
use crate::modifier::{modify_map, Modifier, ModifierScope, ModifierStrategy};

pub struct QueryStrategy;

impl ModifierStrategy for QueryStrategy {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response) {
        let Some(values) = modifier.resolve_text(&request, &response) else {
            return (request, response);
        };
        let modify = |query: &Query| modify_map(query, modifier.action(), modifier.key(), &values);

        let request = request.map_current(|current| {
            let query = modify(current.query());
            current.with_query(query)
        });
        let request = match modifier.scope() {
            ModifierScope::Local => request,
            ModifierScope::Global => {
                let query = modify(request.query());
                request.with_query(query)
            }
        };
        (request, response)
    }
}
