//! Status code modifications, response side only. `SET` and `REPLACE` behave the same since a
//! response always has a status.

use tracing::warn;

use crate::core::types::{Request, Response};
use crate::modifier::{parse_status, Modifier, ModifierScope, ModifierStrategy};

pub struct StatusCodeStrategy;

impl ModifierStrategy for StatusCodeStrategy {
    fn execute(&self, modifier: &Modifier, request: Request, response: Response) -> (Request, Response) {
        let Some(operand) = modifier.resolve_json(&request, &response) else {
            return (request, response);
        };
        let Some(status) = parse_status(&operand) else {
            warn!(value = %operand, "Resolved value is not a status code, skipping");
            return (request, response);
        };

        let response = match modifier.scope() {
            ModifierScope::Local => response.map_current(|current| current.with_status(status)),
            ModifierScope::Global => response.with_status(status),
        };
        (request, response)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::modifier::tests::{create_test_request, create_test_response, modifier};
    use crate::modifier::{ModifierAction, ModifierContext, ModifierScope, ModifierTarget};

    #[test]
    fn test_local_status_code_set() {
        let m = modifier(
            ModifierContext::Response,
            ModifierScope::Local,
            ModifierTarget::StatusCode,
            ModifierAction::Set,
            "",
            Some("202"),
        );
        let (_, response) = m.apply(create_test_request(), create_test_response());

        assert_eq!(response.current().unwrap().status(), StatusCode::ACCEPTED);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_global_status_code_from_body_reference() {
        let m = modifier(
            ModifierContext::Response,
            ModifierScope::Global,
            ModifierTarget::StatusCode,
            ModifierAction::Replace,
            "",
            Some("#response.body.id"),
        );
        // body id 42 is not a valid status code
        let (_, response) = m.apply(create_test_request(), create_test_response());
        assert_eq!(response.status(), StatusCode::OK);

        let m = modifier(
            ModifierContext::Response,
            ModifierScope::Global,
            ModifierTarget::StatusCode,
            ModifierAction::Set,
            "",
            Some("#response.status_code"),
        );
        let local = modifier(
            ModifierContext::Response,
            ModifierScope::Local,
            ModifierTarget::StatusCode,
            ModifierAction::Set,
            "",
            Some("418"),
        );
        let (request, response) = local.apply(create_test_request(), create_test_response());
        let (_, response) = m.apply(request, response);
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
