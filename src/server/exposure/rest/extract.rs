//! Request context extraction

use crate::core::context::{OperationKind, RequestContext, TRACE_ID_HEADER};
use axum::extract::FromRequestParts;
use axum::http::Method;
use axum::http::request::Parts;
use std::convert::Infallible;
use uuid::Uuid;

fn operation_for(method: &Method) -> OperationKind {
    match *method {
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE => OperationKind::Write,
        _ => OperationKind::Read,
    }
}

/// Builds a [`RequestContext`] from the method and the `x-trace-id` header
///
/// A missing or malformed trace id starts a new trace.
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let operation = operation_for(&parts.method);
        let trace_id = parts
            .headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok());

        Ok(match trace_id {
            Some(id) => RequestContext::with_trace_id(id, operation),
            None => RequestContext::new(operation),
        })
    }
}
