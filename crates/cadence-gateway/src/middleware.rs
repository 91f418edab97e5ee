use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use cadence_core::auth::Caller;

use crate::auth;
use crate::state::AppState;

/// Extractor that resolves the caller from the Bearer header.
pub struct Authenticated(pub Caller);

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let bearer = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(auth::bearer_token);

        let result = auth::resolve_caller(&state.config, bearer);

        async move {
            match result {
                Some(caller) => Ok(Authenticated(caller)),
                None => Err(StatusCode::UNAUTHORIZED),
            }
        }
    }
}
