use cadence_core::auth::Caller;
use cadence_core::config::GatewayConfig;

/// Resolve a bearer key to the identity it was issued for.
///
/// There is no anonymous fallback: with no keys configured every
/// authenticated route answers 401.
pub fn resolve_caller(config: &GatewayConfig, bearer: Option<&str>) -> Option<Caller> {
    let bearer = bearer?;
    config
        .api_keys
        .iter()
        .find(|ak| !ak.key.is_empty() && ak.key == bearer)
        .map(|ak| Caller {
            id: ak.owner_id.clone(),
            name: ak.name.clone(),
        })
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
