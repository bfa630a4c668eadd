use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

/// How the client origin used for rate limiting is derived.
///
/// Installed as an `Extension` layer; absent means forwarded headers are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginPolicy {
    pub trust_forwarded_for: bool,
}

/// Identity of the peer for rate limiting: the first `X-Forwarded-For` hop
/// when trusted, else the socket address, else `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

impl ClientOrigin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let policy = parts
            .extensions
            .get::<OriginPolicy>()
            .copied()
            .unwrap_or_default();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(resolve_origin(&parts.headers, peer, policy))
    }
}

fn resolve_origin(headers: &HeaderMap, peer: Option<SocketAddr>, policy: OriginPolicy) -> ClientOrigin {
    if policy.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(hop) = forwarded {
            return ClientOrigin(hop.to_string());
        }
    }
    match peer {
        Some(addr) => ClientOrigin(addr.ip().to_string()),
        None => ClientOrigin("unknown".to_string()),
    }
}
