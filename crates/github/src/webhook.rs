use std::{fmt::Display, sync::Arc};

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sig_check_core::config::Config;

use crate::events::WebhookEvent;

/// Verify an `X-Hub-Signature-256` header value (`sha256=<hexdigest>`)
/// against the raw request body. Comparison is constant-time via
/// [`Mac::verify_slice`].
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(digest) = hex::decode(digest) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&digest).is_ok()
}

/// Verify and extract a GitHub webhook event payload.
///
/// Verification runs over the exact raw body bytes; the body is only parsed
/// after the signature checks out. Authentication failures reject with 401,
/// malformed requests with 400.
#[derive(Debug)]
#[must_use]
pub struct GitHubEvent {
    pub event: WebhookEvent,
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(status: StatusCode, m: impl Display) -> Response {
            tracing::error!("{m}");
            (status, m.to_string()).into_response()
        }
        let event_name = req
            .headers()
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "X-GitHub-Event header missing"))?
            .to_string();
        let signature = req
            .headers()
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::UNAUTHORIZED, "X-Hub-Signature-256 missing"))?
            .to_string();
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| err(StatusCode::BAD_REQUEST, "error reading body"))?;
        if !verify_signature(&config.github.webhook_secret, &body, &signature) {
            return Err(err(StatusCode::UNAUTHORIZED, "signature mismatch"));
        }
        let event = WebhookEvent::from_header_and_body(&event_name, &body)
            .map_err(|e| err(StatusCode::BAD_REQUEST, format!("error parsing body: {e}")))?;
        Ok(GitHubEvent { event })
    }
}
