//! Request execution: attaches cached credentials, and reacts to a `401` by satisfying the
//! `WWW-Authenticate` challenge and retrying exactly once.
//!
//! The upstream implementation this crate's behavior is modeled on re-entered the request
//! function via a sentinel exception on 401. That control flow doesn't translate cleanly to
//! Rust (or particularly want to); this is architected as a plain bounded loop instead.

use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use reqwest_middleware::RequestBuilder;

use crate::auth::authenticate;
use crate::client::Client;
use crate::OciRegError;

/// Maximum number of attempts for a single logical request: the original send, plus one retry
/// after satisfying a `401` challenge.
const MAX_ATTEMPTS: u32 = 2;

impl Client {
    /// Executes a request built fresh by `build` on every attempt, attaching the currently
    /// cached [`crate::auth::Authorization`] (if any). On a `401`, satisfies the challenge,
    /// caches the result, and retries `build()` exactly once more.
    pub(crate) async fn execute(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response, OciRegError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut builder = build();
            if let Some(authz) = self.authorization.lock().await.as_ref() {
                builder = builder.header(AUTHORIZATION, authz.header_value());
            }

            let response = builder.send().await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if attempt >= MAX_ATTEMPTS {
                return Err(OciRegError::PermissionDenied(
                    "still unauthorized after retrying with a fresh challenge response".into(),
                ));
            }

            let challenge_header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let Some(challenge_header) = challenge_header else {
                return Err(OciRegError::PermissionDenied(
                    "401 response carried no WWW-Authenticate challenge".into(),
                ));
            };

            let authorization =
                authenticate(&self.http, &challenge_header, self.credentials.as_ref()).await?;
            *self.authorization.lock().await = Some(authorization);
        }
    }
}

/// Validates that `response`'s status is one of `expected`, translating the common failure
/// statuses into their taxonomy-specific error and falling back to a generic `RequestError`
/// for everything else.
pub(crate) async fn validate_status(
    response: reqwest::Response,
    expected: &[StatusCode],
) -> Result<reqwest::Response, OciRegError> {
    let status = response.status();
    if expected.contains(&status) {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        let url = response.url().to_string();
        return Err(OciRegError::ResourceNotFound(url));
    }

    let body = response.text().await.unwrap_or_default();
    Err(OciRegError::RequestError {
        status: status.as_u16(),
        body,
    })
}
