//! Docker Registry token authentication (<https://distribution.github.io/distribution/spec/auth/token/>).

use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::auth::{challenge::Challenge, Credentials};
use crate::OciRegError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The realm/service/scope triple advertised by a `Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// The token endpoint to GET.
    pub realm: String,
    /// The service identifier the token should be scoped to.
    pub service: String,
    /// The access scope being requested, e.g. `"repository:library/alpine:pull"`.
    pub scope: Option<String>,
}

/// The token endpoint's JSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer token to present as `Authorization: Bearer <token>`.
    pub token: String,
    /// An alternate field some registries use instead of (or alongside) `token`.
    pub access_token: Option<String>,
    /// When the token was issued.
    pub issued_at: Option<DateTime<Utc>>,
    /// Seconds until the token expires.
    pub expires_in: Option<u64>,
    /// A refresh token, for registries that support offline tokens.
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// The token to actually send: `access_token` takes precedence over `token` when both
    /// are present, matching the precedence registries themselves use.
    pub fn effective_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.token)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a `Bearer` [`Challenge`] into its realm/service/scope components.
pub fn parse_bearer_challenge(challenge: &Challenge) -> Result<BearerChallenge, OciRegError> {
    if challenge.scheme != "bearer" {
        return Err(OciRegError::AuthFailed(format!(
            "expected a bearer challenge, got scheme '{}'",
            challenge.scheme
        )));
    }

    let realm = challenge
        .get("realm")
        .ok_or_else(|| OciRegError::AuthFailed("bearer challenge missing realm".into()))?
        .to_string();
    let service = challenge
        .get("service")
        .ok_or_else(|| OciRegError::AuthFailed("bearer challenge missing service".into()))?
        .to_string();
    let scope = challenge.get("scope").map(str::to_string);

    Ok(BearerChallenge {
        realm,
        service,
        scope,
    })
}

/// Fetches a bearer token from the realm named by `challenge`, optionally carrying `credentials`
/// as HTTP Basic auth on the token request itself (the Docker token spec allows, but does not
/// require, authenticating the token request).
pub async fn fetch_token(
    http: &ClientWithMiddleware,
    challenge: &BearerChallenge,
    credentials: Option<&Credentials>,
) -> Result<TokenResponse, OciRegError> {
    let client_id = credentials
        .map(|c| c.username.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let mut query = vec![
        ("service", challenge.service.clone()),
        ("client_id", client_id),
        ("offline_token", "true".to_string()),
    ];
    if let Some(scope) = &challenge.scope {
        query.push(("scope", scope.clone()));
    }

    let mut request = http.get(&challenge.realm).query(&query);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OciRegError::AuthFailed(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(OciRegError::from)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn challenge(params: &[(&str, &str)]) -> Challenge {
        let mut map = HashMap::new();
        for (k, v) in params {
            map.insert(k.to_string(), v.to_string());
        }
        Challenge {
            scheme: "bearer".to_string(),
            params: map,
        }
    }

    #[test]
    fn test_parse_bearer_challenge_full() {
        let c = challenge(&[
            ("realm", "https://auth.docker.io/token"),
            ("service", "registry.docker.io"),
            ("scope", "repository:library/alpine:pull"),
        ]);
        let parsed = parse_bearer_challenge(&c).unwrap();
        assert_eq!(parsed.realm, "https://auth.docker.io/token");
        assert_eq!(parsed.service, "registry.docker.io");
        assert_eq!(parsed.scope.as_deref(), Some("repository:library/alpine:pull"));
    }

    #[test]
    fn test_parse_bearer_challenge_missing_realm() {
        let c = challenge(&[("service", "registry.docker.io")]);
        assert!(parse_bearer_challenge(&c).is_err());
    }

    #[test]
    fn test_parse_bearer_challenge_wrong_scheme() {
        let mut c = challenge(&[("realm", "x"), ("service", "y")]);
        c.scheme = "basic".to_string();
        assert!(parse_bearer_challenge(&c).is_err());
    }

    #[test]
    fn test_token_response_prefers_access_token() {
        let resp = TokenResponse {
            token: "t".into(),
            access_token: Some("at".into()),
            issued_at: None,
            expires_in: None,
            refresh_token: None,
        };
        assert_eq!(resp.effective_token(), "at");
    }

    #[test]
    fn test_token_response_falls_back_to_token() {
        let resp = TokenResponse {
            token: "t".into(),
            access_token: None,
            issued_at: None,
            expires_in: None,
            refresh_token: None,
        };
        assert_eq!(resp.effective_token(), "t");
    }
}
