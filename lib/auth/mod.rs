//! Authentication: challenge parsing and the Basic/Bearer authenticators that satisfy them.

pub mod basic;
pub mod bearer;
pub mod challenge;

use reqwest_middleware::ClientWithMiddleware;

pub use challenge::Challenge;

use crate::OciRegError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A username/password pair, supplied by the caller for registries that require credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The registry username.
    pub username: String,
    /// The registry password or access token.
    pub password: String,
}

/// A cached authorization the client can attach to subsequent requests without re-authenticating.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// A bearer token obtained from a token endpoint.
    Bearer(bearer::TokenResponse),
    /// A pre-built `Authorization: Basic ...` header value.
    Basic(String),
}

impl Authorization {
    /// The literal `Authorization` header value to send.
    pub fn header_value(&self) -> String {
        match self {
            Authorization::Bearer(token) => format!("Bearer {}", token.effective_token()),
            Authorization::Basic(header) => header.clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Satisfies a `WWW-Authenticate` challenge, dispatching to the Bearer or Basic authenticator
/// based on the challenge's scheme.
pub async fn authenticate(
    http: &ClientWithMiddleware,
    challenge_header: &str,
    credentials: Option<&Credentials>,
) -> Result<Authorization, OciRegError> {
    let challenge = Challenge::parse(challenge_header)?;

    match challenge.scheme.as_str() {
        "bearer" => {
            let bearer_challenge = bearer::parse_bearer_challenge(&challenge)?;
            let token = bearer::fetch_token(http, &bearer_challenge, credentials).await?;
            Ok(Authorization::Bearer(token))
        }
        "basic" => {
            let creds = credentials.ok_or_else(|| {
                OciRegError::AuthFailed("basic auth challenge requires credentials".into())
            })?;
            Ok(Authorization::Basic(basic::basic_auth_header(creds)))
        }
        other => Err(OciRegError::AuthFailed(format!(
            "unsupported auth scheme: {}",
            other
        ))),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest_middleware::ClientBuilder;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_client() -> ClientWithMiddleware {
        ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn test_authenticate_bearer_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.docker.io"))
            .and(query_param("scope", "repository:library/alpine:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc123",
                "expires_in": 300
            })))
            .mount(&server)
            .await;

        let header = format!(
            r#"Bearer realm="{}/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
            server.uri()
        );

        let authz = authenticate(&http_client(), &header, None).await.unwrap();
        assert_eq!(authz.header_value(), "Bearer abc123");
    }

    #[tokio::test]
    async fn test_authenticate_basic_requires_credentials() {
        let err = authenticate(&http_client(), r#"Basic realm="registry""#, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OciRegError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_authenticate_basic_builds_header() {
        let creds = Credentials {
            username: "aladdin".to_string(),
            password: "opensesame".to_string(),
        };
        let authz = authenticate(
            &http_client(),
            r#"Basic realm="registry""#,
            Some(&creds),
        )
        .await
        .unwrap();
        assert_eq!(authz.header_value(), "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
    }

    #[tokio::test]
    async fn test_authenticate_unsupported_scheme() {
        let err = authenticate(&http_client(), r#"Digest realm="registry""#, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OciRegError::AuthFailed(_)));
    }
}
