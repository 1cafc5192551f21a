//! Client construction: probing a host for TLS support, building the authenticated HTTP
//! client, and a process-wide default client callers may install once and share.

use std::sync::{Arc, OnceLock};

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::sync::Mutex;

use crate::auth::{Authorization, Credentials};
use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT, DOCKER_HUB_OFFICIAL_HOST};
use crate::probe::probe_endpoint;
use crate::OciRegError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A registry host to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname, optionally with a `:port` suffix (no scheme, no path).
    pub host: String,
    /// Whether this is Docker Hub's official endpoint (affects default repository namespacing
    /// upstream, not anything this crate does directly, but callers rely on the flag).
    pub official: bool,
}

impl Endpoint {
    /// The well-known Docker Hub endpoint.
    pub fn docker_hub() -> Self {
        Endpoint {
            host: DOCKER_HUB_OFFICIAL_HOST.to_string(),
            official: true,
        }
    }

    /// A custom registry endpoint.
    pub fn new(host: impl Into<String>) -> Self {
        Endpoint {
            host: host.into(),
            official: false,
        }
    }

    fn host_and_port(&self) -> (&str, u16) {
        match self.host.rsplit_once(':') {
            Some((h, p)) => (h, p.parse().unwrap_or(443)),
            None => (&self.host, 443),
        }
    }
}

/// An authenticated client for one registry host.
///
/// Not safe for concurrent use by multiple tasks against overlapping upload sessions;
/// the cached [`Authorization`] itself is behind an async mutex so ordinary read/pull
/// traffic from multiple tasks is fine.
pub struct Client {
    pub(crate) http: ClientWithMiddleware,
    pub(crate) api_base_url: String,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) authorization: Mutex<Option<Authorization>>,
    pub(crate) verify_tls: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Client {
    /// Builds a client for `endpoint`, probing it for HTTPS support and falling back to plain
    /// HTTP (with an unauthenticated ping check) when the probe can't establish a trusted
    /// HTTPS connection.
    pub async fn from_endpoint(
        endpoint: &Endpoint,
        credentials: Option<Credentials>,
    ) -> Result<Self, OciRegError> {
        let (host, port) = endpoint.host_and_port();
        let probe = probe_endpoint(host, port).await;

        let http = build_http_client();

        if probe.https_supported {
            let api_base_url = format!("https://{}", endpoint.host);
            if probe.cert_valid {
                return Ok(Client {
                    http,
                    api_base_url,
                    credentials,
                    authorization: Mutex::new(None),
                    verify_tls: true,
                });
            }

            let candidate = Client {
                http: build_http_client_insecure(),
                api_base_url: api_base_url.clone(),
                credentials: credentials.clone(),
                authorization: Mutex::new(None),
                verify_tls: false,
            };
            if candidate.ping().await {
                return Ok(candidate);
            }
        }

        Ok(Client {
            http,
            api_base_url: format!("http://{}", endpoint.host),
            credentials,
            authorization: Mutex::new(None),
            verify_tls: false,
        })
    }

    /// Builds a client directly from a base URL, skipping the TLS probe. Useful against mock
    /// servers and registries whose scheme is already known.
    pub fn from_base_url(api_base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        let api_base_url = api_base_url.into();
        let verify_tls = api_base_url.starts_with("https://");
        Client {
            http: build_http_client(),
            api_base_url,
            credentials,
            authorization: Mutex::new(None),
            verify_tls,
        }
    }

    /// The scheme+host (no trailing slash) this client issues requests against.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// GETs `/v2/` and reports whether the registry responded successfully.
    pub async fn ping(&self) -> bool {
        let url = crate::url::build_v2_url(&self.api_base_url);
        matches!(self.http.get(&url).send().await, Ok(resp) if resp.status().is_success() || resp.status() == reqwest::StatusCode::UNAUTHORIZED)
    }
}

fn build_http_client() -> ClientWithMiddleware {
    let reqwest_client = reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client configuration is always valid");

    wrap_with_retry(reqwest_client)
}

/// Like [`build_http_client`], but accepts certificates that don't validate. Only ever used for
/// the one-off ping that confirms an already-probed-as-untrusted endpoint is at least reachable
/// over TLS before falling further back to plain HTTP.
fn build_http_client_insecure() -> ClientWithMiddleware {
    let reqwest_client = reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .expect("reqwest client configuration is always valid");

    wrap_with_retry(reqwest_client)
}

fn wrap_with_retry(reqwest_client: reqwest::Client) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);

    ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

//--------------------------------------------------------------------------------------------------
// Default client
//--------------------------------------------------------------------------------------------------

static DEFAULT_CLIENT: OnceLock<Mutex<Option<Arc<Client>>>> = OnceLock::new();

fn default_client_slot() -> &'static Mutex<Option<Arc<Client>>> {
    DEFAULT_CLIENT.get_or_init(|| Mutex::new(None))
}

/// Returns the process-wide default client, constructing one against Docker Hub on first use.
pub async fn default_client() -> Result<Arc<Client>, OciRegError> {
    let slot = default_client_slot();
    let mut guard = slot.lock().await;
    if let Some(client) = guard.as_ref() {
        return Ok(client.clone());
    }

    let client = Arc::new(Client::from_endpoint(&Endpoint::docker_hub(), None).await?);
    *guard = Some(client.clone());
    Ok(client)
}

/// Replaces the process-wide default client. Intended for callers that want every subsequent
/// `default_client()` caller (including other modules in this process) to use a specific,
/// pre-authenticated client.
pub async fn set_default_client(client: Client) {
    let slot = default_client_slot();
    let mut guard = slot.lock().await;
    *guard = Some(Arc::new(client));
}
