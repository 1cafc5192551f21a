use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an `ocireg` operation.
pub type Result<T> = std::result::Result<T, OciRegError>;

/// An error that occurred while talking to a Docker/OCI registry.
#[derive(pretty_error_debug::Debug, Error)]
pub enum OciRegError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred in the retry/auth middleware layer.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that occurred when encoding or decoding JSON.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The registry rejected our credentials at the token endpoint, or the
    /// `WWW-Authenticate` challenge was missing fields we need to authenticate.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A request was retried once after a 401 and still came back unauthorized,
    /// or came back 401 with no challenge we know how to satisfy.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested resource (manifest, blob, tag) does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The manifest media type in `Accept`/`Content-Type` isn't one this crate understands.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// A non-2xx response the crate has no more specific mapping for.
    #[error("request error ({status}): {body}")]
    RequestError {
        /// HTTP status code.
        status: u16,
        /// Raw response body, truncated by the caller if large.
        body: String,
    },

    /// A non-2xx response where the body is preserved for the caller to inspect further.
    #[error("request error with response ({status}): {body}")]
    RequestErrorWithResponse {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// An operation was attempted while the object was in a state that forbids it
    /// (e.g. `save()` on a dirty image, uploading a `Blob` with no source).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A computed digest didn't match the digest we expected.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest that was expected (caller-supplied or server-reported).
        expected: String,
        /// The digest actually computed from the bytes.
        actual: String,
    },

    /// An error that occurred when parsing an image reference selector with an invalid format.
    #[error("invalid reference selector format: {0}")]
    InvalidReferenceSelectorFormat(String),

    /// An error that occurred when parsing an invalid digest in a reference selector.
    #[error("invalid reference selector digest: {0}")]
    InvalidReferenceSelectorDigest(String),

    /// An error that occurred when parsing a `registry/repository:tag@digest` reference.
    #[error("invalid image reference: {0}")]
    ImageReferenceError(String),

    /// An error that occurred when hashing a file with an unsupported algorithm.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    /// An error that occurred while unpacking or hashing a layer tarball.
    #[error("layer handling error: {source}")]
    LayerHandling {
        /// The underlying IO error that occurred.
        source: std::io::Error,
        /// The layer (digest or path) being processed when the error occurred.
        layer: String,
    },

    /// An error that occurred while probing a registry endpoint for TLS support.
    #[error("endpoint probe error: {0}")]
    EndpointProbe(String),

    /// A feature is not yet implemented.
    #[error("feature not yet implemented: {0}")]
    NotImplemented(String),
}

/// An error that can represent any error, for escape-hatch situations that don't deserve
/// their own variant.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OciRegError {
    /// Wraps an arbitrary error in `OciRegError::Custom`.
    pub fn custom(error: impl Into<anyhow::Error>) -> OciRegError {
        OciRegError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the wrapped error to `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
