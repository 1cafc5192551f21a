//! Default values and environment variables consumed by this crate.

use std::io::Cursor;
use std::time::Duration;

use rustls::pki_types::PrivateKeyDer;

use crate::{OciRegError, Result};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default OCI reference registry domain, used when a reference omits one.
pub const DEFAULT_OCI_REFERENCE_REGISTRY: &str = "docker.io";

/// Docker Hub's official API endpoint host.
pub const DOCKER_HUB_OFFICIAL_HOST: &str = "registry.hub.docker.com";

/// Legacy Docker Hub host some registries still accept for v2 API calls.
pub const DOCKER_HUB_LEGACY_HOST: &str = "registry-1.docker.io";

/// The service name Docker Hub's token endpoint expects in the `service` query parameter.
pub const DOCKER_HUB_AUTH_SERVICE: &str = "registry.docker.io";

/// The default OCI reference tag, used when a reference omits one.
pub const DEFAULT_OCI_REFERENCE_TAG: &str = "latest";

/// The default OCI reference repository namespace, prepended to unqualified repository names.
pub const DEFAULT_OCI_REFERENCE_REPO_NAMESPACE: &str = "library";

/// Minimum chunk size accepted by [`crate::blob::BlobWriter::write`] (4 MiB).
pub const MIN_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Maximum chunk size accepted by [`crate::blob::BlobWriter::write`] (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Default per-request timeout applied by [`crate::client::Client`] unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of transient-failure retries the transport layer performs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Environment variable holding a PEM-encoded private key used to sign Schema 1 manifests.
pub const SCHEMA1_SIGNING_KEY_ENV: &str = "MOBY_DISTRIBUTION_PRIVATE_KEY";

/// Environment variable holding the password for [`SCHEMA1_SIGNING_KEY_ENV`], if the key is encrypted.
pub const SCHEMA1_SIGNING_KEY_PASSWORD_ENV: &str = "MOBY_DISTRIBUTION_PRIVATE_KEY_PASSWORD";

/// Reads the default registry domain to use for unqualified image references, honoring
/// the `OCIREG_DEFAULT_REGISTRY` environment variable override.
pub fn default_registry() -> String {
    std::env::var("OCIREG_DEFAULT_REGISTRY").unwrap_or_else(|_| DEFAULT_OCI_REFERENCE_REGISTRY.to_string())
}

/// Loads the Schema 1 signing key from [`SCHEMA1_SIGNING_KEY_ENV`], if set, parses it as a PEM
/// private key, and returns its DER bytes for a [`crate::manifest::Schema1Signer`] implementation
/// to sign with. This crate only reads and decodes the key; it does not compute signatures
/// itself, and does not support key decryption, so a key protected by
/// [`SCHEMA1_SIGNING_KEY_PASSWORD_ENV`] is rejected rather than silently ignored.
pub fn load_schema1_signing_key_der() -> Result<Option<Vec<u8>>> {
    let Ok(pem) = std::env::var(SCHEMA1_SIGNING_KEY_ENV) else {
        return Ok(None);
    };

    if std::env::var(SCHEMA1_SIGNING_KEY_PASSWORD_ENV).is_ok() {
        return Err(OciRegError::NotImplemented(
            "encrypted Schema 1 signing keys are not supported".into(),
        ));
    }

    let mut reader = Cursor::new(pem.into_bytes());
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| OciRegError::InvalidState(format!("invalid Schema 1 signing key PEM: {e}")))?
        .ok_or_else(|| OciRegError::InvalidState("Schema 1 signing key PEM contained no private key".into()))?;

    Ok(Some(key.secret_der().to_vec()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_schema1_signing_key_der_absent_env_returns_none() {
        std::env::remove_var(SCHEMA1_SIGNING_KEY_ENV);
        std::env::remove_var(SCHEMA1_SIGNING_KEY_PASSWORD_ENV);
        assert!(load_schema1_signing_key_der().unwrap().is_none());
    }
}
