//! Manifest retrieval and publication across the three schema dialects a registry may speak:
//! Docker Schema 1 (legacy, JWS-signed), Docker Schema 2, and OCI image manifest v1.
//!
//! Grounded on `moby_distribution.spec.manifest` for the field sets and
//! `moby_distribution.registry.resources.image`'s `ManifestRef` call sites (the resource
//! module itself wasn't available to read directly, so its `get`/`get_metadata`/`put`/`delete`
//! surface is inferred from how `Tags` and `ImageRef` use it).

use std::collections::HashMap;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::digest::sha256_digest;
use crate::transport::validate_status;
use crate::url::build_manifests_url;
use crate::{OciRegError, Result};

//--------------------------------------------------------------------------------------------------
// Media types
//--------------------------------------------------------------------------------------------------

/// Schema 1 (legacy, signed) manifest media type.
pub const MEDIA_TYPE_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Schema 2 manifest media type.
pub const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker container image config media type.
pub const MEDIA_TYPE_CONFIG_DOCKER: &str = "application/vnd.docker.container.image.v1+json";
/// OCI image config media type.
pub const MEDIA_TYPE_CONFIG_OCI: &str = "application/vnd.oci.image.config.v1+json";
/// Docker layer (gzipped tar diff) media type.
pub const MEDIA_TYPE_LAYER_DOCKER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
/// OCI layer (gzipped tar) media type.
pub const MEDIA_TYPE_LAYER_OCI: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A Schema 1 filesystem layer reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    /// The layer's digest.
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// A Schema 1 history entry: the raw v1-compatibility JSON blob for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema1History {
    /// Raw JSON (as a string) describing the v1-format image config for this layer.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// A JSON Web Signature block, as attached to a published Schema 1 manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jws {
    /// The JWS protected header, pre-base64.
    pub header: Value,
    /// Base64url-encoded protected header.
    pub protected: String,
    /// Base64url-encoded signature.
    pub signature: String,
}

/// The legacy, JWS-signed Schema 1 manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSchema1 {
    /// Always `1`.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Repository name.
    pub name: String,
    /// Tag this manifest was published under; MUST match the reference used to `put` it.
    pub tag: String,
    /// Target architecture.
    pub architecture: String,
    /// Layers, ordered from base to top.
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    /// Per-layer v1-compatibility history, parallel to `fs_layers`.
    pub history: Vec<Schema1History>,
    /// JWS signatures, present once published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<Jws>>,
}

/// A content descriptor as embedded in a Schema 2 or OCI manifest (config or layer entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestContentDescriptor {
    /// The referenced content's media type.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Size in bytes. Canonically an integer; some registries have been seen emitting it as a
    /// string, but this crate always emits and expects an integer.
    pub size: u64,
    /// The referenced content's digest.
    pub digest: String,
    /// Alternate URLs to fetch the content from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// The modern Schema 2 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSchema2 {
    /// Always `2`.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Always [`MEDIA_TYPE_SCHEMA2`].
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// The image configuration blob.
    pub config: ManifestContentDescriptor,
    /// Layers, ordered from base to top.
    pub layers: Vec<ManifestContentDescriptor>,
}

impl ManifestSchema2 {
    /// Builds a Schema 2 manifest from a config and layer set.
    pub fn new(config: ManifestContentDescriptor, layers: Vec<ManifestContentDescriptor>) -> Self {
        ManifestSchema2 {
            schema_version: 2,
            media_type: MEDIA_TYPE_SCHEMA2.to_string(),
            config,
            layers,
        }
    }
}

/// The OCI image manifest. `schemaVersion` is genuinely `2` here too — the field name is
/// shared with Schema 2, not a bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestOci {
    /// Always `2`.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Always [`MEDIA_TYPE_OCI`].
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// The image configuration blob.
    pub config: ManifestContentDescriptor,
    /// Layers, ordered from base to top.
    pub layers: Vec<ManifestContentDescriptor>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// The three manifest dialects this crate understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// Legacy, JWS-signed Schema 1.
    Schema1(ManifestSchema1),
    /// Schema 2.
    Schema2(ManifestSchema2),
    /// OCI image manifest v1.
    Oci(ManifestOci),
}

impl Manifest {
    /// The media type to send as `Content-Type`/`Accept` for this variant.
    pub fn media_type(&self) -> &str {
        match self {
            Manifest::Schema1(_) => MEDIA_TYPE_SCHEMA1,
            Manifest::Schema2(m) => &m.media_type,
            Manifest::Oci(m) => &m.media_type,
        }
    }
}

/// Metadata about a manifest, without its full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    /// The manifest's `Content-Type`.
    pub media_type: String,
    /// The manifest body's size in bytes.
    pub size: u64,
    /// The manifest's digest.
    pub digest: String,
}

/// Signs a canonical, unsigned Schema 1 manifest body, producing the `signatures` block the
/// registry expects. Left pluggable: JWS signing is an external collaborator this crate does
/// not implement itself (see the crate-level documentation). Implementations that key off the
/// conventional environment variables can load the key material with
/// [`crate::config::load_schema1_signing_key_der`].
pub trait Schema1Signer {
    /// Signs `canonical_body` (the manifest serialized without a `signatures` field) and
    /// returns the JWS entries to attach.
    fn sign(&self, canonical_body: &[u8]) -> Result<Vec<Jws>>;
}

/// A manifest resource scoped to one repository and reference (tag or digest).
pub struct ManifestRef {
    repo: String,
    reference: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestRef {
    /// A manifest resource for `repo` at `reference` (a tag or a `algo:hex` digest string).
    pub fn new(repo: impl Into<String>, reference: impl Into<String>) -> Self {
        ManifestRef {
            repo: repo.into(),
            reference: reference.into(),
        }
    }

    /// Fetches and parses the manifest, requesting `media_type` via `Accept`.
    pub async fn get(&self, client: &Client, media_type: &str) -> Result<Manifest> {
        let response = self.fetch(client, media_type).await?;
        let bytes = response.bytes().await?;
        parse_manifest(media_type, &bytes)
    }

    /// Fetches the manifest and reports only its size/digest/media type, without requiring the
    /// caller to parse the body.
    pub async fn get_metadata(&self, client: &Client, media_type: &str) -> Result<ManifestDescriptor> {
        let response = self.fetch(client, media_type).await?;
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(bytes.len() as u64);
        let reported_media_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(media_type)
            .to_string();
        let digest = headers
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| sha256_digest(&bytes));

        Ok(ManifestDescriptor {
            media_type: reported_media_type,
            size,
            digest,
        })
    }

    /// Publishes a Schema 2 or OCI manifest. Schema 1 publication requires a signer and goes
    /// through [`ManifestRef::put_schema1`] instead.
    pub async fn put(&self, client: &Client, manifest: &Manifest) -> Result<()> {
        match manifest {
            Manifest::Schema1(_) => Err(OciRegError::NotImplemented(
                "Schema 1 manifest publication requires a Schema1Signer; use put_schema1".into(),
            )),
            Manifest::Schema2(m) => {
                let body = serde_json::to_vec(m)?;
                self.put_bytes(client, MEDIA_TYPE_SCHEMA2, &body).await
            }
            Manifest::Oci(m) => {
                let body = serde_json::to_vec(m)?;
                self.put_bytes(client, MEDIA_TYPE_OCI, &body).await
            }
        }
    }

    /// Publishes a Schema 1 manifest, signing it with `signer` first. `manifest.tag` must match
    /// this resource's reference.
    pub async fn put_schema1(
        &self,
        client: &Client,
        manifest: &ManifestSchema1,
        signer: &dyn Schema1Signer,
    ) -> Result<()> {
        if manifest.tag != self.reference {
            return Err(OciRegError::InvalidState(format!(
                "manifest tag '{}' does not match reference '{}'",
                manifest.tag, self.reference
            )));
        }

        let mut unsigned = manifest.clone();
        unsigned.signatures = None;
        let canonical = serde_json::to_vec(&unsigned)?;

        let mut signed = manifest.clone();
        signed.signatures = Some(signer.sign(&canonical)?);
        let body = serde_json::to_vec(&signed)?;

        self.put_bytes(client, MEDIA_TYPE_SCHEMA1, &body).await
    }

    /// Deletes the manifest.
    pub async fn delete(&self, client: &Client) -> Result<()> {
        let url = build_manifests_url(client.api_base_url(), &self.repo, &self.reference);
        let response = client.execute(|| client.http.delete(&url)).await?;
        validate_status(response, &[StatusCode::ACCEPTED]).await?;
        Ok(())
    }

    async fn fetch(&self, client: &Client, media_type: &str) -> Result<reqwest::Response> {
        let url = build_manifests_url(client.api_base_url(), &self.repo, &self.reference);
        let response = client
            .execute(|| client.http.get(&url).header(reqwest::header::ACCEPT, media_type))
            .await?;
        validate_status(response, &[StatusCode::OK]).await
    }

    async fn put_bytes(&self, client: &Client, media_type: &str, body: &[u8]) -> Result<()> {
        let url = build_manifests_url(client.api_base_url(), &self.repo, &self.reference);
        let body = body.to_vec();
        let response = client
            .execute(|| {
                client
                    .http
                    .put(&url)
                    .header(CONTENT_TYPE, media_type)
                    .body(body.clone())
            })
            .await?;
        validate_status(response, &[StatusCode::CREATED]).await?;
        Ok(())
    }
}

fn parse_manifest(media_type: &str, bytes: &[u8]) -> Result<Manifest> {
    match media_type {
        MEDIA_TYPE_SCHEMA1 => {
            let manifest: ManifestSchema1 = serde_json::from_slice(bytes)?;
            if manifest.schema_version != 1 {
                return Err(OciRegError::InvalidState(format!(
                    "expected schemaVersion 1 for Schema 1, got {}",
                    manifest.schema_version
                )));
            }
            Ok(Manifest::Schema1(manifest))
        }
        MEDIA_TYPE_SCHEMA2 => {
            let manifest: ManifestSchema2 = serde_json::from_slice(bytes)?;
            if manifest.schema_version != 2 {
                return Err(OciRegError::InvalidState(format!(
                    "expected schemaVersion 2 for Schema 2, got {}",
                    manifest.schema_version
                )));
            }
            Ok(Manifest::Schema2(manifest))
        }
        MEDIA_TYPE_OCI => {
            let manifest: ManifestOci = serde_json::from_slice(bytes)?;
            if manifest.schema_version != 2 {
                return Err(OciRegError::InvalidState(format!(
                    "expected schemaVersion 2 for the OCI manifest, got {}",
                    manifest.schema_version
                )));
            }
            Ok(Manifest::Oci(manifest))
        }
        other => Err(OciRegError::UnsupportedMediaType(other.to_string())),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
