//! Pull-into-memory, layer append, and push for multi-layer images.
//!
//! Grounded on `moby_distribution.registry.resources.image.ImageRef`: `from_image` mirrors its
//! classmethod of the same name, `add_layer` mirrors its two-branch (local/remote) layer
//! ingestion, and `push_v2`/`_upload_layer`/`_upload_config` mirror their namesakes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::blob::Blob;
use crate::client::Client;
use crate::image::json::ImageJson;
use crate::manifest::{
    Manifest, ManifestContentDescriptor, ManifestRef, ManifestSchema2, MEDIA_TYPE_CONFIG_DOCKER,
    MEDIA_TYPE_LAYER_DOCKER, MEDIA_TYPE_SCHEMA2,
};
use crate::{OciRegError, Result};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A reference to one image layer: either already present in a registry (`exists = true`) or
/// staged locally as a gzipped tar awaiting upload.
#[derive(Debug, Clone, Default)]
pub struct LayerRef {
    /// Source repository, for layers that already exist remotely.
    pub repo: Option<String>,
    /// The layer's compressed-blob digest, once known.
    pub digest: Option<String>,
    /// Compressed size in bytes.
    pub size: u64,
    /// Whether this layer already exists in a registry.
    pub exists: bool,
    /// Path to a local gzipped tar, for layers not yet uploaded.
    pub local_path: Option<PathBuf>,
}

impl LayerRef {
    /// A layer staged locally at `path`, a gzipped tar not yet known to any registry.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        LayerRef {
            local_path: Some(path.into()),
            exists: false,
            ..Default::default()
        }
    }

    /// A layer that already exists as `digest` in `repo`.
    pub fn remote(repo: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        LayerRef {
            repo: Some(repo.into()),
            digest: Some(digest.into()),
            size,
            exists: true,
            local_path: None,
        }
    }
}

/// An in-memory, editable view of a multi-layer image: pulled once, optionally appended to,
/// then pushed or saved.
pub struct ImageRef {
    repo: String,
    reference: String,
    layers: Vec<LayerRef>,
    initial_config: Vec<u8>,
    appended_diff_ids: Vec<String>,
    dirty: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRef {
    /// Pulls `from_repo:from_reference`'s Schema 2 manifest and config into memory, returning an
    /// `ImageRef` that will publish to `to_repo:to_reference` (defaulting to the source
    /// coordinates) on `push`.
    pub async fn from_image(
        client: &Client,
        from_repo: &str,
        from_reference: &str,
        to_repo: Option<&str>,
        to_reference: Option<&str>,
    ) -> Result<Self> {
        let manifest = ManifestRef::new(from_repo, from_reference)
            .get(client, MEDIA_TYPE_SCHEMA2)
            .await?;
        let schema2 = match manifest {
            Manifest::Schema2(m) => m,
            other => {
                return Err(OciRegError::UnsupportedMediaType(
                    other.media_type().to_string(),
                ))
            }
        };

        let layers = schema2
            .layers
            .iter()
            .map(|l| LayerRef::remote(from_repo, l.digest.clone(), l.size))
            .collect();

        let initial_config = Blob::with_digest(from_repo, &schema2.config.digest)
            .download_bytes(client, None)
            .await?;

        Ok(ImageRef {
            repo: to_repo.unwrap_or(from_repo).to_string(),
            reference: to_reference.unwrap_or(from_reference).to_string(),
            layers,
            initial_config,
            appended_diff_ids: Vec::new(),
            dirty: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_image_for_test(
        repo: &str,
        reference: &str,
        layers: Vec<LayerRef>,
        initial_config: Vec<u8>,
        appended_diff_ids: Vec<String>,
        dirty: bool,
    ) -> Self {
        ImageRef {
            repo: repo.to_string(),
            reference: reference.to_string(),
            layers,
            initial_config,
            appended_diff_ids,
            dirty,
        }
    }

    /// The repository this image will publish to.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The tag or digest this image will publish to.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The layers composing this image, in base-to-top order.
    pub fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    /// Whether this image has unpublished layer changes.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Appends `layer`, computing its compressed digest/size and uncompressed diff id.
    ///
    /// For a local layer, both passes read the file directly. For a remote layer, the blob is
    /// downloaded to a temporary file first (its declared `size`/`digest`, if set, are verified
    /// against what is actually downloaded).
    pub async fn add_layer(&mut self, client: &Client, mut layer: LayerRef) -> Result<ManifestContentDescriptor> {
        if !layer.exists && layer.local_path.is_none() {
            return Err(OciRegError::InvalidState(
                "layer has no local path and is not marked as already existing".into(),
            ));
        }

        let diff_id = if let Some(local_path) = layer.local_path.clone() {
            let (digest, size) = gzip_digest_and_size(&local_path).await?;
            let diff_id = gunzip_digest(&local_path).await?;

            if let Some(expected) = &layer.digest {
                if expected != &digest {
                    return Err(OciRegError::DigestMismatch {
                        expected: expected.clone(),
                        actual: digest,
                    });
                }
            }

            layer.digest = Some(digest);
            layer.repo = Some(self.repo.clone());
            layer.size = size;
            diff_id
        } else {
            let repo = layer
                .repo
                .clone()
                .ok_or_else(|| OciRegError::InvalidState("remote layer is missing its repo".into()))?;
            let digest = layer
                .digest
                .clone()
                .ok_or_else(|| OciRegError::InvalidState("remote layer is missing its digest".into()))?;

            let temp_dir = tempfile::tempdir()?;
            let temp_path = temp_dir.path().join("blob");
            Blob::with_digest(&repo, &digest)
                .download(client, None, &temp_path)
                .await?;

            let (actual_digest, actual_size) = gzip_digest_and_size(&temp_path).await?;
            if layer.size != 0 && layer.size != actual_size {
                return Err(OciRegError::InvalidState(format!(
                    "wrong size: expected {}, got {}",
                    layer.size, actual_size
                )));
            }
            if actual_digest != digest {
                return Err(OciRegError::DigestMismatch {
                    expected: digest,
                    actual: actual_digest,
                });
            }

            layer.size = actual_size;
            gunzip_digest(&temp_path).await?
        };

        let descriptor = ManifestContentDescriptor {
            media_type: MEDIA_TYPE_LAYER_DOCKER.to_string(),
            size: layer.size,
            digest: layer.digest.clone().expect("digest populated above"),
            urls: Vec::new(),
        };

        self.dirty = true;
        self.appended_diff_ids.push(diff_id);
        self.layers.push(layer);
        Ok(descriptor)
    }

    /// Parses the current image configuration, including any diff ids appended since pull.
    pub fn image_json(&self) -> Result<ImageJson> {
        let mut json: ImageJson = serde_json::from_slice(&self.initial_config)?;
        if self.dirty {
            json.rootfs.diff_ids.extend(self.appended_diff_ids.iter().cloned());
        }
        Ok(json)
    }

    /// The image configuration as the exact bytes that will be uploaded/saved.
    pub fn image_json_bytes(&self) -> Result<Vec<u8>> {
        if !self.dirty {
            return Ok(self.initial_config.clone());
        }
        Ok(serde_json::to_vec(&self.image_json()?)?)
    }

    /// Publishes this image. Only Schema 2 publication is currently supported.
    pub async fn push(&self, client: &Client) -> Result<ManifestSchema2> {
        self.push_v2(client).await
    }

    /// Publishes this image as a Schema 2 manifest: uploads/mounts every layer, uploads the
    /// config, then PUTs the manifest.
    pub async fn push_v2(&self, client: &Client) -> Result<ManifestSchema2> {
        let mut layer_descriptors = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            layer_descriptors.push(self.upload_layer(client, layer).await?);
        }

        let config_bytes = self.image_json_bytes()?;
        let config_descriptor = self.upload_config(client, &config_bytes).await?;

        let manifest = ManifestSchema2::new(config_descriptor, layer_descriptors);
        ManifestRef::new(&self.repo, &self.reference)
            .put(client, &Manifest::Schema2(manifest.clone()))
            .await?;
        Ok(manifest)
    }

    async fn upload_layer(&self, client: &Client, layer: &LayerRef) -> Result<ManifestContentDescriptor> {
        let digest = layer
            .digest
            .clone()
            .ok_or_else(|| OciRegError::InvalidState("layer is missing a digest".into()))?;

        let descriptor = if layer.exists && layer.repo.as_deref() != Some(self.repo.as_str()) {
            let from_repo = layer.repo.clone().expect("exists=true implies repo is set");
            let mut blob = Blob::with_digest(&self.repo, &digest);
            blob.mount_from(client, &from_repo).await?
        } else if !layer.exists {
            let local_path = layer
                .local_path
                .clone()
                .ok_or_else(|| OciRegError::InvalidState("layer has no local path to upload".into()))?;
            let mut blob = Blob::new(&self.repo);
            let file = tokio::fs::File::open(&local_path).await?;
            blob.upload_streaming(client, file).await?
        } else {
            Blob::with_digest(&self.repo, &digest).stat(client, None).await?
        };

        Ok(ManifestContentDescriptor {
            media_type: MEDIA_TYPE_LAYER_DOCKER.to_string(),
            size: descriptor.size,
            digest: descriptor.digest,
            urls: descriptor.urls,
        })
    }

    async fn upload_config(&self, client: &Client, bytes: &[u8]) -> Result<ManifestContentDescriptor> {
        let mut blob = Blob::new(&self.repo);
        let descriptor = blob.upload_monolithic(client, bytes).await?;
        Ok(ManifestContentDescriptor {
            media_type: MEDIA_TYPE_CONFIG_DOCKER.to_string(),
            size: descriptor.size,
            digest: descriptor.digest,
            urls: descriptor.urls,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads a (presumed gzipped) file, returning its sha256 digest and byte size.
pub(crate) async fn gzip_digest_and_size(path: &Path) -> Result<(String, u64)> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<(String, u64)> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((format!("sha256:{}", hex::encode(hasher.finalize())), size))
    })
    .await
    .map_err(OciRegError::from)?;
    result.map_err(OciRegError::from)
}

/// Decompresses a gzipped file, returning the sha256 digest of its plaintext (the diff id).
pub(crate) async fn gunzip_digest(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Read;
        let file = std::fs::File::open(&path)?;
        let mut decoder = flate2::read::GzDecoder::new(file);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = decoder.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    })
    .await
    .map_err(OciRegError::from)?;
    result.map_err(OciRegError::from)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn empty_gzip_tar(path: &Path) {
        let tar_file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut builder = tar::Builder::new(tar_file.reopen().unwrap());
            builder.finish().unwrap();
        }
        let tar_bytes = std::fs::read(tar_file.path()).unwrap();

        let gz = std::fs::File::create(path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(gz, flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn test_add_layer_computes_digest_and_well_known_empty_tar_diff_id() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("layer.tar.gz");
        empty_gzip_tar(&gz_path);

        let client = Client::from_base_url("https://r.io", None);
        let mut image = ImageRef {
            repo: "library/alpine".to_string(),
            reference: "latest".to_string(),
            layers: Vec::new(),
            initial_config: serde_json::to_vec(&serde_json::json!({
                "created": "2024-01-01T00:00:00Z",
                "architecture": "amd64",
                "os": "linux",
                "config": {},
                "rootfs": {"diff_ids": []},
                "history": []
            }))
            .unwrap(),
            appended_diff_ids: Vec::new(),
            dirty: false,
        };

        let descriptor = image.add_layer(&client, LayerRef::local(&gz_path)).await.unwrap();
        assert!(image.dirty());
        assert_eq!(descriptor.size, std::fs::metadata(&gz_path).unwrap().len());

        let json = image.image_json().unwrap();
        assert_eq!(
            json.rootfs.diff_ids,
            vec!["sha256:5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_layer_rejects_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("layer.tar.gz");
        empty_gzip_tar(&gz_path);

        let client = Client::from_base_url("https://r.io", None);
        let mut image = ImageRef {
            repo: "library/alpine".to_string(),
            reference: "latest".to_string(),
            layers: Vec::new(),
            initial_config: b"{}".to_vec(),
            appended_diff_ids: Vec::new(),
            dirty: false,
        };

        let mut layer = LayerRef::local(&gz_path);
        layer.digest = Some("sha256:wrong".to_string());
        let err = image.add_layer(&client, layer).await.unwrap_err();
        assert!(matches!(err, OciRegError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_push_v2_appended_layer_uploads_config_and_manifest() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("layer.tar.gz");
        empty_gzip_tar(&gz_path);
        let layer_digest = gzip_digest_and_size(&gz_path).await.unwrap().0;

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/library/alpine/blobs/uploads/"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", "/v2/library/alpine/blobs/uploads/u1")
                    .insert_header("Docker-Upload-UUID", "u1"),
            )
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/v2/library/alpine/blobs/uploads/u1"))
            .respond_with(ResponseTemplate::new(202).insert_header("Range", "0-100000").insert_header(
                "Location",
                "/v2/library/alpine/blobs/uploads/u1",
            ))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v2/library/alpine/blobs/uploads/u1"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("Content-Length", "0")
                    .insert_header("Docker-Content-Digest", layer_digest.as_str()),
            )
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v2/library/alpine/manifests/latest"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let mut image = ImageRef::from_image_for_test(
            "library/alpine",
            "latest",
            vec![],
            serde_json::to_vec(&serde_json::json!({
                "created": "2024-01-01T00:00:00Z",
                "architecture": "amd64",
                "os": "linux",
                "config": {},
                "rootfs": {"diff_ids": []},
                "history": []
            }))
            .unwrap(),
            vec![],
            false,
        );
        image.add_layer(&client, LayerRef::local(&gz_path)).await.unwrap();

        let manifest = image.push_v2(&client).await.unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].digest, layer_digest);
    }
}
