//! Assembling an image into a Docker `docker save`-compatible tarball.
//!
//! Grounded on `moby_distribution.registry.client.DockerRegistryV2Client.pull_image` and the
//! `docker save` tarball layout it reproduces: one directory per layer (named by diff id),
//! containing a `layer.tar`, a `<config digest>.json` config file, and a top-level
//! `manifest.json` index.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::blob::Blob;
use crate::client::Client;
use crate::image::engine::ImageRef;
use crate::{OciRegError, Result};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ImageManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags")]
    repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRef {
    /// Writes this image to `dest` as a `docker load`-compatible tarball.
    ///
    /// Refuses images with unpublished layer changes (call [`ImageRef::push`] first) since the
    /// saved config's diff ids must describe layers that are actually present on disk.
    pub async fn save(&self, client: &Client, dest: &Path) -> Result<()> {
        if self.dirty() {
            return Err(OciRegError::InvalidState(
                "image has unpublished layer changes; push before saving".into(),
            ));
        }

        let workdir = tempfile::tempdir()?;
        let config_bytes = self.image_json_bytes()?;
        let config_digest = crate::digest::sha256_digest(&config_bytes);
        let config_hex = config_digest
            .strip_prefix("sha256:")
            .unwrap_or(&config_digest)
            .to_string();
        let config_name = format!("{config_hex}.json");
        tokio::fs::write(workdir.path().join(&config_name), &config_bytes).await?;

        let mut layer_paths = Vec::with_capacity(self.layers().len());
        for layer in self.layers() {
            layer_paths.push(save_layer(client, self.repo(), layer, workdir.path()).await?);
        }

        let manifest = vec![ImageManifestEntry {
            config: config_name,
            repo_tags: vec![format!("{}:{}", self.repo(), self.reference())],
            layers: layer_paths,
        }];
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(workdir.path().join("manifest.json"), &manifest_bytes).await?;

        write_tarball(workdir.path().to_path_buf(), dest.to_path_buf()).await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Downloads `layer`'s compressed blob, decompresses it into `<diff-id>/layer.tar` under
/// `workdir`, and returns that path relative to `workdir`.
async fn save_layer(
    client: &Client,
    repo: &str,
    layer: &super::engine::LayerRef,
    workdir: &Path,
) -> Result<String> {
    let digest = layer
        .digest
        .clone()
        .ok_or_else(|| OciRegError::InvalidState("layer is missing a digest".into()))?;

    let gz_path = workdir.join(format!("{}.tar.gz", digest.replace(':', "_")));
    Blob::with_digest(repo, &digest)
        .download(client, None, &gz_path)
        .await?;

    let diff_id = super::engine::gunzip_digest(&gz_path).await?;
    let diff_hex = diff_id.strip_prefix("sha256:").unwrap_or(&diff_id).to_string();

    let layer_dir = workdir.join(&diff_hex);
    tokio::fs::create_dir_all(&layer_dir).await?;
    let tar_path = layer_dir.join("layer.tar");

    gunzip_to_file(gz_path.clone(), tar_path).await?;
    tokio::fs::remove_file(&gz_path).await?;

    Ok(format!("{diff_hex}/layer.tar"))
}

/// Streams a gzipped file's decompressed contents to `dest_path`, without materializing the
/// whole plaintext in memory.
async fn gunzip_to_file(gz_path: PathBuf, dest_path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let src = std::fs::File::open(&gz_path)?;
        let mut decoder = flate2::read::GzDecoder::new(src);
        let mut dest = std::fs::File::create(&dest_path)?;
        std::io::copy(&mut decoder, &mut dest)?;
        Ok(())
    })
    .await
    .map_err(OciRegError::from)?
    .map_err(OciRegError::from)
}

/// Archives `workdir`'s contents into a single tar file at `dest`.
async fn write_tarball(workdir: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::create(&dest)?;
        let mut builder = tar::Builder::new(file);
        builder.append_dir_all(".", &workdir)?;
        builder.finish()
    })
    .await
    .map_err(OciRegError::from)?
    .map_err(OciRegError::from)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn empty_gzip_tar() -> Vec<u8> {
        let tar_file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut builder = tar::Builder::new(tar_file.reopen().unwrap());
            builder.finish().unwrap();
        }
        let tar_bytes = std::fs::read(tar_file.path()).unwrap();

        let mut gz_bytes = Vec::new();
        {
            let mut encoder = flate2::write::GzEncoder::new(&mut gz_bytes, flate2::Compression::default());
            encoder.write_all(&tar_bytes).unwrap();
            encoder.finish().unwrap();
        }
        gz_bytes
    }

    #[tokio::test]
    async fn test_save_refuses_dirty_image() {
        let client = Client::from_base_url("https://r.io", None);
        let image = crate::image::engine::ImageRef::from_image_for_test(
            "library/alpine",
            "latest",
            vec![],
            b"{}".to_vec(),
            vec!["sha256:appended".to_string()],
            true,
        );
        let dest = tempfile::NamedTempFile::new().unwrap();
        let err = image.save(&client, dest.path()).await.unwrap_err();
        assert!(matches!(err, OciRegError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_save_writes_manifest_and_layer() {
        let gz_bytes = empty_gzip_tar();
        let digest = format!("sha256:{}", hex::encode(<sha2::Sha256 as sha2::Digest>::digest(&gz_bytes)));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/library/alpine/blobs/{digest}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(gz_bytes.clone()))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let layer = crate::image::engine::LayerRef::remote("library/alpine", digest.clone(), gz_bytes.len() as u64);
        let image = crate::image::engine::ImageRef::from_image_for_test(
            "library/alpine",
            "latest",
            vec![layer],
            serde_json::to_vec(&serde_json::json!({
                "created": "2024-01-01T00:00:00Z",
                "architecture": "amd64",
                "os": "linux",
                "config": {},
                "rootfs": {"diff_ids": [
                    "sha256:5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef"
                ]},
                "history": []
            }))
            .unwrap(),
            vec![],
            false,
        );

        let dest = tempfile::NamedTempFile::new().unwrap();
        image.save(&client, dest.path()).await.unwrap();

        let tar_bytes = std::fs::read(dest.path()).unwrap();
        let mut archive = tar::Archive::new(&tar_bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n == "manifest.json"));
        assert!(names
            .iter()
            .any(|n| n.contains("5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef")));
    }
}
