//! Blob transfer: stat/download/upload/mount/delete, plus the resumable chunked upload
//! session ([`BlobWriter`]) those operations drive.
//!
//! Grounded on `moby_distribution.registry.resources.blobs`: the three upload shapes there
//! (streaming via `HashSignWrapper`, monolithic, and cross-repo mount) map directly onto
//! [`Blob::upload_streaming`], [`Blob::upload_monolithic`], and [`Blob::mount_from`].

use std::path::Path;

use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::digest::sha256_digest;
use crate::transport::validate_status;
use crate::url::{absolutize_location, build_blobs_url, build_upload_blobs_url};
use crate::{OciRegError, Result};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A canonical content pointer: media type, size, digest, and any alternate retrieval URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// The blob or manifest's media type.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Size of the referenced content in bytes.
    pub size: u64,
    /// The content's digest, e.g. `sha256:<hex>`.
    pub digest: String,
    /// Alternate URLs the content can be fetched from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// A blob resource scoped to a single repository.
pub struct Blob {
    repo: String,
    digest: Option<String>,
}

/// An in-progress resumable upload session.
pub struct BlobWriter {
    uuid: String,
    location: String,
    offset: u64,
    committed: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods: Blob
//--------------------------------------------------------------------------------------------------

impl Blob {
    /// A blob resource for `repo` whose digest is not yet known (appropriate for uploads).
    pub fn new(repo: impl Into<String>) -> Self {
        Blob {
            repo: repo.into(),
            digest: None,
        }
    }

    /// A blob resource for `repo` identified by an existing `digest` (appropriate for
    /// stat/download/mount/delete).
    pub fn with_digest(repo: impl Into<String>, digest: impl Into<String>) -> Self {
        Blob {
            repo: repo.into(),
            digest: Some(digest.into()),
        }
    }

    /// The digest this resource currently refers to, if known.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Obtains resource information without downloading the blob itself.
    pub async fn stat(&self, client: &Client, digest: Option<&str>) -> Result<Descriptor> {
        let digest = digest.or(self.digest.as_deref()).ok_or_else(|| {
            OciRegError::InvalidState("blob digest is unknown".into())
        })?;

        let url = build_blobs_url(client.api_base_url(), &self.repo, digest);
        let response = client.execute(|| client.http.head(&url)).await?;
        let response = validate_status(response, &[StatusCode::OK]).await?;

        let headers = response.headers();
        let media_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let reported_digest = headers
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(digest)
            .to_string();

        Ok(Descriptor {
            media_type,
            size,
            digest: reported_digest,
            urls: vec![url],
        })
    }

    /// Downloads the blob into `dest`, overwriting it if present.
    pub async fn download(&self, client: &Client, digest: Option<&str>, dest: &Path) -> Result<()> {
        let digest = digest.or(self.digest.as_deref()).ok_or_else(|| {
            OciRegError::InvalidState("blob digest is unknown".into())
        })?;

        let url = build_blobs_url(client.api_base_url(), &self.repo, digest);
        let response = client.execute(|| client.http.get(&url)).await?;
        let response = validate_status(response, &[StatusCode::OK]).await?;

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Downloads the blob into memory. Intended for small blobs (image configs); large blobs
    /// should use [`Blob::download`] instead.
    pub async fn download_bytes(&self, client: &Client, digest: Option<&str>) -> Result<Vec<u8>> {
        let digest = digest.or(self.digest.as_deref()).ok_or_else(|| {
            OciRegError::InvalidState("blob digest is unknown".into())
        })?;

        let url = build_blobs_url(client.api_base_url(), &self.repo, digest);
        let response = client.execute(|| client.http.get(&url)).await?;
        let response = validate_status(response, &[StatusCode::OK]).await?;

        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }

    /// Uploads `data` as a single request (initiate, then PUT with body attached).
    pub async fn upload_monolithic(&mut self, client: &Client, data: &[u8]) -> Result<Descriptor> {
        let digest = sha256_digest(data);
        let (_, location) = initiate_upload(client, &self.repo).await?;

        let url = format!(
            "{}{}digest={}",
            location,
            if location.contains('?') { "&" } else { "?" },
            digest
        );

        let response = client
            .execute(|| {
                client
                    .http
                    .put(&url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        validate_status(response, &[StatusCode::CREATED]).await?;

        self.digest = Some(digest.clone());
        info!(repo = %self.repo, digest = %digest, "uploaded blob monolithically");
        self.stat(client, Some(&digest)).await
    }

    /// Uploads the contents read from `reader` using the resumable chunked protocol, reading
    /// up to [`MAX_CHUNK_SIZE`] bytes per chunk.
    pub async fn upload_streaming(
        &mut self,
        client: &Client,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Descriptor> {
        let mut writer = BlobWriter::initiate(client, &self.repo).await?;
        let mut hasher = sha2::Sha256::new();
        use sha2::Digest as _;

        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        loop {
            let n = read_up_to_chunk(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write(client, &buf[..n]).await?;
        }

        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
        writer.commit(client, &digest).await?;

        self.digest = Some(digest.clone());
        info!(repo = %self.repo, digest = %digest, "uploaded blob via streaming chunks");
        self.stat(client, Some(&digest)).await
    }

    /// Mounts this blob from `from_repo` into this resource's repository without re-uploading.
    pub async fn mount_from(&mut self, client: &Client, from_repo: &str) -> Result<Descriptor> {
        let digest = self
            .digest
            .clone()
            .ok_or_else(|| OciRegError::InvalidState("blob digest is unknown".into()))?;

        let url = build_upload_blobs_url(client.api_base_url(), &self.repo);
        let response = client
            .execute(|| {
                client
                    .http
                    .post(&url)
                    .query(&[("from", from_repo), ("mount", digest.as_str())])
            })
            .await?;

        match validate_status(response, &[StatusCode::CREATED]).await {
            Ok(_) => {
                info!(repo = %self.repo, from = %from_repo, digest = %digest, "mounted blob cross-repo");
                self.stat(client, Some(&digest)).await
            }
            Err(err) => {
                warn!(repo = %self.repo, from = %from_repo, digest = %digest, "cross-repo mount rejected");
                Err(err)
            }
        }
    }

    /// Deletes the blob from the registry.
    pub async fn delete(&self, client: &Client, digest: Option<&str>) -> Result<()> {
        let digest = digest.or(self.digest.as_deref()).ok_or_else(|| {
            OciRegError::InvalidState("blob digest is unknown".into())
        })?;

        let url = build_blobs_url(client.api_base_url(), &self.repo, digest);
        let response = client.execute(|| client.http.delete(&url)).await?;
        validate_status(response, &[StatusCode::ACCEPTED]).await?;
        Ok(())
    }
}

/// Reads into `buf` repeatedly until it is full or the source is exhausted, since a single
/// `AsyncRead::read` call is permitted to return short.
async fn read_up_to_chunk(reader: &mut (impl AsyncRead + Unpin), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn initiate_upload(client: &Client, repo: &str) -> Result<(String, String)> {
    let url = build_upload_blobs_url(client.api_base_url(), repo);
    let response = client.execute(|| client.http.post(&url)).await?;
    let response = validate_status(response, &[StatusCode::ACCEPTED]).await?;

    let headers = response.headers();
    let location = headers
        .get("location")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| OciRegError::InvalidState("upload response missing Location header".into()))?
        .to_string();
    let location = absolutize_location(client.api_base_url(), &location);

    let uuid = headers
        .get("docker-upload-uuid")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            location
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });

    if uuid.is_empty() {
        return Err(OciRegError::InvalidState(
            "cannot retrieve docker upload UUID".into(),
        ));
    }

    Ok((uuid, location))
}

//--------------------------------------------------------------------------------------------------
// Methods: BlobWriter
//--------------------------------------------------------------------------------------------------

impl BlobWriter {
    /// Opens a new resumable upload session against `repo`.
    pub async fn initiate(client: &Client, repo: &str) -> Result<Self> {
        let (uuid, location) = initiate_upload(client, repo).await?;
        Ok(BlobWriter {
            uuid,
            location,
            offset: 0,
            committed: false,
        })
    }

    /// The upload session's UUID, as last reported by the registry.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The current upload session's `Location`, to be used for the next chunk.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Bytes successfully committed to this session so far.
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Whether [`BlobWriter::commit`] has already succeeded for this session.
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// PATCHes one chunk, advancing `offset` from the server's `Range` response header. `chunk`
    /// should be between [`MIN_CHUNK_SIZE`] and [`MAX_CHUNK_SIZE`] bytes, except for the final
    /// chunk of a blob.
    pub async fn write(&mut self, client: &Client, chunk: &[u8]) -> Result<u64> {
        if self.committed {
            return Err(OciRegError::InvalidState(
                "cannot write to an already-committed upload session".into(),
            ));
        }
        if chunk.len() > MAX_CHUNK_SIZE {
            return Err(OciRegError::InvalidState(format!(
                "chunk of {} bytes exceeds the maximum chunk size of {}",
                chunk.len(),
                MAX_CHUNK_SIZE
            )));
        }

        let content_range = format!("{}-{}", self.offset, self.offset + chunk.len() as u64 - 1);
        let location = self.location.clone();
        let body = chunk.to_vec();

        let response = client
            .execute(|| {
                client
                    .http
                    .patch(&location)
                    .header(CONTENT_RANGE, content_range.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(body.clone())
            })
            .await?;
        let response = validate_status(response, &[StatusCode::ACCEPTED]).await?;

        let headers = response.headers();
        let range = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| OciRegError::InvalidState("chunk response missing Range header".into()))?;
        let (_, end) = crate::utils::parse_byte_range(range)
            .ok_or_else(|| OciRegError::InvalidState(format!("unparseable Range header: {range}")))?;

        let advance = end + 1 - self.offset;

        if let Some(location) = headers.get("location").and_then(|v| v.to_str().ok()) {
            self.location = absolutize_location(client.api_base_url(), location);
        }
        if let Some(uuid) = headers.get("docker-upload-uuid").and_then(|v| v.to_str().ok()) {
            self.uuid = uuid.to_string();
        }
        self.offset += advance;

        debug!(uuid = %self.uuid, offset = self.offset, advance, "chunk accepted");
        Ok(advance)
    }

    /// Finalizes the session with the now-complete blob's digest.
    pub async fn commit(&mut self, client: &Client, digest: &str) -> Result<()> {
        let url = format!(
            "{}{}digest={}",
            self.location,
            if self.location.contains('?') { "&" } else { "?" },
            digest
        );
        let response = client.execute(|| client.http.put(&url)).await?;
        validate_status(response, &[StatusCode::CREATED]).await?;
        self.committed = true;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_stat_builds_descriptor_from_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/alpine/blobs/sha256:abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("Content-Length", "42")
                    .insert_header("Docker-Content-Digest", "sha256:abc"),
            )
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let blob = Blob::with_digest("library/alpine", "sha256:abc");
        let descriptor = blob.stat(&client, None).await.unwrap();

        assert_eq!(descriptor.size, 42);
        assert_eq!(descriptor.digest, "sha256:abc");
        assert_eq!(descriptor.media_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_stat_without_known_digest_fails() {
        let client = Client::from_base_url("https://r.io", None);
        let blob = Blob::new("library/alpine");
        let err = blob.stat(&client, None).await.unwrap_err();
        assert!(matches!(err, OciRegError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_download_writes_bytes_to_dest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let blob = Blob::with_digest("library/alpine", "sha256:abc");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob.bin");
        blob.download(&client, None, &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_download_streams_large_body_to_dest() {
        let server = MockServer::start().await;
        let data = vec![0x5au8; 4 * 1024 * 1024];
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:large"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let blob = Blob::with_digest("library/alpine", "sha256:large");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob.bin");
        blob.download(&client, None, &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_download_bytes_streams_into_vec() {
        let server = MockServer::start().await;
        let data = vec![0x7bu8; 512 * 1024];
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:config"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let blob = Blob::with_digest("library/alpine", "sha256:config");
        let bytes = blob.download_bytes(&client, None).await.unwrap();
        assert_eq!(bytes, data);
    }

    #[tokio::test]
    async fn test_upload_monolithic_round_trip() {
        let server = MockServer::start().await;
        let data = b"hello world".to_vec();
        let digest = sha256_digest(&data);

        Mock::given(method("POST"))
            .and(path("/v2/library/alpine/blobs/uploads/"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", "/v2/library/alpine/blobs/uploads/abc-uuid")
                    .insert_header("Docker-Upload-UUID", "abc-uuid"),
            )
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v2/library/alpine/blobs/uploads/abc-uuid"))
            .and(query_param("digest", digest.as_str()))
            .and(body_bytes(data.clone()))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/v2/library/alpine/blobs/".to_string() + &digest))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("Content-Length", data.len().to_string())
                    .insert_header("Docker-Content-Digest", digest.as_str()),
            )
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let mut blob = Blob::new("library/alpine");
        let descriptor = blob.upload_monolithic(&client, &data).await.unwrap();

        assert_eq!(descriptor.digest, digest);
        assert_eq!(blob.digest(), Some(digest.as_str()));
    }

    #[tokio::test]
    async fn test_upload_streaming_single_chunk() {
        let server = MockServer::start().await;
        let data = b"streamed payload".to_vec();
        let digest = sha256_digest(&data);

        Mock::given(method("POST"))
            .and(path("/v2/library/alpine/blobs/uploads/"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", "/v2/library/alpine/blobs/uploads/abc-uuid")
                    .insert_header("Docker-Upload-UUID", "abc-uuid"),
            )
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/v2/library/alpine/blobs/uploads/abc-uuid"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Range", format!("0-{}", data.len() - 1))
                    .insert_header("Location", "/v2/library/alpine/blobs/uploads/abc-uuid")
                    .insert_header("Docker-Upload-UUID", "abc-uuid"),
            )
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v2/library/alpine/blobs/uploads/abc-uuid"))
            .and(query_param("digest", digest.as_str()))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/v2/library/alpine/blobs/".to_string() + &digest))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("Content-Length", data.len().to_string())
                    .insert_header("Docker-Content-Digest", digest.as_str()),
            )
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let mut blob = Blob::new("library/alpine");
        let descriptor = blob
            .upload_streaming(&client, std::io::Cursor::new(data.clone()))
            .await
            .unwrap();

        assert_eq!(descriptor.digest, digest);
    }

    #[tokio::test]
    async fn test_mount_from_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/dest/repo/blobs/uploads/"))
            .and(query_param("from", "src/repo"))
            .and(query_param("mount", "sha256:abc"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/v2/dest/repo/blobs/sha256:abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("Content-Length", "5")
                    .insert_header("Docker-Content-Digest", "sha256:abc"),
            )
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let mut blob = Blob::with_digest("dest/repo", "sha256:abc");
        let descriptor = blob.mount_from(&client, "src/repo").await.unwrap();
        assert_eq!(descriptor.digest, "sha256:abc");
    }

    #[tokio::test]
    async fn test_delete_blob() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/library/alpine/blobs/sha256:abc"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let blob = Blob::with_digest("library/alpine", "sha256:abc");
        blob.delete(&client, None).await.unwrap();
    }
}
