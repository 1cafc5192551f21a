//! Tag listing and deletion, thin wrappers over [`crate::manifest::ManifestRef`].
//!
//! Grounded on `moby_distribution.registry.resources.tags.Tags`.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::client::Client;
use crate::manifest::{ManifestDescriptor, ManifestRef};
use crate::transport::validate_status;
use crate::url::build_tags_url;
use crate::Result;

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Lists the tags in `repo`. A `null` `tags` field in the response (an empty repository) is
/// reported as an empty list rather than an error.
pub async fn list(client: &Client, repo: &str) -> Result<Vec<String>> {
    let url = build_tags_url(client.api_base_url(), repo);
    let response = client.execute(|| client.http.get(&url)).await?;
    let response = validate_status(response, &[StatusCode::OK]).await?;
    let parsed: TagsResponse = response.json().await?;
    Ok(parsed.tags.unwrap_or_default())
}

/// Retrieves the manifest descriptor a tag currently resolves to.
pub async fn get(client: &Client, repo: &str, tag: &str, media_type: &str) -> Result<ManifestDescriptor> {
    ManifestRef::new(repo, tag).get_metadata(client, media_type).await
}

/// Removes a tag's association by deleting the manifest at that reference.
pub async fn untag(client: &Client, repo: &str, tag: &str) -> Result<()> {
    ManifestRef::new(repo, tag).delete(client).await
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_returns_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "library/alpine",
                "tags": ["3.18", "latest"]
            })))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let tags = list(&client, "library/alpine").await.unwrap();
        assert_eq!(tags, vec!["3.18".to_string(), "latest".to_string()]);
    }

    #[tokio::test]
    async fn test_list_null_tags_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/empty/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "library/empty",
                "tags": null
            })))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        let tags = list(&client, "library/empty").await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_untag_deletes_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/library/alpine/manifests/latest"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = Client::from_base_url(server.uri(), None);
        untag(&client, "library/alpine", "latest").await.unwrap();
    }
}
