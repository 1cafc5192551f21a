//! Pure URL composition for the registry v2 API. No I/O, no state.

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the API version check URL: `{base}/v2/`.
pub fn build_v2_url(base: &str) -> String {
    format!("{}/v2/", base.trim_end_matches('/'))
}

/// Builds a blob URL: `{base}/v2/{repo}/blobs/{digest}`.
pub fn build_blobs_url(base: &str, repo: &str, digest: &str) -> String {
    format!(
        "{}/v2/{}/blobs/{}",
        base.trim_end_matches('/'),
        repo,
        digest
    )
}

/// Builds a manifest URL: `{base}/v2/{repo}/manifests/{reference}`.
pub fn build_manifests_url(base: &str, repo: &str, reference: &str) -> String {
    format!(
        "{}/v2/{}/manifests/{}",
        base.trim_end_matches('/'),
        repo,
        reference
    )
}

/// Builds the resumable-upload initiation URL: `{base}/v2/{repo}/blobs/uploads/`.
pub fn build_upload_blobs_url(base: &str, repo: &str) -> String {
    format!("{}/v2/{}/blobs/uploads/", base.trim_end_matches('/'), repo)
}

/// Builds the tag listing URL: `{base}/v2/{repo}/tags/list`.
pub fn build_tags_url(base: &str, repo: &str) -> String {
    format!("{}/v2/{}/tags/list", base.trim_end_matches('/'), repo)
}

/// Resolves a `Location` header value against the client's base URL, leaving already-absolute
/// URLs untouched. Registries commonly return a relative path here.
pub fn absolutize_location(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else if location.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), location)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), location)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_v2_url() {
        assert_eq!(build_v2_url("https://registry.example.com"), "https://registry.example.com/v2/");
        assert_eq!(build_v2_url("https://registry.example.com/"), "https://registry.example.com/v2/");
    }

    #[test]
    fn test_build_blobs_url() {
        assert_eq!(
            build_blobs_url("https://r.io", "library/alpine", "sha256:abc"),
            "https://r.io/v2/library/alpine/blobs/sha256:abc"
        );
    }

    #[test]
    fn test_build_manifests_url() {
        assert_eq!(
            build_manifests_url("https://r.io", "library/alpine", "latest"),
            "https://r.io/v2/library/alpine/manifests/latest"
        );
    }

    #[test]
    fn test_build_upload_blobs_url() {
        assert_eq!(
            build_upload_blobs_url("https://r.io", "library/alpine"),
            "https://r.io/v2/library/alpine/blobs/uploads/"
        );
    }

    #[test]
    fn test_build_tags_url() {
        assert_eq!(
            build_tags_url("https://r.io", "library/alpine"),
            "https://r.io/v2/library/alpine/tags/list"
        );
    }

    #[test]
    fn test_absolutize_location_absolute_passthrough() {
        assert_eq!(
            absolutize_location("https://r.io", "https://other.io/x"),
            "https://other.io/x"
        );
    }

    #[test]
    fn test_absolutize_location_relative_path() {
        assert_eq!(
            absolutize_location("https://r.io", "/v2/x/blobs/uploads/abc"),
            "https://r.io/v2/x/blobs/uploads/abc"
        );
    }

    #[test]
    fn test_absolutize_location_relative_no_leading_slash() {
        assert_eq!(
            absolutize_location("https://r.io/v2", "x/blobs/uploads/abc"),
            "https://r.io/v2/x/blobs/uploads/abc"
        );
    }
}
