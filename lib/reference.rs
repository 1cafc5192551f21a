use crate::{
    config::{default_registry, DEFAULT_OCI_REFERENCE_REPO_NAMESPACE, DEFAULT_OCI_REFERENCE_TAG},
    OciRegError,
};
use getset::{Getters, Setters};
use oci_spec::image::Digest;
use regex::Regex;
use std::{fmt, str::FromStr};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An OCI-compliant image reference.
///
/// Bundles the registry, repository, and a selector that combines a tag and an optional digest.
/// If no registry or tag is provided in the input string, default values are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Reference {
    /// The registry where the image is hosted.
    registry: String,

    /// The repository name of the image.
    repository: String,

    /// The selector specifying either a tag and an optional digest, or a digest only.
    selector: ReferenceSelector,
}

/// The selector part of an OCI image reference: either a tag (with an optional digest)
/// or a standalone digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSelector {
    /// Tag variant containing the image tag and an optional digest.
    Tag {
        /// The image tag.
        tag: String,

        /// The optional digest.
        digest: Option<Digest>,
    },
    /// Digest variant containing only a digest.
    Digest(Digest),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReferenceSelector {
    /// Creates a new `ReferenceSelector` with the specified tag and no digest.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag {
            tag: tag.into(),
            digest: None,
        }
    }

    /// Creates a new `ReferenceSelector` with both a tag and an associated digest.
    pub fn tag_with_digest(tag: impl Into<String>, digest: impl Into<Digest>) -> Self {
        Self::Tag {
            tag: tag.into(),
            digest: Some(digest.into()),
        }
    }

    /// Creates a new `ReferenceSelector` using the specified digest.
    pub fn digest(digest: impl Into<Digest>) -> Self {
        Self::Digest(digest.into())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = OciRegError;

    /// Parses a string slice into an OCI image `Reference`.
    ///
    /// Supported formats include:
    /// - "registry/repository:tag"
    /// - "repository:tag"
    /// - "repository"
    /// - "registry/repository@digest"
    /// - "registry/repository:tag@digest"
    ///
    /// If the registry is omitted, it defaults to [`default_registry`]. If the tag is
    /// omitted, it defaults to [`DEFAULT_OCI_REFERENCE_TAG`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let default_reg = default_registry();

        if s.is_empty() {
            return Err(OciRegError::ImageReferenceError(
                "input string is empty".into(),
            ));
        }

        if let Some(at_idx) = s.find('@') {
            let potential_digest = &s[at_idx + 1..];
            if potential_digest.contains(':') {
                let (pre, digest_part) = s.split_at(at_idx);
                let digest_str = &digest_part[1..]; // skip '@'
                let parsed_digest = digest_str
                    .parse::<Digest>()
                    .map_err(|e| OciRegError::ImageReferenceError(format!("invalid digest: {}", e)))?;

                let (registry, remainder) = extract_registry_and_path(pre, &default_reg);
                let (repository, tag) = extract_repository_and_tag(remainder)?;

                validate_registry(&registry)?;
                validate_repository(&repository)?;
                validate_tag(&tag)?;

                Ok(Reference {
                    registry,
                    repository,
                    selector: ReferenceSelector::tag_with_digest(tag, parsed_digest),
                })
            } else {
                Err(OciRegError::ImageReferenceError(format!(
                    "invalid digest: {}",
                    potential_digest
                )))
            }
        } else {
            let (registry, remainder) = extract_registry_and_path(s, &default_reg);
            let (repository, tag) = extract_repository_and_tag(remainder)?;

            validate_registry(&registry)?;
            validate_repository(&repository)?;
            validate_tag(&tag)?;

            Ok(Reference {
                registry,
                repository,
                selector: ReferenceSelector::tag(tag),
            })
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.selector {
            ReferenceSelector::Tag {
                tag,
                digest: Some(d),
            } => write!(f, ":{}@{}", tag, d),
            ReferenceSelector::Tag { tag, digest: None } => write!(f, ":{}", tag),
            ReferenceSelector::Digest(d) => write!(f, "@{}", d),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates the given registry string: alphanumerics, dashes, dots, and an optional port.
fn validate_registry(registry: &str) -> Result<(), OciRegError> {
    let re = Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap();
    if re.is_match(registry) {
        Ok(())
    } else {
        Err(OciRegError::ImageReferenceError(format!(
            "invalid registry: {}",
            registry
        )))
    }
}

/// Validates the repository name: lowercase letters, numbers, `._-`, and `/`-separated segments.
fn validate_repository(repository: &str) -> Result<(), OciRegError> {
    let repo_re =
        Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap();
    if repo_re.is_match(repository) {
        Ok(())
    } else {
        Err(OciRegError::ImageReferenceError(format!(
            "invalid repository: {}",
            repository
        )))
    }
}

/// Validates the tag string per the Docker tag format.
fn validate_tag(tag: &str) -> Result<(), OciRegError> {
    let tag_re = Regex::new(r"^\w[\w.-]{0,127}$").unwrap();
    if tag_re.is_match(tag) {
        Ok(())
    } else {
        Err(OciRegError::ImageReferenceError(format!(
            "invalid tag: {}",
            tag
        )))
    }
}

/// Extracts the registry and the remaining path from the reference string.
/// If the registry is not specified, returns the provided default registry.
fn extract_registry_and_path<'a>(reference: &'a str, default_registry: &str) -> (String, &'a str) {
    let segments: Vec<&str> = reference.splitn(2, '/').collect();
    if segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost")
    {
        (segments[0].to_string(), segments[1])
    } else {
        (default_registry.to_string(), reference)
    }
}

/// Extracts the repository and tag from the given path string.
/// If the repository part does not contain a '/', the default namespace is prepended.
/// If no tag is provided, the default tag is used.
fn extract_repository_and_tag(path: &str) -> Result<(String, String), OciRegError> {
    if let Some(idx) = path.rfind(':') {
        let repo_part = &path[..idx];
        let tag_part = &path[idx + 1..];
        if repo_part.is_empty() {
            return Err(OciRegError::ImageReferenceError(
                "repository is empty".into(),
            ));
        }
        let repository = if !repo_part.contains('/') {
            format!("{}/{}", DEFAULT_OCI_REFERENCE_REPO_NAMESPACE, repo_part)
        } else {
            repo_part.to_string()
        };
        Ok((repository, tag_part.to_string()))
    } else {
        let repository = if !path.contains('/') {
            format!("{}/{}", DEFAULT_OCI_REFERENCE_REPO_NAMESPACE, path)
        } else {
            path.to_string()
        };
        Ok((repository, DEFAULT_OCI_REFERENCE_TAG.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
