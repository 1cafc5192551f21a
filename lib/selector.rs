use std::{
    fmt::{self, Display},
    str::FromStr,
    sync::LazyLock,
};

use oci_spec::image::Digest;
use regex::Regex;

use crate::OciRegError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Regular expression for validating image tags.
/// Must start with [A-Za-z0-9] and can be followed by [A-Za-z0-9_.-] up to 127 chars total.
static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,126}$").unwrap());

/// Regular expression for validating digest algorithm and hex components.
/// Both algorithm and hex must contain only [A-Za-z0-9_+.-].
static DIGEST_COMPONENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+.-]+$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Selects a manifest within a repository, either by tag or by digest.
///
/// Format rules:
/// - Tags can be specified either as bare strings (e.g. "latest") or with a ":" prefix (e.g. ":v1.0.0")
/// - Digests can be specified either with "@" prefix (e.g. "@sha256:abc123") or as algorithm:hex (e.g. "sha256:abc123")
/// - A string starting with ":" is always treated as a tag
/// - A string starting with "@" is always treated as a digest
/// - A string containing ":" but not starting with ":" is treated as a digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSelector {
    /// A tag reference (e.g., "latest", ":v1.0.0").
    Tag(String),

    /// A digest reference with algorithm and hex components (e.g., "@sha256:abc...", "sha256:abc...").
    Digest {
        /// The hash algorithm (e.g., "sha256").
        algorithm: String,

        /// The hex digest.
        hex: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReferenceSelector {
    /// Parse a tag string, validating its format.
    fn parse_tag(s: &str) -> Result<Self, OciRegError> {
        if !TAG_REGEX.is_match(s) {
            return Err(OciRegError::InvalidReferenceSelectorFormat(format!(
                "invalid tag format: must match {}",
                TAG_REGEX.as_str()
            )));
        }
        Ok(ReferenceSelector::Tag(s.to_string()))
    }

    /// Parse a digest string into algorithm and hex components.
    fn parse_digest(s: &str) -> Result<Self, OciRegError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(OciRegError::InvalidReferenceSelectorFormat(
                "digest must be in format 'algorithm:hex'".to_string(),
            ));
        }

        let algorithm = parts[0];
        let hex = parts[1];

        if !DIGEST_COMPONENT_REGEX.is_match(algorithm) {
            return Err(OciRegError::InvalidReferenceSelectorDigest(format!(
                "invalid algorithm format: must match {}",
                DIGEST_COMPONENT_REGEX.as_str()
            )));
        }

        if !DIGEST_COMPONENT_REGEX.is_match(hex) {
            return Err(OciRegError::InvalidReferenceSelectorDigest(format!(
                "invalid hex format: must match {}",
                DIGEST_COMPONENT_REGEX.as_str()
            )));
        }

        Ok(ReferenceSelector::Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    /// Convert to an [`oci_spec`] [`Digest`], if this selector is a digest variant.
    pub fn to_oci_digest(&self) -> Option<Digest> {
        match self {
            ReferenceSelector::Tag(_) => None,
            ReferenceSelector::Digest { algorithm, hex } => {
                Digest::from_str(&format!("{}:{}", algorithm, hex)).ok()
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for ReferenceSelector {
    type Err = OciRegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OciRegError::InvalidReferenceSelectorFormat(
                "empty selector".to_string(),
            ));
        }

        if s.starts_with('@') {
            return Self::parse_digest(s.trim_start_matches('@'));
        }

        if s.starts_with(':') {
            return Self::parse_tag(s.trim_start_matches(':'));
        }

        if s.contains(':') {
            return Self::parse_digest(s);
        }

        Self::parse_tag(s)
    }
}

impl Display for ReferenceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSelector::Tag(tag) => write!(f, "{}", tag),
            ReferenceSelector::Digest { algorithm, hex } => write!(f, "{}:{}", algorithm, hex),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
