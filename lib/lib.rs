//! `ocireg` is a client library for the Docker Registry HTTP API V2 / OCI Distribution
//! Specification.
//!
//! # Overview
//!
//! `ocireg` provides the building blocks for talking to a container registry without shelling
//! out to `docker` or `skopeo`. It handles:
//! - Endpoint discovery (HTTPS-with-fallback probing)
//! - Bearer/Basic authentication against the Docker token spec
//! - Resumable chunked blob upload/download
//! - Manifest get/put across the Schema 1, Schema 2, and OCI v1 dialects
//! - Tag listing and deletion
//! - Assembling and pushing multi-layer images, and saving them as `docker save` tarballs
//!
//! # Modules
//!
//! - [`client`] - Endpoint probing and the authenticated [`client::Client`]
//! - [`auth`] - Challenge parsing and the Bearer/Basic authenticators
//! - [`blob`] - Blob stat/download/upload/mount/delete
//! - [`manifest`] - The three manifest dialects and their get/put/delete operations
//! - [`tag`] - Tag listing and deletion
//! - [`image`] - Multi-layer image assembly, pushing, and tarball export
//! - [`reference`] - `registry/repository:tag@digest` parsing
//! - [`digest`] - Streaming digest computation
//! - [`config`] - Crate-wide defaults and environment variables
//!
//! # Usage Example
//!
//! ```no_run
//! use ocireg::client::{Client, Endpoint};
//! use ocireg::reference::Reference;
//!
//! # async fn run() -> ocireg::Result<()> {
//! let client = Client::from_endpoint(&Endpoint::docker_hub(), None).await?;
//! let reference: Reference = "library/alpine:latest".parse()?;
//! let tags = ocireg::tag::list(&client, reference.get_repository()).await?;
//! println!("{:?}", tags);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod auth;
pub mod blob;
pub mod client;
pub mod config;
pub mod digest;
pub mod image;
pub mod manifest;
pub mod probe;
pub mod reference;
pub mod selector;
pub mod tag;
mod transport;
pub mod url;
pub mod utils;

pub use error::*;
