//! Multi-layer image composition: pulling an image into memory, appending layers, publishing,
//! and saving to a `docker load`-compatible tarball.
//!
//! Grounded on `moby_distribution.registry.resources.image`.

mod engine;
pub mod json;
mod save;

pub use engine::{ImageRef, LayerRef};
pub use json::{ContainerConfig, HealthConfig, History, ImageJson, RootFs};
