use async_trait::async_trait;
use fwo_domain::Image;

use crate::error::InventoryError;

/// Boundary to the rpm/zip firmware image ingester (spec.md §1: out of scope,
/// specified only at its boundary). `LOAD_NEXUS_WAIT_MIN` names a delay after which
/// this is called once at startup to seed the image store; the ingester itself is
/// real infrastructure this crate never reimplements.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load_images(&self) -> Result<Vec<Image>, InventoryError>;
}

/// Stand-in used until a real loader is wired in: logs and returns nothing.
pub struct NoopImageLoader;

#[async_trait]
impl ImageLoader for NoopImageLoader {
    async fn load_images(&self) -> Result<Vec<Image>, InventoryError> {
        tracing::warn!("NoopImageLoader: no image loader configured, returning zero images");
        Ok(Vec::new())
    }
}
