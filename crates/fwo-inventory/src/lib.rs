pub mod client;
pub mod error;
pub mod image_loader;

pub use client::InventoryClient;
pub use error::InventoryError;
pub use image_loader::{ImageLoader, NoopImageLoader};
