// Drawing images: storage, thumbnails and the gallery endpoints
mod controller;
mod error;
mod handlers;
mod memory;
mod repo;
mod resize;
mod serve;
mod storage;
mod types;

pub use controller::{
    ControllerError, GALLERY_PAGE_SIZE, GalleryImageController, THUMBNAIL_MEMORY_WARNING,
};
pub use error::ImageError;
pub use handlers::{
    DRAWING_NOT_FOUND_MESSAGE, base64_handler, create_handler, list_handler, stored_file_handler,
};
pub use memory::{Bounded, MemoryBudget, MemoryExhausted, MemoryGuard, Reservation};
pub use repo::{FileImageRepo, ImageRepo};
pub use resize::{ImageResizer, ThumbnailResizer};
pub use storage::{ImageStorage, UPLOADS_URL_PREFIX};
pub use types::*;

#[cfg(test)]
mod tests;
