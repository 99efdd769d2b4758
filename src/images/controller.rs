use super::{
    Bounded, CreateDrawingRequest, DrawingContent, GalleryListing, GalleryQuery, Image,
    ImageError, ImageKind, ImageRepo, ImageResizer, MemoryGuard,
};
use crate::auth::User;
use crate::permissions::{Action, PermissionChecker, Subject};
use base64::{Engine, engine::general_purpose};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const GALLERY_PAGE_SIZE: usize = 24;

pub const THUMBNAIL_MEMORY_WARNING: &str =
    "Failed to create gallery thumbnails due to system resource limits";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Permission denied: {0}")]
    PermissionDenied(Action),

    /// Covers missing images, images of another kind, and images on pages the
    /// user can't see, so callers can't tell them apart.
    #[error("Drawing data not found")]
    NotFound,

    #[error("{0}")]
    Upload(String),

    #[error("Storage error: {0}")]
    Storage(ImageError),
}

/// Drawing endpoints on top of the image repository.
pub struct GalleryImageController {
    repo: Arc<dyn ImageRepo>,
    resizer: Arc<dyn ImageResizer>,
    permissions: Arc<dyn PermissionChecker>,
    memory_guard: MemoryGuard,
}

impl GalleryImageController {
    pub fn new(
        repo: Arc<dyn ImageRepo>,
        resizer: Arc<dyn ImageResizer>,
        permissions: Arc<dyn PermissionChecker>,
        memory_guard: MemoryGuard,
    ) -> Self {
        Self {
            repo,
            resizer,
            permissions,
            memory_guard,
        }
    }

    /// One page of drawings with gallery thumbnails loaded. Running out of
    /// thumbnail memory degrades to a warning, never to an error.
    pub async fn list(
        &self,
        user: &User,
        query: &GalleryQuery,
    ) -> Result<GalleryListing, ControllerError> {
        let page = self
            .repo
            .get_entity_filtered(user, ImageKind::Drawio, query, GALLERY_PAGE_SIZE)
            .await
            .map_err(|e| {
                error!("Failed to query drawings: {}", e);
                ControllerError::Storage(e)
            })?;

        debug!(
            count = page.images.len(),
            has_more = page.has_more,
            "Loading gallery thumbnails"
        );

        let (images, warning) = self.load_thumbnails(page.images).await;

        Ok(GalleryListing {
            images,
            has_more: page.has_more,
            warning,
        })
    }

    async fn load_thumbnails(&self, images: Vec<Image>) -> (Vec<Image>, Option<String>) {
        let fallback = images.clone();
        let resizer = Arc::clone(&self.resizer);
        let guard = self.memory_guard;

        let outcome = tokio::task::spawn_blocking(move || {
            guard.run(images, |images, budget| {
                resizer.load_gallery_thumbnails_for_many(images, budget)
            })
        })
        .await;

        match outcome {
            Ok(Bounded::Complete(images)) => (images, None),
            Ok(Bounded::Degraded { value, cause }) => {
                warn!("Gallery thumbnail generation stopped: {}", cause);
                (value, Some(THUMBNAIL_MEMORY_WARNING.to_string()))
            }
            Err(e) => {
                error!("Thumbnail task failed: {}", e);
                (fallback, None)
            }
        }
    }

    pub async fn create(
        &self,
        user: &User,
        request: CreateDrawingRequest,
    ) -> Result<Image, ControllerError> {
        if !self
            .permissions
            .can(user, Action::ImageCreateAll, Subject::Global)
        {
            warn!(user = %user.name, "Drawing upload denied");
            return Err(ControllerError::PermissionDenied(Action::ImageCreateAll));
        }

        match self
            .repo
            .save_drawing(user, &request.image, request.uploaded_to)
            .await
        {
            Ok(image) => {
                info!(
                    id = image.id,
                    uploaded_to = image.uploaded_to,
                    user = %user.name,
                    "Drawing saved"
                );
                Ok(image)
            }
            Err(ImageError::Upload(message)) => {
                warn!(user = %user.name, "Drawing upload failed: {}", message);
                Err(ControllerError::Upload(message))
            }
            Err(e) => {
                error!("Failed to save drawing: {}", e);
                Err(ControllerError::Storage(e))
            }
        }
    }

    pub async fn get_as_base64(
        &self,
        user: &User,
        id: u64,
    ) -> Result<DrawingContent, ControllerError> {
        let image = self.repo.get_by_id(id).await.map_err(|e| {
            debug!(id, "Drawing lookup failed: {}", e);
            ControllerError::NotFound
        })?;

        if image.kind != ImageKind::Drawio
            || !self
                .permissions
                .can(user, Action::PageView, Subject::Page(image.uploaded_to))
        {
            debug!(id, kind = %image.kind, "Drawing not available to user");
            return Err(ControllerError::NotFound);
        }

        let data = self
            .repo
            .get_image_data(&image)
            .await
            .ok_or(ControllerError::NotFound)?;

        Ok(DrawingContent {
            content: general_purpose::STANDARD.encode(data),
        })
    }
}
