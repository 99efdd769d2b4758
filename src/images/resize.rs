use super::{Image, ImageStorage, ImageThumbs, MemoryBudget, MemoryExhausted};
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use rand::Rng;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

pub trait ImageResizer: Send + Sync {
    /// Attach gallery thumbnail URLs to `images`, generating missing ones.
    /// Blocking; call from a blocking context. Running out of `budget` stops
    /// the batch, images handled before that keep their thumbnails.
    fn load_gallery_thumbnails_for_many(
        &self,
        images: &mut [Image],
        budget: &MemoryBudget,
    ) -> Result<(), MemoryExhausted>;
}

#[derive(Debug, Error)]
enum ThumbnailError {
    #[error(transparent)]
    Exhausted(#[from] MemoryExhausted),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Storage(#[from] super::ImageError),
}

pub struct ThumbnailResizer {
    storage: ImageStorage,
    width: u32,
    height: u32,
}

impl ThumbnailResizer {
    pub fn new(storage: ImageStorage, width: u32, height: u32) -> Self {
        Self {
            storage,
            width,
            height,
        }
    }

    /// `drawio/2024-01/abc.png` -> `drawio/2024-01/thumbs-150-150/abc.png`
    pub fn thumbnail_path(&self, image_path: &str) -> String {
        let thumbs_dir = format!("thumbs-{}-{}", self.width, self.height);
        match image_path.rsplit_once('/') {
            Some((dir, file)) => format!("{}/{}/{}", dir, thumbs_dir, file),
            None => format!("{}/{}", thumbs_dir, image_path),
        }
    }

    fn gallery_thumbnail_url(
        &self,
        image: &Image,
        budget: &MemoryBudget,
    ) -> Result<String, ThumbnailError> {
        if image.path.to_lowercase().ends_with(".gif") {
            return Ok(image.url.clone());
        }

        let source = self.storage.secure_path(&image.path)?;
        let thumb_relative = self.thumbnail_path(&image.path);
        let target = self.storage.secure_path(&thumb_relative)?;

        if is_cache_valid(&target, &source) {
            return Ok(self.storage.url_for(&thumb_relative));
        }

        let (width, height) = ImageReader::open(&source)?
            .with_guessed_format()?
            .into_dimensions()?;
        let estimate = u64::from(width) * u64::from(height) * 4
            + u64::from(self.width) * u64::from(self.height) * 4;
        let _reservation = budget.reserve(estimate)?;

        debug!(
            id = image.id,
            width, height, "Generating gallery thumbnail"
        );
        let decoded = ImageReader::open(&source)?.with_guessed_format()?.decode()?;
        let format = ImageFormat::from_path(&target)?;
        let mut thumb = decoded.resize_to_fill(self.width, self.height, FilterType::Triangle);
        if format == ImageFormat::Jpeg {
            thumb = DynamicImage::ImageRgb8(thumb.to_rgb8());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomically(&thumb, &target, format)?;

        Ok(self.storage.url_for(&thumb_relative))
    }
}

impl ImageResizer for ThumbnailResizer {
    fn load_gallery_thumbnails_for_many(
        &self,
        images: &mut [Image],
        budget: &MemoryBudget,
    ) -> Result<(), MemoryExhausted> {
        for image in images.iter_mut() {
            let gallery = match self.gallery_thumbnail_url(image, budget) {
                Ok(url) => url,
                Err(ThumbnailError::Exhausted(e)) => return Err(e),
                Err(e) => {
                    warn!(
                        id = image.id,
                        "Failed to create gallery thumbnail, using original: {}", e
                    );
                    image.url.clone()
                }
            };
            image.thumbs = Some(ImageThumbs { gallery });
        }
        Ok(())
    }
}

/// Encode into a private temp file next to `target`, then rename it over
/// `target` so concurrent readers never see a partial thumbnail.
fn write_atomically(
    thumb: &DynamicImage,
    target: &Path,
    format: ImageFormat,
) -> Result<(), ThumbnailError> {
    let suffix: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = target.with_file_name(format!(".{}.{}.tmp", file_name, suffix));

    let written = thumb
        .save_with_format(&tmp_path, format)
        .map_err(ThumbnailError::from)
        .and_then(|()| std::fs::rename(&tmp_path, target).map_err(ThumbnailError::from));

    if written.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    written
}

/// A thumbnail is reusable when it exists and is not older than its source.
fn is_cache_valid(cache_path: &Path, original_path: &Path) -> bool {
    let (Ok(cache_metadata), Ok(original_metadata)) = (
        std::fs::metadata(cache_path),
        std::fs::metadata(original_path),
    ) else {
        return false;
    };

    matches!(
        (cache_metadata.modified(), original_metadata.modified()),
        (Ok(cache_modified), Ok(original_modified)) if cache_modified >= original_modified
    )
}
