use super::{
    GalleryPage, GalleryQuery, Image, ImageError, ImageKind, ImageStorage, ParentTypeFilter,
};
use crate::auth::User;
use crate::pages::PageDirectory;
use crate::permissions::{Action, PermissionChecker, Subject};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const INDEX_FILE: &str = "images.json";

#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// One page of images of `kind` visible to `user`, newest first.
    async fn get_entity_filtered(
        &self,
        user: &User,
        kind: ImageKind,
        query: &GalleryQuery,
        page_size: usize,
    ) -> Result<GalleryPage, ImageError>;

    /// Decode a base64 data URI and store it as a drawing attached to `uploaded_to`.
    async fn save_drawing(
        &self,
        user: &User,
        base64_uri: &str,
        uploaded_to: u64,
    ) -> Result<Image, ImageError>;

    async fn get_by_id(&self, id: u64) -> Result<Image, ImageError>;

    /// Raw stored bytes, `None` when the file can't be read.
    async fn get_image_data(&self, image: &Image) -> Option<Vec<u8>>;
}

#[derive(Serialize, Deserialize)]
struct ImageIndex {
    next_id: u64,
    images: BTreeMap<u64, Image>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            next_id: 1,
            images: BTreeMap::new(),
        }
    }
}

/// Image records kept in a JSON index next to the files in [`ImageStorage`].
pub struct FileImageRepo {
    storage: ImageStorage,
    pages: Arc<PageDirectory>,
    permissions: Arc<dyn PermissionChecker>,
    max_upload_bytes: u64,
    index: RwLock<ImageIndex>,
}

impl FileImageRepo {
    pub async fn open(
        storage: ImageStorage,
        pages: Arc<PageDirectory>,
        permissions: Arc<dyn PermissionChecker>,
        max_upload_bytes: u64,
    ) -> Result<Self, ImageError> {
        let index_path = storage.root().join(INDEX_FILE);
        let index = if tokio::fs::try_exists(&index_path).await? {
            let content = tokio::fs::read_to_string(&index_path).await?;
            let index: ImageIndex = serde_json::from_str(&content)?;
            info!(
                "Loaded {} images from {:?}",
                index.images.len(),
                index_path
            );
            index
        } else {
            info!("No image index at {:?}, starting empty", index_path);
            ImageIndex::default()
        };

        Ok(Self {
            storage,
            pages,
            permissions,
            max_upload_bytes,
            index: RwLock::new(index),
        })
    }

    async fn persist(&self, index: &ImageIndex) -> Result<(), ImageError> {
        tokio::fs::create_dir_all(self.storage.root()).await?;
        let json = serde_json::to_string_pretty(index)?;
        let index_path = self.storage.root().join(INDEX_FILE);
        let tmp_path = index_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &index_path).await?;
        Ok(())
    }

    /// Store `data` under a fresh, unique path and record it. Nothing is left
    /// behind when either the file or the index write fails.
    pub async fn save_new(
        &self,
        user: &User,
        kind: ImageKind,
        name: &str,
        data: &[u8],
        uploaded_to: u64,
    ) -> Result<Image, ImageError> {
        let now = Utc::now();
        let directory = format!("{}/{}", kind.as_str(), now.format("%Y-%m"));
        let file_name = secure_file_name(name);

        let mut index = self.index.write().await;

        let mut relative = format!("{}/{}{}", directory, random_prefix(), file_name);
        while self.storage.exists(&relative).await {
            relative = format!("{}/{}{}", directory, random_prefix(), file_name);
        }

        if let Err(e) = self.storage.write(&relative, data).await {
            error!("Failed to write image {}: {}", relative, e);
            return Err(ImageError::Upload(
                "The image could not be saved to storage".to_string(),
            ));
        }

        let image = Image {
            id: index.next_id,
            name: name.to_string(),
            url: self.storage.url_for(&relative),
            path: relative.clone(),
            kind,
            uploaded_to,
            created_by: user.id,
            updated_by: user.id,
            created_at: now,
            updated_at: now,
            thumbs: None,
        };

        index.next_id += 1;
        index.images.insert(image.id, image.clone());

        if let Err(e) = self.persist(&index).await {
            error!("Failed to write image index: {}", e);
            index.images.remove(&image.id);
            if let Err(e) = self.storage.delete(&relative).await {
                warn!("Failed to remove orphaned image {}: {}", relative, e);
            }
            return Err(ImageError::Upload(
                "The image could not be saved to storage".to_string(),
            ));
        }

        info!(
            id = image.id,
            kind = %kind,
            uploaded_to,
            "Stored image {}",
            image.path
        );
        Ok(image)
    }
}

#[async_trait]
impl ImageRepo for FileImageRepo {
    async fn get_entity_filtered(
        &self,
        user: &User,
        kind: ImageKind,
        query: &GalleryQuery,
        page_size: usize,
    ) -> Result<GalleryPage, ImageError> {
        let parent_pages: Option<HashSet<u64>> = match query.parent_type_filter {
            None => None,
            Some(filter) => {
                let context = query
                    .uploaded_to
                    .and_then(|id| self.pages.get(id))
                    .filter(|page| self.permissions.can(user, Action::PageView, Subject::Page(page.id)));

                let Some(context) = context else {
                    debug!(
                        uploaded_to = ?query.uploaded_to,
                        "Parent filter without a visible context page"
                    );
                    return Ok(GalleryPage::default());
                };

                Some(match filter {
                    ParentTypeFilter::Page => HashSet::from([context.id]),
                    ParentTypeFilter::Book => self
                        .pages
                        .pages_in_book(context.book_id)
                        .map(|page| page.id)
                        .collect(),
                })
            }
        };

        let search = query.search_term.as_ref().map(|s| s.to_lowercase());

        let index = self.index.read().await;
        let mut matching: Vec<&Image> = index
            .images
            .values()
            .filter(|image| image.kind == kind)
            .filter(|image| {
                parent_pages
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&image.uploaded_to))
            })
            .filter(|image| {
                search
                    .as_ref()
                    .is_none_or(|term| image.name.to_lowercase().contains(term))
            })
            .filter(|image| {
                self.permissions
                    .can(user, Action::PageView, Subject::Page(image.uploaded_to))
            })
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = page_size.saturating_mul(query.page.max(1) - 1);
        let mut images: Vec<Image> = matching
            .into_iter()
            .skip(offset)
            .take(page_size + 1)
            .cloned()
            .collect();

        let has_more = images.len() > page_size;
        images.truncate(page_size);

        Ok(GalleryPage { images, has_more })
    }

    async fn save_drawing(
        &self,
        user: &User,
        base64_uri: &str,
        uploaded_to: u64,
    ) -> Result<Image, ImageError> {
        let invalid = || ImageError::Upload("Invalid base64 image data provided".to_string());

        let (_, encoded) = base64_uri.split_once(";base64,").ok_or_else(invalid)?;
        let encoded: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let data = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| invalid())?;

        if data.len() as u64 > self.max_upload_bytes {
            return Err(ImageError::Upload(format!(
                "The image exceeds the maximum upload size of {} MB",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }

        let format = image::guess_format(&data).map_err(|_| {
            ImageError::Upload("The uploaded file is not a valid image".to_string())
        })?;
        let extension = format.extensions_str().first().copied().unwrap_or("png");

        let name = format!(
            "Drawing-{}-{}.{}",
            user.id,
            Utc::now().timestamp(),
            extension
        );
        self.save_new(user, ImageKind::Drawio, &name, &data, uploaded_to)
            .await
    }

    async fn get_by_id(&self, id: u64) -> Result<Image, ImageError> {
        self.index
            .read()
            .await
            .images
            .get(&id)
            .cloned()
            .ok_or(ImageError::NotFound)
    }

    async fn get_image_data(&self, image: &Image) -> Option<Vec<u8>> {
        match self.storage.read(&image.path).await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(id = image.id, "Failed to read image data: {}", e);
                None
            }
        }
    }
}

fn random_prefix() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(3)
        .map(char::from)
        .collect()
}

fn secure_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
