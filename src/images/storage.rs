use super::ImageError;
use std::path::{Component, Path, PathBuf};

/// Route prefix stored images are served under.
pub const UPLOADS_URL_PREFIX: &str = "/uploads/images";

/// Local directory holding uploaded images and their thumbnails.
#[derive(Debug, Clone)]
pub struct ImageStorage {
    root: PathBuf,
    base_url: String,
}

impl ImageStorage {
    pub fn new(root: PathBuf, base_url: Option<String>) -> Self {
        Self {
            root,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a stored relative path onto the filesystem, refusing anything
    /// that would leave the storage root.
    pub fn secure_path(&self, relative: &str) -> Result<PathBuf, ImageError> {
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ImageError::InvalidPath);
        }
        Ok(self.root.join(relative))
    }

    pub fn url_for(&self, relative: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            UPLOADS_URL_PREFIX,
            relative.trim_start_matches('/')
        )
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.secure_path(relative) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, ImageError> {
        let path = self.secure_path(relative)?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn write(&self, relative: &str, data: &[u8]) -> Result<(), ImageError> {
        let path = self.secure_path(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    pub async fn delete(&self, relative: &str) -> Result<(), ImageError> {
        let path = self.secure_path(relative)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
