use crate::Config;
use crate::permissions::Action;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Failed to create storage directory: {0}")]
    StorageDirectoryCreationFailed(#[from] std::io::Error),

    #[error("Duplicate page id in configuration: {0}")]
    DuplicatePageId(u64),

    #[error("Duplicate user in configuration: {0}")]
    DuplicateUser(String),

    #[error("Unknown permission '{permission}' for user '{user}'")]
    UnknownPermission { user: String, permission: String },
}

impl StartupCheckError {
    /// Critical failures stop the server from starting.
    pub fn is_critical(&self) -> bool {
        matches!(self, StartupCheckError::StorageDirectoryCreationFailed(_))
    }
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let storage_dir = &config.storage.directory;
    if !storage_dir.exists() {
        info!(
            "Storage directory does not exist, creating: {:?}",
            storage_dir
        );
        if let Err(e) = tokio::fs::create_dir_all(storage_dir).await {
            error!("Failed to create storage directory: {}", e);
            errors.push(StartupCheckError::StorageDirectoryCreationFailed(e));
        } else {
            info!("Storage directory created successfully");
        }
    } else {
        info!("Storage directory exists: {:?}", storage_dir);
    }

    if !config.templates.directory.exists() {
        warn!(
            "Template directory does not exist, using built-in templates: {:?}",
            config.templates.directory
        );
    }

    if config.app.session_secret == crate::Config::default().app.session_secret {
        warn!("Using the default session secret, set app.session_secret before deploying");
    }

    let known_permissions: HashSet<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
    let mut seen_users = HashSet::new();
    for user in &config.users {
        let name = user.name.trim().to_lowercase();
        if !seen_users.insert(name.clone()) {
            errors.push(StartupCheckError::DuplicateUser(name));
        }
        for permission in &user.permissions {
            if !known_permissions.contains(permission.as_str()) {
                warn!(
                    "User '{}' has unknown permission '{}'",
                    user.name, permission
                );
                errors.push(StartupCheckError::UnknownPermission {
                    user: user.name.clone(),
                    permission: permission.clone(),
                });
            }
        }
    }

    let mut seen_pages = HashSet::new();
    for page in &config.pages {
        if !seen_pages.insert(page.id) {
            errors.push(StartupCheckError::DuplicatePageId(page.id));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
