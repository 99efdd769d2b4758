use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod auth;
pub mod images;
pub mod pages;
pub mod permissions;
pub mod startup_checks;
pub mod templating;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub templates: TemplateConfig,
    pub storage: StorageConfig,
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub pages: Vec<PageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    pub session_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub max_upload_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GalleryConfig {
    pub thumbnail: ImageSizeConfig,
    pub thumbnail_memory_limit_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageSizeConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PageConfig {
    pub id: u64,
    pub book_id: u64,
    pub name: String,
    /// Users allowed to view the page. `None` leaves it visible to everyone.
    #[serde(default)]
    pub viewers: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            app: AppConfig {
                name: "Drawbook".to_string(),
                log_level: "info".to_string(),
                session_secret: "change-me-in-production".to_string(),
                base_url: None,
            },
            templates: TemplateConfig {
                directory: PathBuf::from("templates"),
            },
            storage: StorageConfig {
                directory: PathBuf::from("storage"),
                max_upload_size_mb: 50,
            },
            gallery: GalleryConfig {
                thumbnail: ImageSizeConfig {
                    width: 150,
                    height: 150,
                },
                thumbnail_memory_limit_mb: 256,
            },
            users: Vec::new(),
            pages: Vec::new(),
        }
    }
}

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Request body limit for uploads of `max_upload_size_mb` decoded bytes.
/// Base64 inflates the payload by a third, plus room for the JSON envelope.
fn upload_body_limit(max_upload_size_mb: u64) -> usize {
    let bytes = (mb_to_bytes(max_upload_size_mb) / 3)
        .saturating_mul(4)
        .saturating_add(64 * 1024);
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

#[derive(Clone)]
pub struct AppState {
    pub template_engine: Arc<templating::TemplateEngine>,
    pub controller: Arc<images::GalleryImageController>,
    pub storage: images::ImageStorage,
    pub users: Arc<auth::UserDirectory>,
    pub config: Config,
}

pub async fn create_app(config: Config) -> Result<Router, images::ImageError> {
    let template_engine = Arc::new(templating::TemplateEngine::new(
        config.templates.directory.clone(),
    ));

    let storage = images::ImageStorage::new(
        config.storage.directory.clone(),
        config.app.base_url.clone(),
    );

    let users = Arc::new(auth::UserDirectory::from_config(&config.users));
    let pages = Arc::new(pages::PageDirectory::from_config(&config.pages));
    let permissions: Arc<dyn permissions::PermissionChecker> =
        Arc::new(permissions::ConfigPermissions::new(pages.clone()));

    let repo = images::FileImageRepo::open(
        storage.clone(),
        pages,
        permissions.clone(),
        mb_to_bytes(config.storage.max_upload_size_mb),
    )
    .await?;

    let resizer = images::ThumbnailResizer::new(
        storage.clone(),
        config.gallery.thumbnail.width,
        config.gallery.thumbnail.height,
    );

    let controller = Arc::new(images::GalleryImageController::new(
        Arc::new(repo),
        Arc::new(resizer),
        permissions,
        images::MemoryGuard::new(mb_to_bytes(config.gallery.thumbnail_memory_limit_mb)),
    ));

    let body_limit = upload_body_limit(config.storage.max_upload_size_mb);

    let app_state = AppState {
        template_engine,
        controller,
        storage,
        users,
        config,
    };

    Ok(Router::new()
        .route(
            "/images/drawio",
            axum::routing::get(images::list_handler).post(images::create_handler),
        )
        .route(
            "/images/drawio/base64/{id}",
            axum::routing::get(images::base64_handler),
        )
        .route(
            "/uploads/images/{*path}",
            axum::routing::get(images::stored_file_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let user_agent = request
                        .headers()
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config =
            toml_edit::de::from_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.gallery.thumbnail.width, 150);
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.pages[1].viewers.as_deref(), Some(&["admin".to_string()][..]));
    }

    #[test]
    fn test_upload_limits_saturate() {
        assert_eq!(mb_to_bytes(2), 2 * 1024 * 1024);
        assert_eq!(mb_to_bytes(u64::MAX), u64::MAX);
        assert!(upload_body_limit(3) > 3 * 1024 * 1024 * 4 / 3);
        assert_eq!(upload_body_limit(u64::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn test_create_app_accepts_huge_limits() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.directory = temp_dir.path().to_path_buf();
        config.storage.max_upload_size_mb = u64::MAX;
        config.gallery.thumbnail_memory_limit_mb = u64::MAX;

        assert!(create_app(config).await.is_ok());
    }

    #[test]
    fn test_users_and_pages_are_optional() {
        let config: Config = toml_edit::de::from_str(
            r#"
[server]
host = "0.0.0.0"
port = 8080

[app]
name = "Docs"
log_level = "debug"
session_secret = "s3cret"

[templates]
directory = "templates"

[storage]
directory = "/var/lib/drawbook"
max_upload_size_mb = 10

[gallery]
thumbnail_memory_limit_mb = 64

[gallery.thumbnail]
width = 150
height = 150
"#,
        )
        .unwrap();
        assert!(config.users.is_empty());
        assert!(config.pages.is_empty());
        assert!(config.app.base_url.is_none());
    }
}
