use super::ImageStorage;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

impl ImageStorage {
    /// Stream a stored image or thumbnail back to the client
    pub async fn serve(&self, relative_path: &str) -> Response {
        // Images always live in a kind directory; top-level files are the index.
        if !relative_path.trim_start_matches('/').contains('/') {
            return (StatusCode::NOT_FOUND, "Image not found").into_response();
        }

        let full_path = match self.secure_path(relative_path) {
            Ok(path) => path,
            Err(_) => return (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        };

        let file = match File::open(&full_path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Stored image not found {:?}: {}", full_path, e);
                return (StatusCode::NOT_FOUND, "Image not found").into_response();
            }
        };

        let metadata = match file.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return (StatusCode::NOT_FOUND, "Image not found").into_response(),
            Err(e) => {
                error!("Failed to read metadata for {:?}: {}", full_path, e);
                return (StatusCode::INTERNAL_SERVER_ERROR).into_response();
            }
        };

        let mime_type = mime_guess::from_path(&full_path).first_or_octet_stream();

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(mime_type.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000, immutable"),
        );
        if let Ok(modified) = metadata.modified()
            && let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified))
        {
            headers.insert(header::LAST_MODIFIED, value);
        }

        let body = Body::from_stream(ReaderStream::new(file));
        (StatusCode::OK, headers, body).into_response()
    }
}
