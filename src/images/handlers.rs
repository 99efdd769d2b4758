use super::{
    ControllerError, CreateDrawingPayload, CreateDrawingRequest, GalleryQuery, ListParams,
    ValidationErrors,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

pub const DRAWING_NOT_FOUND_MESSAGE: &str = "Drawing data could not be loaded. The drawing file might no longer exist or you may not have permission to access it.";

const LIST_TEMPLATE: &str = "image-manager-list.html.liquid";

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        })),
    )
        .into_response()
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        match self {
            ControllerError::PermissionDenied(action) => {
                warn!(action = %action, "Permission denied");
                json_error(
                    StatusCode::FORBIDDEN,
                    "You do not have permission to access the requested page.",
                )
            }
            ControllerError::NotFound => json_error(StatusCode::NOT_FOUND, DRAWING_NOT_FOUND_MESSAGE),
            ControllerError::Upload(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
            ControllerError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl IntoResponse for ValidationErrors {
    fn into_response(self) -> Response {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "message": "The given data was invalid.",
                "errors": self.errors,
            })),
        )
            .into_response()
    }
}

#[axum::debug_handler]
pub async fn list_handler(
    State(app_state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Response {
    let user = app_state
        .users
        .current_user(&headers, &app_state.config.app.session_secret);
    let query = GalleryQuery::from(params);

    let listing = match app_state.controller.list(&user, &query).await {
        Ok(listing) => listing,
        Err(e) => return e.into_response(),
    };

    let images: Vec<_> = listing
        .images
        .iter()
        .map(|image| {
            liquid::object!({
                "id": image.id,
                "name": image.name,
                "url": image.url,
                "thumbnail_url": image
                    .thumbs
                    .as_ref()
                    .map(|thumbs| thumbs.gallery.clone())
                    .unwrap_or_else(|| image.url.clone()),
                "uploaded_to": image.uploaded_to,
                "created_at": image.created_at.format("%Y-%m-%d").to_string(),
            })
        })
        .collect();

    let liquid_context = liquid::object!({
        "images": images,
        "has_more": listing.has_more,
        "warning": listing.warning.clone().unwrap_or_default(),
        "page": query.page,
        "next_page": query.page.saturating_add(1),
    });

    match app_state
        .template_engine
        .render_template(LIST_TEMPLATE, liquid_context)
        .await
    {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template rendering error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn create_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateDrawingPayload>, JsonRejection>,
) -> Response {
    // A body that isn't a JSON object carries neither field.
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            debug!("Rejected drawing upload body: {}", rejection.body_text());
            CreateDrawingPayload::default()
        }
    };

    let request = match CreateDrawingRequest::try_from(payload) {
        Ok(request) => request,
        Err(errors) => return errors.into_response(),
    };

    let user = app_state
        .users
        .current_user(&headers, &app_state.config.app.session_secret);

    match app_state.controller.create(&user, request).await {
        Ok(image) => Json(image).into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn base64_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    // An unparseable id is just another id that doesn't exist.
    let Ok(id) = id.trim().parse::<u64>() else {
        return ControllerError::NotFound.into_response();
    };

    let user = app_state
        .users
        .current_user(&headers, &app_state.config.app.session_secret);

    match app_state.controller.get_as_base64(&user, id).await {
        Ok(content) => Json(content).into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn stored_file_handler(
    State(app_state): State<AppState>,
    Path(path): Path<String>,
) -> Response {
    app_state.storage.serve(&path).await
}
