use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Gallery,
    Drawio,
    Cover,
    System,
    User,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Gallery => "gallery",
            ImageKind::Drawio => "drawio",
            ImageKind::Cover => "cover",
            ImageKind::System => "system",
            ImageKind::User => "user",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub name: String,
    pub url: String,
    /// Location relative to the storage root.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ImageKind,
    pub uploaded_to: u64,
    pub created_by: u64,
    pub updated_by: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbs: Option<ImageThumbs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageThumbs {
    pub gallery: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentTypeFilter {
    Page,
    Book,
}

impl FromStr for ParentTypeFilter {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "page" => Ok(ParentTypeFilter::Page),
            "book" => Ok(ParentTypeFilter::Book),
            _ => Err(()),
        }
    }
}

/// Raw query string of the listing endpoint. Everything is optional text so
/// malformed values fall back to defaults instead of rejecting the request.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListParams {
    pub page: Option<String>,
    pub search: Option<String>,
    pub uploaded_to: Option<String>,
    pub filter_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryQuery {
    pub page: usize,
    pub search_term: Option<String>,
    pub uploaded_to: Option<u64>,
    pub parent_type_filter: Option<ParentTypeFilter>,
}

impl Default for GalleryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            search_term: None,
            uploaded_to: None,
            parent_type_filter: None,
        }
    }
}

impl From<ListParams> for GalleryQuery {
    fn from(params: ListParams) -> Self {
        // Out-of-range pages are treated like any other unusable value.
        let page = params
            .page
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p >= 1)
            .map_or(1, |p| p as usize);

        let search_term = params
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            page,
            search_term,
            uploaded_to: params.uploaded_to.and_then(|u| u.trim().parse().ok()),
            parent_type_filter: params.filter_type.and_then(|f| f.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GalleryPage {
    pub images: Vec<Image>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryListing {
    pub images: Vec<Image>,
    pub has_more: bool,
    pub warning: Option<String>,
}

/// Body of a drawing upload as sent by the editor. Fields stay loosely typed
/// until [`CreateDrawingRequest::try_from`] validates them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateDrawingPayload {
    #[serde(default)]
    pub image: Option<serde_json::Value>,
    #[serde(default)]
    pub uploaded_to: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDrawingRequest {
    pub image: String,
    pub uploaded_to: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: BTreeMap<&'static str, Vec<String>>,
}

impl ValidationErrors {
    fn add(&mut self, field: &'static str, message: String) {
        self.errors.entry(field).or_default().push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl TryFrom<CreateDrawingPayload> for CreateDrawingRequest {
    type Error = ValidationErrors;

    fn try_from(payload: CreateDrawingPayload) -> Result<Self, Self::Error> {
        use serde_json::Value;

        let mut errors = ValidationErrors::default();

        let image = match payload.image {
            None | Some(Value::Null) => {
                errors.add("image", "The image field is required.".to_string());
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                errors.add("image", "The image field is required.".to_string());
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                errors.add("image", "The image field must be a string.".to_string());
                None
            }
        };

        let uploaded_to = match payload.uploaded_to {
            None | Some(Value::Null) => {
                errors.add("uploaded_to", "The uploaded to field is required.".to_string());
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                errors.add("uploaded_to", "The uploaded to field is required.".to_string());
                None
            }
            Some(value) => {
                let parsed = match &value {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                };
                if parsed.is_none() {
                    errors.add(
                        "uploaded_to",
                        "The uploaded to field must be an integer.".to_string(),
                    );
                }
                parsed
            }
        };

        match (image, uploaded_to) {
            (Some(image), Some(uploaded_to)) if errors.is_empty() => {
                Ok(CreateDrawingRequest { image, uploaded_to })
            }
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawingContent {
    pub content: String,
}
