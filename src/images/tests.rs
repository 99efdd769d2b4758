use super::*;
use crate::auth::User;
use crate::permissions::{Action, PermissionChecker, Subject};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose};
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

fn image(id: u64, kind: ImageKind, uploaded_to: u64) -> Image {
    Image {
        id,
        name: format!("Drawing-1-{}.png", id),
        url: format!("/uploads/images/drawio/2024-01/{}.png", id),
        path: format!("drawio/2024-01/{}.png", id),
        kind,
        uploaded_to,
        created_by: 1,
        updated_by: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        thumbs: None,
    }
}

#[derive(Default)]
struct FakeRepo {
    images: Mutex<HashMap<u64, Image>>,
    data: Mutex<HashMap<u64, Vec<u8>>>,
    upload_error: Option<String>,
    save_calls: AtomicUsize,
    last_query: Mutex<Option<(GalleryQuery, usize)>>,
}

impl FakeRepo {
    fn with_image(self, image: Image, data: Option<&[u8]>) -> Self {
        if let Some(data) = data {
            self.data.lock().unwrap().insert(image.id, data.to_vec());
        }
        self.images.lock().unwrap().insert(image.id, image);
        self
    }
}

#[async_trait]
impl ImageRepo for FakeRepo {
    async fn get_entity_filtered(
        &self,
        _user: &User,
        kind: ImageKind,
        query: &GalleryQuery,
        page_size: usize,
    ) -> Result<GalleryPage, ImageError> {
        *self.last_query.lock().unwrap() = Some((query.clone(), page_size));
        let mut images: Vec<Image> = self
            .images
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.kind == kind)
            .cloned()
            .collect();
        images.sort_by_key(|i| i.id);
        let offset = page_size * (query.page - 1);
        let mut images: Vec<Image> = images.into_iter().skip(offset).take(page_size + 1).collect();
        let has_more = images.len() > page_size;
        images.truncate(page_size);
        Ok(GalleryPage { images, has_more })
    }

    async fn save_drawing(
        &self,
        user: &User,
        _base64_uri: &str,
        uploaded_to: u64,
    ) -> Result<Image, ImageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.upload_error {
            return Err(ImageError::Upload(message.clone()));
        }
        let mut images = self.images.lock().unwrap();
        let mut saved = image(images.len() as u64 + 100, ImageKind::Drawio, uploaded_to);
        saved.created_by = user.id;
        images.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn get_by_id(&self, id: u64) -> Result<Image, ImageError> {
        self.images
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ImageError::NotFound)
    }

    async fn get_image_data(&self, image: &Image) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(&image.id).cloned()
    }
}

/// Marks every image with a thumbnail, or runs out of memory after `fail_after` images.
struct FakeResizer {
    fail_after: Option<usize>,
}

impl ImageResizer for FakeResizer {
    fn load_gallery_thumbnails_for_many(
        &self,
        images: &mut [Image],
        budget: &MemoryBudget,
    ) -> Result<(), MemoryExhausted> {
        for (index, image) in images.iter_mut().enumerate() {
            if self.fail_after == Some(index) {
                return Err(MemoryExhausted {
                    requested: 1 << 30,
                    in_use: budget.in_use(),
                    limit: budget.limit(),
                });
            }
            image.thumbs = Some(ImageThumbs {
                gallery: format!("{}?thumb", image.url),
            });
        }
        Ok(())
    }
}

/// Grants `image-create-all` to users holding it and page views on listed pages.
struct FakePermissions {
    visible_pages: HashSet<u64>,
}

impl PermissionChecker for FakePermissions {
    fn can(&self, user: &User, action: Action, subject: Subject) -> bool {
        match (action, subject) {
            (Action::PageView, Subject::Page(id)) => self.visible_pages.contains(&id),
            (Action::PageView, Subject::Global) => false,
            (action, _) => user.has_permission(action.as_str()),
        }
    }
}

fn editor() -> User {
    User {
        id: 42,
        name: "editor".to_string(),
        permissions: ["image-create-all".to_string()].into_iter().collect(),
    }
}

fn controller(repo: Arc<FakeRepo>, fail_after: Option<usize>) -> GalleryImageController {
    GalleryImageController::new(
        repo,
        Arc::new(FakeResizer { fail_after }),
        Arc::new(FakePermissions {
            visible_pages: [1, 42].into_iter().collect(),
        }),
        MemoryGuard::new(1024),
    )
}

fn create_request(uploaded_to: u64) -> CreateDrawingRequest {
    CreateDrawingRequest {
        image: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        uploaded_to,
    }
}

#[tokio::test]
async fn test_list_uses_fixed_page_size_and_loads_thumbnails() {
    let mut repo = FakeRepo::default();
    for id in 1..=30 {
        repo = repo.with_image(image(id, ImageKind::Drawio, 1), None);
    }
    repo = repo.with_image(image(99, ImageKind::Gallery, 1), None);
    let repo = Arc::new(repo);
    let controller = controller(repo.clone(), None);

    let listing = controller
        .list(&User::guest(), &GalleryQuery::default())
        .await
        .unwrap();

    assert_eq!(listing.images.len(), GALLERY_PAGE_SIZE);
    assert!(listing.has_more);
    assert!(listing.warning.is_none());
    assert!(listing.images.iter().all(|i| i.thumbs.is_some()));
    assert!(listing.images.iter().all(|i| i.kind == ImageKind::Drawio));

    let (_, page_size) = repo.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(page_size, 24);

    let listing = controller
        .list(
            &User::guest(),
            &GalleryQuery {
                page: 2,
                ..GalleryQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(listing.images.len(), 6);
    assert!(!listing.has_more);
}

#[tokio::test]
async fn test_list_passes_filters_through() {
    let repo = Arc::new(FakeRepo::default());
    let controller = controller(repo.clone(), None);
    let query = GalleryQuery {
        page: 3,
        search_term: Some("flow".to_string()),
        uploaded_to: Some(7),
        parent_type_filter: Some(ParentTypeFilter::Book),
    };

    controller.list(&User::guest(), &query).await.unwrap();

    let (seen, _) = repo.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(seen, query);
}

#[tokio::test]
async fn test_list_memory_exhaustion_degrades_to_warning() {
    let repo = Arc::new(
        FakeRepo::default()
            .with_image(image(1, ImageKind::Drawio, 1), None)
            .with_image(image(2, ImageKind::Drawio, 1), None)
            .with_image(image(3, ImageKind::Drawio, 1), None),
    );
    let controller = controller(repo, Some(1));

    let listing = controller
        .list(&User::guest(), &GalleryQuery::default())
        .await
        .unwrap();

    assert_eq!(listing.warning.as_deref(), Some(THUMBNAIL_MEMORY_WARNING));
    let ids: Vec<u64> = listing.images.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(listing.images[0].thumbs.is_some());
    assert!(listing.images[1].thumbs.is_none());
}

#[tokio::test]
async fn test_create_saves_drawing() {
    let repo = Arc::new(FakeRepo::default());
    let controller = controller(repo.clone(), None);

    let image = controller.create(&editor(), create_request(42)).await.unwrap();

    assert_eq!(image.uploaded_to, 42);
    assert_eq!(image.created_by, 42);
    assert_eq!(image.kind, ImageKind::Drawio);
    assert_eq!(repo.save_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_create_without_permission_never_saves() {
    let repo = Arc::new(FakeRepo::default());
    let controller = controller(repo.clone(), None);

    let err = controller
        .create(&User::guest(), create_request(42))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControllerError::PermissionDenied(Action::ImageCreateAll)
    ));
    assert_eq!(repo.save_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_upload_failure_carries_message() {
    let repo = Arc::new(FakeRepo {
        upload_error: Some("Invalid base64 image data provided".to_string()),
        ..FakeRepo::default()
    });
    let controller = controller(repo.clone(), None);

    let err = controller
        .create(&editor(), create_request(42))
        .await
        .unwrap_err();

    match err {
        ControllerError::Upload(message) => {
            assert_eq!(message, "Invalid base64 image data provided")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(repo.images.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_as_base64_returns_content() {
    let repo = Arc::new(
        FakeRepo::default().with_image(image(5, ImageKind::Drawio, 1), Some(b"drawing bytes")),
    );
    let controller = controller(repo, None);

    let content = controller.get_as_base64(&User::guest(), 5).await.unwrap();
    assert_eq!(
        content.content,
        general_purpose::STANDARD.encode(b"drawing bytes")
    );
}

#[tokio::test]
async fn test_get_as_base64_not_found_cases_are_identical() {
    let repo = Arc::new(
        FakeRepo::default()
            // Wrong kind
            .with_image(image(1, ImageKind::Gallery, 1), Some(b"photo"))
            // Page the user can't view
            .with_image(image(2, ImageKind::Drawio, 7), Some(b"hidden"))
            // No stored data
            .with_image(image(3, ImageKind::Drawio, 1), None),
    );
    let controller = controller(repo, None);

    for id in [1, 2, 3, 404] {
        let err = controller
            .get_as_base64(&User::guest(), id)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ControllerError::NotFound),
            "id {} gave {:?}",
            id,
            err
        );
    }
}
