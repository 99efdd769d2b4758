use crate::auth::User;
use crate::pages::PageDirectory;
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ImageCreateAll,
    PageView,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::ImageCreateAll, Action::PageView];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ImageCreateAll => "image-create-all",
            Action::PageView => "page-view",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Global,
    Page(u64),
}

pub trait PermissionChecker: Send + Sync {
    fn can(&self, user: &User, action: Action, subject: Subject) -> bool;
}

/// Role permissions come from the user record, page visibility from the
/// configured page directory.
pub struct ConfigPermissions {
    pages: Arc<PageDirectory>,
}

impl ConfigPermissions {
    pub fn new(pages: Arc<PageDirectory>) -> Self {
        Self { pages }
    }
}

impl PermissionChecker for ConfigPermissions {
    fn can(&self, user: &User, action: Action, subject: Subject) -> bool {
        match (action, subject) {
            (Action::PageView, Subject::Page(id)) => self
                .pages
                .get(id)
                .is_some_and(|page| page.visible_to(&user.name)),
            // Entity-level actions never pass without an entity.
            (Action::PageView, Subject::Global) => false,
            (action, _) => user.has_permission(action.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageConfig;

    fn checker() -> ConfigPermissions {
        ConfigPermissions::new(Arc::new(PageDirectory::from_config(&[
            PageConfig {
                id: 1,
                book_id: 1,
                name: "Public".to_string(),
                viewers: None,
            },
            PageConfig {
                id: 2,
                book_id: 1,
                name: "Private".to_string(),
                viewers: Some(vec!["alice".to_string()]),
            },
        ])))
    }

    fn alice() -> User {
        User {
            id: 1,
            name: "alice".to_string(),
            permissions: ["image-create-all".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_create_requires_role_permission() {
        let checker = checker();
        assert!(checker.can(&alice(), Action::ImageCreateAll, Subject::Global));
        assert!(!checker.can(&User::guest(), Action::ImageCreateAll, Subject::Global));
    }

    #[test]
    fn test_page_view_follows_viewers() {
        let checker = checker();
        assert!(checker.can(&User::guest(), Action::PageView, Subject::Page(1)));
        assert!(!checker.can(&User::guest(), Action::PageView, Subject::Page(2)));
        assert!(checker.can(&alice(), Action::PageView, Subject::Page(2)));
    }

    #[test]
    fn test_unknown_page_is_never_visible() {
        let checker = checker();
        assert!(!checker.can(&alice(), Action::PageView, Subject::Page(99)));
        assert!(!checker.can(&alice(), Action::PageView, Subject::Global));
    }
}
