use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Page {
    pub id: u64,
    pub book_id: u64,
    pub name: String,
    pub viewers: Option<Vec<String>>,
}

impl Page {
    pub fn visible_to(&self, user_name: &str) -> bool {
        match &self.viewers {
            None => true,
            Some(viewers) => viewers.iter().any(|v| v.eq_ignore_ascii_case(user_name)),
        }
    }
}

/// Pages images can be attached to, loaded from configuration.
#[derive(Debug, Default)]
pub struct PageDirectory {
    pages: BTreeMap<u64, Page>,
}

impl PageDirectory {
    pub fn from_config(pages: &[crate::PageConfig]) -> Self {
        let pages = pages
            .iter()
            .map(|p| {
                (
                    p.id,
                    Page {
                        id: p.id,
                        book_id: p.book_id,
                        name: p.name.clone(),
                        viewers: p.viewers.clone(),
                    },
                )
            })
            .collect();
        Self { pages }
    }

    pub fn get(&self, id: u64) -> Option<&Page> {
        self.pages.get(&id)
    }

    pub fn pages_in_book(&self, book_id: u64) -> impl Iterator<Item = &Page> {
        self.pages.values().filter(move |p| p.book_id == book_id)
    }
}
