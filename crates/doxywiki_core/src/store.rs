use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;

use crate::title::title_key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub content: String,
    pub is_redirect: bool,
    /// Full `Category:` titles the page is currently a member of.
    pub categories: BTreeSet<String>,
}

impl RemotePage {
    pub fn in_category(&self, category_title: &str) -> bool {
        let wanted = title_key(category_title);
        self.categories
            .iter()
            .any(|category| title_key(category) == wanted)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{title} is locked: {info}")]
    Locked { title: String, info: String },
    #[error("edit conflict on {0}")]
    EditConflict(String),
    #[error("{title} was rejected by a content filter: {info}")]
    ContentFilter { title: String, info: String },
    #[error("{0} does not exist")]
    Missing(String),
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl StoreError {
    /// Lock, concurrent edit and filter rejections: expected per-page failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Locked { .. } | Self::EditConflict(_) | Self::ContentFilter { .. }
        )
    }
}

/// The remote wiki as seen by the reconciler. Every call is blocking and never retried.
pub trait ContentStore {
    fn fetch(&mut self, title: &str) -> Result<Option<RemotePage>, StoreError>;

    fn exists(&mut self, title: &str) -> Result<bool, StoreError> {
        Ok(self.fetch(title)?.is_some())
    }

    fn get(&mut self, title: &str) -> Result<Option<String>, StoreError> {
        Ok(self.fetch(title)?.map(|page| page.content))
    }

    fn categories_of(&mut self, title: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .fetch(title)?
            .map(|page| page.categories)
            .unwrap_or_default())
    }

    fn save(&mut self, title: &str, content: &str, summary: &str) -> Result<(), StoreError>;
    fn delete(&mut self, title: &str, reason: &str) -> Result<(), StoreError>;
    fn purge(&mut self, titles: &[String]) -> Result<(), StoreError>;
    fn upload_asset(
        &mut self,
        title: &str,
        path: &Path,
        comment: &str,
        text: &str,
    ) -> Result<(), StoreError>;
    /// Lowercase hex SHA-1 of the current file revision, `None` when no file exists.
    fn asset_sha1(&mut self, title: &str) -> Result<Option<String>, StoreError>;
    /// Page and subcategory titles in `category`, descending into subcategories when asked.
    fn category_members(
        &mut self,
        category: &str,
        recursive: bool,
    ) -> Result<Vec<String>, StoreError>;
    fn titles_matching(&mut self, namespace: i32, prefix: &str)
    -> Result<Vec<String>, StoreError>;
    fn request_count(&self) -> usize;
}

pub fn is_redirect(content: &str) -> bool {
    content
        .trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("#redirect"))
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::title::NS_MAIN;

    #[test]
    fn redirect_detection_is_case_insensitive() {
        assert!(is_redirect("#REDIRECT [[Foo]]"));
        assert!(is_redirect("  #redirect[[Foo]]"));
        assert!(!is_redirect("Text #REDIRECT [[Foo]]"));
        assert!(!is_redirect("#RE"));
    }

    #[test]
    fn conflict_errors_are_classified() {
        assert!(
            StoreError::Locked {
                title: "A".to_string(),
                info: String::new()
            }
            .is_conflict()
        );
        assert!(StoreError::EditConflict("A".to_string()).is_conflict());
        assert!(!StoreError::Missing("A".to_string()).is_conflict());
        assert!(!StoreError::Transport(anyhow::anyhow!("timeout")).is_conflict());
    }

    #[test]
    fn memory_store_reads_categories_from_content() {
        let mut store = MemoryStore::default()
            .with_page("Category:Docs", "[[Category:Docs]]")
            .with_page("Category:Docs Classes", "[[Category:Docs]]")
            .with_page("Docs Foo", "body\n[[Category:Docs|Foo]]\n[[Category:Docs Classes|Foo]]")
            .with_page("Docs Bar", "[[Category:Docs Classes]]")
            .with_page("Other", "plain");

        let page = store.fetch("Docs_Foo").expect("fetch").expect("page");
        assert!(page.in_category("Category:Docs Classes"));
        assert!(!page.is_redirect);

        let direct = store.category_members("Category:Docs", false).expect("members");
        assert_eq!(
            direct,
            vec!["Category:Docs", "Category:Docs Classes", "Docs Foo"]
        );
        let recursive = store.category_members("Category:Docs", true).expect("members");
        assert_eq!(
            recursive,
            vec!["Category:Docs", "Category:Docs Classes", "Docs Bar", "Docs Foo"]
        );
        assert_eq!(
            store.titles_matching(NS_MAIN, "Docs ").expect("prefix"),
            vec!["Docs Bar", "Docs Foo"]
        );
    }

    #[test]
    fn memory_store_honors_locks() {
        let mut store = MemoryStore::default().with_page("A", "x");
        store.lock("A");
        let error = store.save("A", "y", "s").expect_err("locked");
        assert!(error.is_conflict());
        assert_eq!(store.content("A"), Some("x"));
        assert!(matches!(
            store.delete("Missing", "r"),
            Err(StoreError::Missing(_))
        ));
    }
}
