use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Navigation, Settings};
use crate::page::{DesiredSet, Page, PageKind, dump_pages};
use crate::store::{ContentStore, StoreError};
use crate::strategy::{ApplyContext, ApplyStatus, DeleteStatus, UpdateStrategy, delete_owned};
use crate::title::{NS_FILE, NS_MAIN, is_category_title, title_key};

pub const DELETE_CANDIDATES_FILE: &str = "delete-candidates.txt";
const UPDATE_DELETE_REASON: &str = "Generated documentation page is no longer produced";
const CLEANUP_DELETE_REASON: &str = "Removing generated documentation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugMode {
    /// Write converted pages to the debug directory.
    Dump,
    /// Skip ownership checks.
    Unsafe,
    /// Write the delete candidates instead of deleting.
    WhichDelete,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub debug: BTreeSet<DebugMode>,
    pub debug_dir: PathBuf,
    pub warnings_as_errors: bool,
}

impl RunOptions {
    pub fn has(&self, mode: DebugMode) -> bool {
        self.debug.contains(&mode)
    }
}

/// Asked once per deletion in interactive mode.
pub trait DeletionPrompt {
    fn confirm(&mut self, title: &str) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub title: String,
    pub kind: String,
    pub status: ApplyStatus,
    pub detail: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionResult {
    pub title: String,
    pub status: DeleteStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub command: String,
    pub applied: usize,
    pub unchanged: usize,
    pub refused: usize,
    pub failed: usize,
    pub corrupted: usize,
    pub deleted: usize,
    pub delete_refused: usize,
    pub delete_failed: usize,
    pub purged: usize,
    pub request_count: usize,
    /// Stopped before touching the wiki because warnings were fatal.
    pub aborted: bool,
    pub delete_candidates_path: Option<String>,
    pub warnings: Vec<String>,
    pub pages: Vec<PageResult>,
    pub deletions: Vec<DeletionResult>,
}

impl RunReport {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Self::default()
        }
    }

    fn record_page(&mut self, page: &Page, status: ApplyStatus, detail: Option<String>, hash: Option<String>) {
        match status {
            ApplyStatus::Applied => self.applied += 1,
            ApplyStatus::Unchanged => self.unchanged += 1,
            ApplyStatus::Refused => self.refused += 1,
            ApplyStatus::Failed => self.failed += 1,
            ApplyStatus::Corrupted => self.corrupted += 1,
        }
        self.pages.push(PageResult {
            title: page.title.as_str().to_string(),
            kind: page.kind.as_str().to_string(),
            status,
            detail,
            content_hash: hash,
        });
    }

    fn record_deletion(&mut self, title: &str, status: DeleteStatus, detail: Option<String>) {
        match status {
            DeleteStatus::Deleted => self.deleted += 1,
            DeleteStatus::Refused => self.delete_refused += 1,
            DeleteStatus::Failed => self.delete_failed += 1,
            DeleteStatus::Missing | DeleteStatus::Skipped => {}
        }
        self.deletions.push(DeletionResult {
            title: title.to_string(),
            status,
            detail,
        });
    }

    /// Any page or deletion ended in a failure the operator has to look at.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.corrupted > 0 || self.delete_failed > 0
    }
}

/// Enumerated titles no longer protected by this run, non-category pages first so that
/// categories go last.
pub fn stale_titles(enumerated: &BTreeSet<String>, protected: &BTreeSet<String>) -> Vec<String> {
    let mut stale = enumerated
        .iter()
        .filter(|title| !protected.contains(&title_key(title)))
        .cloned()
        .collect::<Vec<_>>();
    stale.sort_by_key(|title| (is_category_title(title), title_key(title)));
    stale
}

/// Drives one synchronization run against a content store.
pub struct Reconciler<'a> {
    settings: &'a Settings,
    store: &'a mut dyn ContentStore,
    options: &'a RunOptions,
    prompt: Option<&'a mut dyn DeletionPrompt>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        settings: &'a Settings,
        store: &'a mut dyn ContentStore,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            settings,
            store,
            options,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: &'a mut dyn DeletionPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Apply `desired`, delete what is no longer produced and purge what changed.
    pub fn update(&mut self, desired: &DesiredSet, extraction_warnings: &[String]) -> Result<RunReport> {
        let mut report = RunReport::new("update");
        report.warnings.extend(extraction_warnings.iter().cloned());
        report.warnings.extend(desired.warnings.iter().cloned());

        if self.options.has(DebugMode::Dump) {
            let written = dump_pages(desired, &self.options.debug_dir)?;
            info!(
                "wrote {written} pages to {}",
                self.options.debug_dir.display()
            );
        }

        if self.options.warnings_as_errors && !report.warnings.is_empty() {
            warn!(
                "{} warnings with --warnings-as-errors; not touching the wiki",
                report.warnings.len()
            );
            report.aborted = true;
            return Ok(report);
        }
        self.warn_if_unsafe();

        let context = ApplyContext {
            summary: &self.settings.edit_summary,
            unsafe_override: self.options.has(DebugMode::Unsafe),
        };
        let mut protected = BTreeSet::new();
        let mut applied = BTreeSet::new();
        for page in desired.categories().iter().chain(desired.pages()) {
            let content = page.content();
            let outcome = page
                .strategy
                .apply(page.title.as_str(), &content, &mut *self.store, &context);
            debug!(
                title = page.title.as_str(),
                strategy = page.strategy.as_str(),
                status = outcome.status.as_str(),
                "applied page"
            );
            let key = title_key(page.title.as_str());
            match outcome.status {
                ApplyStatus::Applied => {
                    applied.insert(key.clone());
                    protected.insert(key);
                }
                ApplyStatus::Unchanged | ApplyStatus::Failed | ApplyStatus::Corrupted => {
                    protected.insert(key);
                }
                ApplyStatus::Refused => {}
            }
            report.record_page(page, outcome.status, outcome.detail, outcome.content_hash);
        }
        info!(
            "applied {}, unchanged {}, refused {}, failed {}, corrupted {}",
            report.applied, report.unchanged, report.refused, report.failed, report.corrupted
        );

        if let Some(enumerated) = self.enumerate_owned(&mut report) {
            let candidates = stale_titles(&enumerated, &protected);
            if self.options.has(DebugMode::WhichDelete) {
                let retained = report
                    .pages
                    .iter()
                    .filter(|page| page.status.is_retained())
                    .map(|page| page.title.clone())
                    .collect::<BTreeSet<_>>();
                let path = write_delete_candidates(
                    &self.options.debug_dir,
                    &retained,
                    &enumerated,
                    &candidates,
                )?;
                report.delete_candidates_path = Some(path.to_string_lossy().replace('\\', "/"));
                report.request_count = self.store.request_count();
                return Ok(report);
            }
            self.sweep(&candidates, UPDATE_DELETE_REASON, &mut report);
        }

        let purge = purge_titles(desired, &applied);
        self.purge(&purge, &mut report);
        report.request_count = self.store.request_count();
        Ok(report)
    }

    /// Delete every page the tool owns.
    pub fn cleanup(&mut self) -> Result<RunReport> {
        let mut report = RunReport::new("cleanup");
        self.warn_if_unsafe();
        let Some(enumerated) = self.enumerate_owned(&mut report) else {
            report.request_count = self.store.request_count();
            return Ok(report);
        };
        let candidates = stale_titles(&enumerated, &BTreeSet::new());
        if self.options.has(DebugMode::WhichDelete) {
            let path = write_delete_candidates(
                &self.options.debug_dir,
                &BTreeSet::new(),
                &enumerated,
                &candidates,
            )?;
            report.delete_candidates_path = Some(path.to_string_lossy().replace('\\', "/"));
            report.request_count = self.store.request_count();
            return Ok(report);
        }
        self.sweep(&candidates, CLEANUP_DELETE_REASON, &mut report);
        report.request_count = self.store.request_count();
        Ok(report)
    }

    fn warn_if_unsafe(&self) {
        if self.options.has(DebugMode::Unsafe) {
            warn!("ownership checks are disabled for this run");
        }
    }

    /// Every remote title the tool could own. `None` (with a warning) when the store
    /// could not be queried, in which case nothing is deleted.
    fn enumerate_owned(&mut self, report: &mut RunReport) -> Option<BTreeSet<String>> {
        match self.collect_owned() {
            Ok(titles) => {
                debug!("enumerated {} owned pages", titles.len());
                Some(titles)
            }
            Err(error) => {
                let message = format!("could not enumerate owned pages, skipping deletions: {error}");
                warn!("{message}");
                report.warnings.push(message);
                None
            }
        }
    }

    fn collect_owned(&mut self) -> Result<BTreeSet<String>, StoreError> {
        let settings = self.settings;
        let root = settings.root_category_title();
        let mut titles = BTreeSet::new();
        titles.insert(root.clone());
        titles.extend(self.store.category_members(&root, true)?);
        titles.extend(
            self.store
                .category_members(&format!("Category:{}", settings.media_category), false)?,
        );

        if let Navigation::Transclusion { category, .. } = &settings.navigation {
            let members = self
                .store
                .category_members(&format!("Category:{category}"), true)?;
            for member in members {
                if titles.contains(&member) || is_category_title(&member) {
                    titles.insert(member);
                    continue;
                }
                if self
                    .store
                    .fetch(&member)?
                    .is_some_and(|page| page.is_redirect)
                {
                    titles.insert(member);
                }
            }
        }

        titles.extend(
            self.store
                .titles_matching(NS_MAIN, &format!("{} ", settings.page_prefix))?,
        );
        if !settings.media_prefix.is_empty() {
            titles.extend(
                self.store
                    .titles_matching(NS_FILE, &format!("{} ", settings.media_prefix))?,
            );
        }
        if let Some(user) = &settings.identity_user {
            titles.insert(format!("User:{user}"));
        }
        Ok(titles)
    }

    fn sweep(&mut self, candidates: &[String], reason: &str, report: &mut RunReport) {
        let ownership = self.settings.ownership();
        let unsafe_override = self.options.has(DebugMode::Unsafe);
        for title in candidates {
            if let Some(prompt) = self.prompt.as_deref_mut()
                && !prompt.confirm(title)
            {
                report.record_deletion(title, DeleteStatus::Skipped, Some("declined".to_string()));
                continue;
            }
            let outcome = delete_owned(title, reason, &ownership, &mut *self.store, unsafe_override);
            report.record_deletion(title, outcome.status, outcome.detail);
        }
        if !candidates.is_empty() {
            info!(
                "deleted {}, refused {}, failed {}",
                report.deleted, report.delete_refused, report.delete_failed
            );
        }
    }

    fn purge(&mut self, titles: &[String], report: &mut RunReport) {
        if titles.is_empty() {
            return;
        }
        match self.store.purge(titles) {
            Ok(()) => {
                report.purged = titles.len();
                info!("purged {} pages", titles.len());
            }
            Err(error) => {
                let message = format!("failed to purge {} pages: {error}", titles.len());
                warn!("{message}");
                report.warnings.push(message);
            }
        }
    }
}

/// Applied pages plus the wrappers whose target was applied.
fn purge_titles(desired: &DesiredSet, applied: &BTreeSet<String>) -> Vec<String> {
    let mut titles = Vec::new();
    for page in desired.categories().iter().chain(desired.pages()) {
        let key = title_key(page.title.as_str());
        let wrapper_target_applied = matches!(
            &page.kind,
            PageKind::Transclusion { target } if applied.contains(&title_key(target))
        );
        if applied.contains(&key) || wrapper_target_applied {
            titles.push(page.title.as_str().to_string());
        }
    }
    titles
}

fn write_delete_candidates(
    debug_dir: &Path,
    retained: &BTreeSet<String>,
    enumerated: &BTreeSet<String>,
    candidates: &[String],
) -> Result<PathBuf> {
    fs::create_dir_all(debug_dir)
        .with_context(|| format!("failed to create {}", debug_dir.display()))?;
    let mut output = String::new();
    for (label, titles) in [
        ("retained", retained.iter().collect::<Vec<_>>()),
        ("enumerated", enumerated.iter().collect::<Vec<_>>()),
        ("candidates", candidates.iter().collect::<Vec<_>>()),
    ] {
        output.push_str(&format!("# {label} ({})\n", titles.len()));
        for title in titles {
            output.push_str(title);
            output.push('\n');
        }
        output.push('\n');
    }
    let path = debug_dir.join(DELETE_CANDIDATES_FILE);
    fs::write(&path, output).with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        "wrote {} delete candidates to {}",
        candidates.len(),
        path.display()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{DoxywikiConfig, NavigationMode};
    use crate::extract::{DocType, DocumentRecord};
    use crate::page::PageFactory;
    use crate::store::testing::MemoryStore;

    fn settings(mode: NavigationMode) -> Settings {
        let mut config: DoxywikiConfig = toml::from_str(
            r#"
[docs]
category = "Docs"

[navigation]
category = "Nav"
"#,
        )
        .expect("parse");
        config.navigation.mode = mode;
        config.settings_with_lookup(|_| None).expect("settings")
    }

    fn record(file_name: &str, title: &str) -> DocumentRecord {
        DocumentRecord {
            file_path: PathBuf::from("html").join(file_name),
            file_name: file_name.to_string(),
            doc_type: DocType::Class,
            title: title.to_string(),
            breadcrumb: Vec::new(),
            summary: Vec::new(),
            body: format!("<p>{title} docs</p>"),
            footer: "<small>doxygen</small>".to_string(),
        }
    }

    fn desired(settings: &Settings, records: &[DocumentRecord]) -> DesiredSet {
        PageFactory::new(settings, records).build(records)
    }

    fn run_update(
        settings: &Settings,
        store: &mut MemoryStore,
        options: &RunOptions,
        records: &[DocumentRecord],
    ) -> RunReport {
        let desired = desired(settings, records);
        Reconciler::new(settings, store, options)
            .update(&desired, &[])
            .expect("update")
    }

    struct Scripted(Vec<String>);

    impl DeletionPrompt for Scripted {
        fn confirm(&mut self, title: &str) -> bool {
            self.0.iter().any(|allowed| allowed == title)
        }
    }

    #[test]
    fn second_run_is_all_unchanged() {
        let settings = settings(NavigationMode::Transclusion);
        let records = vec![record("class_foo.html", "Foo"), record("class_bar.html", "Bar")];
        let mut store = MemoryStore::default();
        let options = RunOptions::default();

        let first = run_update(&settings, &mut store, &options, &records);
        assert_eq!(first.failed, 0);
        assert_eq!(first.refused, 0);
        assert!(first.applied > 0);
        assert_eq!(first.deleted, 0);
        assert!(first.purged >= first.applied);

        let saves = store.saves.len();
        let second = run_update(&settings, &mut store, &options, &records);
        assert_eq!(second.applied, 0);
        assert_eq!(second.unchanged, first.applied);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.purged, 0);
        assert_eq!(store.saves.len(), saves);
        let hashes = |report: &RunReport| {
            report
                .pages
                .iter()
                .map(|page| page.content_hash.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(hashes(&first), hashes(&second));
    }

    #[test]
    fn update_deletes_only_stale_pages() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default()
            .with_page("Docs Old", "old\n[[Category:Docs]]\n[[Category:Docs Classes]]");
        let options = RunOptions::default();

        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        assert_eq!(report.deleted, 1);
        assert_eq!(store.deletes, vec!["Docs Old".to_string()]);
        assert!(store.has("Docs Foo"));
        assert!(!store.has("Docs Old"));
    }

    #[test]
    fn pages_not_carrying_root_are_never_touched() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default()
            .with_page("Docs Foo", "A person wrote this.")
            .with_page("Docs Notes", "Hand notes about the docs.");
        let options = RunOptions::default();

        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        assert_eq!(report.refused, 1);
        assert_eq!(store.content("Docs Foo"), Some("A person wrote this."));
        assert!(store.has("Docs Notes"));
        assert!(store.deletes.is_empty());
        assert_eq!(report.delete_refused, 2);
    }

    #[test]
    fn prefixed_files_are_enumerated_without_root_category() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default()
            .with_page("File:Docs stray.png", "Uploaded by hand.")
            .with_page("File:Other.png", "Unrelated upload.");
        let options = RunOptions::default();

        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        let status = |title: &str| {
            report
                .deletions
                .iter()
                .find(|item| item.title == title)
                .map(|item| item.status)
        };
        assert_eq!(status("File:Docs stray.png"), Some(DeleteStatus::Refused));
        assert_eq!(status("File:Other.png"), None);
        assert!(store.has("File:Docs stray.png"));
    }

    #[test]
    fn locked_category_does_not_block_dependents() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default();
        store.lock("Category:Docs Classes");
        let options = RunOptions::default();

        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        let status = |title: &str| {
            report
                .pages
                .iter()
                .find(|page| page.title == title)
                .map(|page| page.status)
        };
        assert_eq!(status("Category:Docs Classes"), Some(ApplyStatus::Failed));
        assert_eq!(status("Docs Foo"), Some(ApplyStatus::Applied));
        assert_eq!(report.failed, 1);
        assert!(report.has_failures());
    }

    #[test]
    fn failed_pages_are_not_deleted() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default();
        let options = RunOptions::default();
        let records = [record("class_foo.html", "Foo")];
        run_update(&settings, &mut store, &options, &records);

        let with_change = [DocumentRecord {
            body: "<p>changed</p>".to_string(),
            ..record("class_foo.html", "Foo")
        }];
        let desired = desired(&settings, &with_change);
        store.lock("Docs Foo");
        let report = Reconciler::new(&settings, &mut store, &options)
            .update(&desired, &[])
            .expect("update");
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
        assert!(store.has("Docs Foo"));
    }

    #[test]
    fn cleanup_removes_owned_pages_and_keeps_user_content() {
        let settings = settings(NavigationMode::Transclusion);
        let mut store = MemoryStore::default();
        let options = RunOptions::default();
        run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo"), record("class_bar.html", "Bar")]);

        store.put(
            "Bar",
            "My notes.\n{{:Docs Bar}}\n[[Category:Docs]]\n[[Category:Nav]]",
        );
        store.put("Unrelated", "not ours");

        let report = Reconciler::new(&settings, &mut store, &options)
            .cleanup()
            .expect("cleanup");
        assert!(store.has("Bar"));
        assert!(store.has("Unrelated"));
        assert!(!store.has("Docs Foo"));
        assert!(!store.has("Foo"));
        assert!(!store.has("Category:Docs"));
        assert!(!store.has("Category:Nav Classes"));
        assert_eq!(report.delete_refused, 1);
        assert_eq!(report.delete_failed, 0);

        let categories_start = store
            .deletes
            .iter()
            .position(|title| title.starts_with("Category:"))
            .expect("category deleted");
        assert!(
            store.deletes[categories_start..]
                .iter()
                .all(|title| title.starts_with("Category:"))
        );
    }

    #[test]
    fn interactive_prompt_can_skip_deletions() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default()
            .with_page("Docs A", "[[Category:Docs]]")
            .with_page("Docs B", "[[Category:Docs]]");
        let options = RunOptions::default();
        let mut prompt = Scripted(vec!["Docs A".to_string()]);
        let desired = desired(&settings, &[]);
        let report = Reconciler::new(&settings, &mut store, &options)
            .with_prompt(&mut prompt)
            .update(&desired, &[])
            .expect("update");
        assert!(!store.has("Docs A"));
        assert!(store.has("Docs B"));
        assert!(
            report
                .deletions
                .iter()
                .any(|item| item.title == "Docs B" && item.status == DeleteStatus::Skipped)
        );
    }

    #[test]
    fn which_delete_writes_candidates_without_deleting() {
        let temp = tempdir().expect("tempdir");
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default().with_page("Docs Old", "[[Category:Docs]]");
        let options = RunOptions {
            debug: BTreeSet::from([DebugMode::WhichDelete]),
            debug_dir: temp.path().join("debug"),
            warnings_as_errors: false,
        };
        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        assert!(store.has("Docs Old"));
        assert!(store.purges.is_empty());
        let listing = fs::read_to_string(temp.path().join("debug").join(DELETE_CANDIDATES_FILE))
            .expect("read");
        assert!(listing.contains("# candidates (1)\nDocs Old\n"));
        assert!(report.delete_candidates_path.is_some());
    }

    #[test]
    fn warnings_as_errors_abort_before_mutation() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default();
        let options = RunOptions {
            warnings_as_errors: true,
            ..RunOptions::default()
        };
        let desired = desired(&settings, &[record("class_foo.html", "Foo")]);
        let report = Reconciler::new(&settings, &mut store, &options)
            .update(&desired, &["class_bad.html has no footer element".to_string()])
            .expect("update");
        assert!(report.aborted);
        assert!(store.saves.is_empty());
        assert_eq!(store.request_count(), 0);
    }

    #[test]
    fn unsafe_mode_overrides_ownership() {
        let settings = settings(NavigationMode::Direct);
        let mut store = MemoryStore::default().with_page("Docs Foo", "A person wrote this.");
        let options = RunOptions {
            debug: BTreeSet::from([DebugMode::Unsafe]),
            ..RunOptions::default()
        };
        let report = run_update(&settings, &mut store, &options, &[record("class_foo.html", "Foo")]);
        assert_eq!(report.refused, 0);
        assert_ne!(store.content("Docs Foo"), Some("A person wrote this."));
    }

    #[test]
    fn purge_covers_wrappers_of_applied_pages() {
        let settings = settings(NavigationMode::Transclusion);
        let records = [record("class_foo.html", "Foo")];
        let desired = desired(&settings, &records);
        let applied = BTreeSet::from(["Docs Foo".to_string()]);
        assert_eq!(purge_titles(&desired, &applied), vec!["Docs Foo", "Foo"]);
    }

    #[test]
    fn stale_titles_put_categories_last() {
        let enumerated = BTreeSet::from([
            "Category:Docs".to_string(),
            "Docs A".to_string(),
            "Category:Docs Classes".to_string(),
            "Docs B".to_string(),
        ]);
        let protected = BTreeSet::from(["Docs B".to_string()]);
        assert_eq!(
            stale_titles(&enumerated, &protected),
            vec!["Docs A", "Category:Docs", "Category:Docs Classes"]
        );
    }

    #[test]
    fn enumeration_failure_skips_sweep() {
        struct Broken(MemoryStore);

        impl ContentStore for Broken {
            fn fetch(&mut self, title: &str) -> Result<Option<crate::store::RemotePage>, StoreError> {
                self.0.fetch(title)
            }
            fn save(&mut self, title: &str, content: &str, summary: &str) -> Result<(), StoreError> {
                self.0.save(title, content, summary)
            }
            fn delete(&mut self, title: &str, reason: &str) -> Result<(), StoreError> {
                self.0.delete(title, reason)
            }
            fn purge(&mut self, titles: &[String]) -> Result<(), StoreError> {
                self.0.purge(titles)
            }
            fn upload_asset(
                &mut self,
                title: &str,
                path: &Path,
                comment: &str,
                text: &str,
            ) -> Result<(), StoreError> {
                self.0.upload_asset(title, path, comment, text)
            }
            fn asset_sha1(&mut self, title: &str) -> Result<Option<String>, StoreError> {
                self.0.asset_sha1(title)
            }
            fn category_members(&mut self, _: &str, _: bool) -> Result<Vec<String>, StoreError> {
                Err(StoreError::Transport(anyhow::anyhow!("connection reset")))
            }
            fn titles_matching(&mut self, namespace: i32, prefix: &str) -> Result<Vec<String>, StoreError> {
                self.0.titles_matching(namespace, prefix)
            }
            fn request_count(&self) -> usize {
                self.0.request_count()
            }
        }

        let settings = settings(NavigationMode::Direct);
        let mut store = Broken(MemoryStore::default().with_page("Docs Old", "[[Category:Docs]]"));
        let options = RunOptions::default();
        let desired = desired(&settings, &[record("class_foo.html", "Foo")]);
        let report = Reconciler::new(&settings, &mut store, &options)
            .update(&desired, &[])
            .expect("update");
        assert!(store.0.has("Docs Old"));
        assert!(report.warnings.iter().any(|warning| warning.contains("skipping deletions")));
        assert!(report.deletions.is_empty());
        assert!(report.purged > 0);
    }
}
