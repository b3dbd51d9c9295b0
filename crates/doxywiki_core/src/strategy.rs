use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, error, info, warn};

use crate::store::{ContentStore, RemotePage, StoreError};
use crate::title::is_category_title;

/// Which remote pages the tool may treat as its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Carries the root category and is not a hand-expanded page in the user area.
    Generated {
        root: String,
        user_area: Option<String>,
    },
    /// Carries the category, whatever else it contains.
    Member { category: String },
    /// Shared with people; only a delimited span is ever touched.
    Shared,
}

impl Ownership {
    pub fn holds(&self, page: &RemotePage) -> bool {
        match self {
            Self::Generated { root, user_area } => {
                let user_content = user_area.as_deref().is_some_and(|area| {
                    page.in_category(area) && !page.is_redirect && !is_category_title(&page.title)
                });
                page.in_category(root) && !user_content
            }
            Self::Member { category } => page.in_category(category),
            Self::Shared => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub may_create: bool,
    pub may_edit: bool,
    pub ownership: Ownership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Permitted,
    Refused(String),
}

impl Permissions {
    pub fn new(ownership: Ownership) -> Self {
        Self {
            may_create: true,
            may_edit: true,
            ownership,
        }
    }

    pub fn check(&self, remote: Option<&RemotePage>, unsafe_override: bool) -> Permission {
        if unsafe_override {
            return Permission::Permitted;
        }
        match remote {
            None if self.may_create => Permission::Permitted,
            None => Permission::Refused("page does not exist and may not be created".to_string()),
            Some(_) if !self.may_edit => {
                Permission::Refused("page exists and may not be edited".to_string())
            }
            Some(page) if self.ownership.holds(page) => Permission::Permitted,
            Some(_) => Permission::Refused("page is not owned by doxywiki".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Unchanged,
    Refused,
    Failed,
    Corrupted,
}

impl ApplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Refused => "refused",
            Self::Failed => "failed",
            Self::Corrupted => "corrupted",
        }
    }

    /// The page is confirmed present and owned after this outcome.
    pub fn is_retained(self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    pub detail: Option<String>,
    pub content_hash: Option<String>,
}

impl ApplyOutcome {
    fn applied(content: &str) -> Self {
        Self {
            status: ApplyStatus::Applied,
            detail: None,
            content_hash: Some(content_hash(content)),
        }
    }

    fn unchanged(content: &str) -> Self {
        Self {
            status: ApplyStatus::Unchanged,
            detail: None,
            content_hash: Some(content_hash(content)),
        }
    }

    fn with_detail(status: ApplyStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
            content_hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub summary: &'a str,
    pub unsafe_override: bool,
}

pub trait UpdateStrategy {
    fn permissions(&self) -> &Permissions;

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome;
}

/// Replace the whole page. Identical content is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwriteStrategy {
    pub permissions: Permissions,
}

/// Replace only the text between two delimiter lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionStrategy {
    pub permissions: Permissions,
    pub begin: String,
    pub end: String,
}

/// Upload a local file; the page content becomes the file description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetStrategy {
    pub permissions: Permissions,
    pub source: PathBuf,
    pub comment: String,
}

/// Keep a wrapper page pointing at `target`: a redirect while untouched, an appended
/// inclusion once someone has written around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransclusionStrategy {
    pub permissions: Permissions,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Overwrite(OverwriteStrategy),
    Section(SectionStrategy),
    Asset(AssetStrategy),
    Transclusion(TransclusionStrategy),
}

impl Strategy {
    pub fn overwrite(ownership: Ownership) -> Self {
        Self::Overwrite(OverwriteStrategy {
            permissions: Permissions::new(ownership),
        })
    }

    pub fn section(ownership: Ownership, begin: &str, end: &str) -> Self {
        Self::Section(SectionStrategy {
            permissions: Permissions::new(ownership),
            begin: begin.to_string(),
            end: end.to_string(),
        })
    }

    pub fn asset(ownership: Ownership, source: PathBuf, comment: &str) -> Self {
        Self::Asset(AssetStrategy {
            permissions: Permissions::new(ownership),
            source,
            comment: comment.to_string(),
        })
    }

    pub fn transclusion(ownership: Ownership, target: &str) -> Self {
        Self::Transclusion(TransclusionStrategy {
            permissions: Permissions::new(ownership),
            target: target.to_string(),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite(_) => "overwrite",
            Self::Section(_) => "section",
            Self::Asset(_) => "asset",
            Self::Transclusion(_) => "transclusion",
        }
    }

    fn inner(&self) -> &dyn UpdateStrategy {
        match self {
            Self::Overwrite(strategy) => strategy,
            Self::Section(strategy) => strategy,
            Self::Asset(strategy) => strategy,
            Self::Transclusion(strategy) => strategy,
        }
    }
}

impl UpdateStrategy for Strategy {
    fn permissions(&self) -> &Permissions {
        self.inner().permissions()
    }

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome {
        self.inner().apply(title, content, store, context)
    }
}

/// Fetch the remote page and run the permission check shared by every strategy.
fn permitted(
    permissions: &Permissions,
    title: &str,
    store: &mut dyn ContentStore,
    context: &ApplyContext<'_>,
) -> Result<Option<RemotePage>, ApplyOutcome> {
    let remote = match store.fetch(title) {
        Ok(remote) => remote,
        Err(error) => return Err(store_failure(title, "read", &error)),
    };
    match permissions.check(remote.as_ref(), context.unsafe_override) {
        Permission::Permitted => Ok(remote),
        Permission::Refused(reason) => {
            warn!("refusing to update {title}: {reason}");
            Err(ApplyOutcome::with_detail(ApplyStatus::Refused, reason))
        }
    }
}

fn save(
    title: &str,
    content: &str,
    previous: Option<&str>,
    store: &mut dyn ContentStore,
    context: &ApplyContext<'_>,
) -> ApplyOutcome {
    match store.save(title, content, context.summary) {
        Ok(()) => {
            match previous {
                Some(previous) => {
                    let (added, removed) = line_changes(previous, content);
                    info!("updated {title} (+{added} -{removed})");
                }
                None => info!("created {title}"),
            }
            ApplyOutcome::applied(content)
        }
        Err(error) => store_failure(title, "save", &error),
    }
}

fn store_failure(title: &str, action: &str, error: &StoreError) -> ApplyOutcome {
    if error.is_conflict() {
        warn!("could not {action} {title}: {error}");
    } else {
        warn!("failed to {action} {title}: {error}");
    }
    ApplyOutcome::with_detail(ApplyStatus::Failed, error.to_string())
}

impl UpdateStrategy for OverwriteStrategy {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome {
        let remote = match permitted(&self.permissions, title, store, context) {
            Ok(remote) => remote,
            Err(outcome) => return outcome,
        };
        if let Some(page) = &remote
            && !page.is_redirect
            && page.content.trim_end() == content.trim_end()
        {
            debug!("{title} is unchanged");
            return ApplyOutcome::unchanged(content);
        }
        save(
            title,
            content,
            remote.as_ref().map(|page| page.content.as_str()),
            store,
            context,
        )
    }
}

impl SectionStrategy {
    fn section(&self, content: &str) -> String {
        format!("{}\n{}\n{}", self.begin, content.trim_end(), self.end)
    }

    /// `None` when only one delimiter is present (or they are out of order).
    fn merge(&self, existing: &str, content: &str) -> Option<String> {
        let begin = existing.find(&self.begin);
        let end = existing.find(&self.end);
        match (begin, end) {
            (Some(begin), Some(end)) if begin < end => {
                let after = &existing[end + self.end.len()..];
                Some(format!(
                    "{}{}{}",
                    &existing[..begin],
                    self.section(content),
                    after
                ))
            }
            (None, None) if existing.trim().is_empty() => Some(self.section(content)),
            (None, None) => Some(format!(
                "{}\n\n{}",
                existing.trim_end(),
                self.section(content)
            )),
            _ => None,
        }
    }
}

impl UpdateStrategy for SectionStrategy {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome {
        let remote = match permitted(&self.permissions, title, store, context) {
            Ok(remote) => remote,
            Err(outcome) => return outcome,
        };
        let Some(page) = remote else {
            return save(title, &self.section(content), None, store, context);
        };
        let Some(merged) = self.merge(&page.content, content) else {
            error!(
                "{title} contains only one of the delimiters {:?} and {:?}; leaving it untouched",
                self.begin, self.end
            );
            return ApplyOutcome::with_detail(
                ApplyStatus::Corrupted,
                format!(
                    "only one of {:?} and {:?} found",
                    self.begin, self.end
                ),
            );
        };
        if merged.trim_end() == page.content.trim_end() {
            debug!("{title} section is unchanged");
            return ApplyOutcome::unchanged(&merged);
        }
        save(title, &merged, Some(&page.content), store, context)
    }
}

impl UpdateStrategy for AssetStrategy {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome {
        let bytes = match fs::read(&self.source) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!("failed to read {}: {error}", self.source.display());
                return ApplyOutcome::with_detail(
                    ApplyStatus::Failed,
                    format!("failed to read {}: {error}", self.source.display()),
                );
            }
        };
        if let Err(outcome) = permitted(&self.permissions, title, store, context) {
            return outcome;
        }

        let local = sha1_hex(&bytes);
        match store.asset_sha1(title) {
            Ok(Some(remote)) if remote.eq_ignore_ascii_case(&local) => {
                debug!("{title} checksum matches, skipping upload");
                return ApplyOutcome::unchanged(&local);
            }
            Ok(_) => {}
            Err(error) => return store_failure(title, "read", &error),
        }

        match store.upload_asset(title, &self.source, &self.comment, content) {
            Ok(()) => {
                info!("uploaded {title}");
                ApplyOutcome::applied(&local)
            }
            Err(error) => store_failure(title, "upload", &error),
        }
    }
}

impl TransclusionStrategy {
    fn inclusion(&self) -> String {
        format!("{{{{:{}}}}}", self.target)
    }
}

impl UpdateStrategy for TransclusionStrategy {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn apply(
        &self,
        title: &str,
        content: &str,
        store: &mut dyn ContentStore,
        context: &ApplyContext<'_>,
    ) -> ApplyOutcome {
        let remote = match permitted(&self.permissions, title, store, context) {
            Ok(remote) => remote,
            Err(outcome) => return outcome,
        };
        match remote {
            None => save(title, content, None, store, context),
            Some(page) if page.is_redirect => {
                if page.content.trim_end() == content.trim_end() {
                    debug!("{title} is unchanged");
                    return ApplyOutcome::unchanged(content);
                }
                save(title, content, Some(&page.content), store, context)
            }
            Some(page) => {
                let inclusion = self.inclusion();
                if page.content.contains(&inclusion) {
                    debug!("{title} already includes {}", self.target);
                    return ApplyOutcome::unchanged(&page.content);
                }
                let expanded = format!("{}\n{inclusion}", page.content.trim_end());
                save(title, &expanded, Some(&page.content), store, context)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    Refused,
    Failed,
    Missing,
    /// Declined at the interactive prompt.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub status: DeleteStatus,
    pub detail: Option<String>,
}

/// Delete `title` only if `ownership` holds for it right now.
pub fn delete_owned(
    title: &str,
    reason: &str,
    ownership: &Ownership,
    store: &mut dyn ContentStore,
    unsafe_override: bool,
) -> DeleteOutcome {
    let outcome = |status, detail: Option<String>| DeleteOutcome { status, detail };
    let page = match store.fetch(title) {
        Ok(Some(page)) => page,
        Ok(None) => return outcome(DeleteStatus::Missing, None),
        Err(error) => {
            warn!("failed to read {title}: {error}");
            return outcome(DeleteStatus::Failed, Some(error.to_string()));
        }
    };
    if !unsafe_override && !ownership.holds(&page) {
        debug!("not deleting {title}: not owned");
        return outcome(
            DeleteStatus::Refused,
            Some("page is not owned by doxywiki".to_string()),
        );
    }
    match store.delete(title, reason) {
        Ok(()) => {
            info!("deleted {title}");
            outcome(DeleteStatus::Deleted, None)
        }
        Err(StoreError::Missing(_)) => outcome(DeleteStatus::Missing, None),
        Err(error) => {
            warn!("could not delete {title}: {error}");
            outcome(DeleteStatus::Failed, Some(error.to_string()))
        }
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    let mut output = String::with_capacity(40);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// First 8 bytes of the SHA-256 of `content`, as hex.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn line_changes(previous: &str, next: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(previous, next);
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}
