use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::{Navigation, Settings};
use crate::convert::{Conversion, CrossReferences, MediaRef, convert};
use crate::extract::{DocType, DocumentRecord};
use crate::strategy::{Ownership, Strategy};
use crate::title::{self, Title, title_key};

pub const STYLESHEET_BEGIN: &str = "/* doxywiki:begin */";
pub const STYLESHEET_END: &str = "/* doxywiki:end */";
pub const IMAGE_COMMENT: &str = "Generated documentation image";

const STYLESHEET_CSS: &str = r#".doxywiki-infobox { float: right; margin: 0 0 1em 1em; font-size: 90%; }
.doxywiki-infobox th { text-align: left; white-space: nowrap; }
.memitem { margin-bottom: 1em; }
.memproto, .memname { font-family: monospace; }
.memdoc { margin-left: 2em; }
.fragment { font-family: monospace; white-space: pre; background: #f8f8f8; padding: 0.5em; }"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    Doc { file_name: String, doc_type: DocType },
    Category,
    Transclusion { target: String },
    Image { source: String },
    Identity,
    Stylesheet,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doc { .. } => "doc",
            Self::Category => "category",
            Self::Transclusion { .. } => "transclusion",
            Self::Image { .. } => "image",
            Self::Identity => "identity",
            Self::Stylesheet => "stylesheet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub kind: PageKind,
    pub title: Title,
    pub body: String,
    /// Full `Category:` titles, in declaration order.
    pub categories: Vec<String>,
    pub sort_key: Option<String>,
    pub strategy: Strategy,
}

impl Page {
    /// Body followed by the category block, in the form the wiki stores it.
    pub fn content(&self) -> String {
        let mut content = self.body.replace("\r\n", "\n").trim_end().to_string();
        if !self.categories.is_empty() {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            let links = self
                .categories
                .iter()
                .map(|category| match &self.sort_key {
                    Some(key) => format!("[[{category}|{key}]]"),
                    None => format!("[[{category}]]"),
                })
                .collect::<Vec<_>>();
            content.push_str(&links.join("\n"));
        }
        content
    }

    fn add_category(&mut self, category: &str) {
        if !self
            .categories
            .iter()
            .any(|existing| title::same_title(existing, category))
        {
            self.categories.push(category.to_string());
        }
    }
}

/// Deduplicated pages to be present after a run. Categories are kept apart so they can
/// be applied before anything that declares membership in them.
#[derive(Debug, Clone, Default)]
pub struct DesiredSet {
    categories: Vec<Page>,
    pages: Vec<Page>,
    index: BTreeMap<String, (bool, usize)>,
    pub warnings: Vec<String>,
}

impl DesiredSet {
    pub fn insert(&mut self, page: Page) {
        let key = title_key(page.title.as_str());
        if let Some((is_category, position)) = self.index.get(&key).copied() {
            let existing = if is_category {
                &mut self.categories[position]
            } else {
                &mut self.pages[position]
            };
            if existing.kind != page.kind || existing.body != page.body {
                let message = format!(
                    "duplicate title {} ({} and {}); keeping the first",
                    existing.title,
                    describe(&existing.kind),
                    describe(&page.kind)
                );
                warn!("{message}");
                self.warnings.push(message);
            }
            for category in &page.categories {
                existing.add_category(category);
            }
            return;
        }

        let is_category = page.kind == PageKind::Category;
        let list = if is_category {
            &mut self.categories
        } else {
            &mut self.pages
        };
        self.index.insert(key, (is_category, list.len()));
        list.push(page);
    }

    pub fn categories(&self) -> &[Page] {
        &self.categories
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn get(&self, title: &str) -> Option<&Page> {
        let (is_category, position) = self.index.get(&title_key(title)).copied()?;
        if is_category {
            self.categories.get(position)
        } else {
            self.pages.get(position)
        }
    }

    pub fn len(&self) -> usize {
        self.categories.len() + self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn describe(kind: &PageKind) -> String {
    match kind {
        PageKind::Doc { file_name, .. } => file_name.clone(),
        PageKind::Image { source } => source.clone(),
        other => other.as_str().to_string(),
    }
}

struct RecordTitles {
    doc: Title,
    wrapper: Option<Title>,
}

impl RecordTitles {
    fn public(&self) -> &Title {
        self.wrapper.as_ref().unwrap_or(&self.doc)
    }
}

/// Expands documentation records into pages, using one validated `Settings`.
pub struct PageFactory<'s> {
    settings: &'s Settings,
    references: CrossReferences,
    titles: BTreeMap<String, RecordTitles>,
    related: Vec<(String, String)>,
    warnings: Vec<String>,
}

impl<'s> PageFactory<'s> {
    pub fn new(settings: &'s Settings, records: &[DocumentRecord]) -> Self {
        let mut references = CrossReferences::new(&settings.media_prefix);
        let mut titles = BTreeMap::new();
        let mut related = Vec::new();
        let mut warnings = Vec::new();

        for record in records {
            match record_titles(settings, record) {
                Ok(record_titles) => {
                    references.insert(&record.file_name, record_titles.public().as_str());
                    if record.doc_type == DocType::Other {
                        related.push((
                            record_titles.public().as_str().to_string(),
                            record.title.clone(),
                        ));
                    }
                    titles.insert(record.file_name.clone(), record_titles);
                }
                Err(error) => {
                    let message = format!("{}: {error}", record.file_name);
                    warn!("{message}");
                    warnings.push(message);
                }
            }
        }

        Self {
            settings,
            references,
            titles,
            related,
            warnings,
        }
    }

    /// The complete desired page set for `records`.
    pub fn build(&self, records: &[DocumentRecord]) -> DesiredSet {
        let mut desired = DesiredSet {
            warnings: self.warnings.clone(),
            ..DesiredSet::default()
        };
        let doc_types = records
            .iter()
            .filter(|record| self.titles.contains_key(&record.file_name))
            .map(|record| record.doc_type)
            .collect::<BTreeSet<_>>();
        for page in self.singletons(&doc_types) {
            desired.insert(page);
        }
        for record in records {
            let Some(expansion) = self.expand(record) else {
                continue;
            };
            desired.warnings.extend(expansion.warnings);
            for page in expansion.pages {
                desired.insert(page);
            }
        }
        debug!(
            categories = desired.categories.len(),
            pages = desired.pages.len(),
            "desired set built"
        );
        desired
    }

    /// Category, identity and stylesheet pages that exist independently of any record.
    pub fn singletons(&self, doc_types: &BTreeSet<DocType>) -> Vec<Page> {
        let settings = self.settings;
        let root = settings.root_category_title();
        let navigation = format!("Category:{}", settings.navigation.category());
        let mut pages = Vec::new();

        let mut push_category = |name: &str, body: String, categories: Vec<String>| {
            if let Ok(title) = Title::category(name) {
                pages.push(Page {
                    kind: PageKind::Category,
                    title,
                    body,
                    categories,
                    sort_key: None,
                    strategy: Strategy::overwrite(settings.ownership()),
                });
            }
        };

        push_category(
            &settings.root_category,
            "Generated API documentation maintained by doxywiki. Pages in this category are \
             replaced or deleted automatically on every run."
                .to_string(),
            vec![root.clone()],
        );
        push_category(
            &settings.media_category,
            "Images generated for the API documentation.".to_string(),
            vec![root.clone()],
        );
        push_category(
            settings.navigation.category(),
            "Browsable index of the API documentation.".to_string(),
            vec![root.clone()],
        );
        for doc_type in doc_types {
            push_category(
                &settings.type_category(*doc_type),
                format!("Generated documentation pages of type {}.", doc_type.as_str()),
                vec![root.clone()],
            );
            push_category(
                &settings.navigation_type_category(*doc_type),
                format!("Documentation entries of type {}.", doc_type.as_str()),
                vec![navigation.clone(), root.clone()],
            );
        }

        if let Some(user) = &settings.identity_user {
            match Title::in_namespace("User", user) {
                Ok(title) => pages.push(Page {
                    kind: PageKind::Identity,
                    title,
                    body: format!(
                        "This account is a bot that publishes the generated API documentation \
                         in [[:{root}]]. Its edits are made automatically."
                    ),
                    categories: vec![root.clone()],
                    sort_key: None,
                    strategy: Strategy::overwrite(settings.ownership()),
                }),
                Err(error) => warn!("skipping identity page for {user}: {error}"),
            }
        }

        if let Some(stylesheet) = &settings.stylesheet {
            match Title::new(stylesheet, false) {
                Ok(title) => pages.push(Page {
                    kind: PageKind::Stylesheet,
                    title,
                    body: STYLESHEET_CSS.to_string(),
                    categories: Vec::new(),
                    sort_key: None,
                    strategy: Strategy::section(Ownership::Shared, STYLESHEET_BEGIN, STYLESHEET_END),
                }),
                Err(error) => warn!("skipping stylesheet {stylesheet}: {error}"),
            }
        }

        pages
    }

    /// DocPage, wrapper and image pages for one record. `None` when its title was unusable.
    pub fn expand(&self, record: &DocumentRecord) -> Option<Expansion> {
        let titles = self.titles.get(&record.file_name)?;
        let settings = self.settings;
        let root = settings.root_category_title();
        let sort_key = title::sort_key(&record.title);
        let mut expansion = Expansion::default();
        let mut media = Vec::new();

        let mut run = |fragment: &str| -> String {
            let Conversion {
                markup,
                media: found,
                warnings,
            } = convert(fragment, &self.references);
            for warning in warnings {
                let message = format!("{}: {warning}", record.file_name);
                debug!("{message}");
                expansion.warnings.push(message);
            }
            for item in found {
                if !media.iter().any(|known: &MediaRef| known.source == item.source) {
                    media.push(item);
                }
            }
            markup
        };

        let breadcrumb = record
            .breadcrumb
            .iter()
            .map(|item| run(item))
            .collect::<Vec<_>>();
        let summary = record
            .summary
            .iter()
            .map(|item| run(item))
            .collect::<Vec<_>>();
        let body = run(&record.body);
        let footer = run(&record.footer);

        let mut sections = vec![self.notice(record, titles)];
        if let Some(display) = titles.doc.display() {
            sections.push(format!("{{{{DISPLAYTITLE:{}}}}}", escape_display(display)));
        }
        sections.push(self.infobox(record, titles, &breadcrumb, &summary));
        sections.push(body.trim().to_string());
        sections.push(footer.trim().to_string());
        let body = sections
            .into_iter()
            .filter(|section| !section.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut categories = vec![
            root.clone(),
            format!("Category:{}", settings.type_category(record.doc_type)),
        ];
        let navigation_categories = vec![
            format!("Category:{}", settings.navigation.category()),
            format!(
                "Category:{}",
                settings.navigation_type_category(record.doc_type)
            ),
        ];
        if matches!(settings.navigation, Navigation::Direct { .. }) {
            categories.extend(navigation_categories.iter().cloned());
        }

        expansion.pages.push(Page {
            kind: PageKind::Doc {
                file_name: record.file_name.clone(),
                doc_type: record.doc_type,
            },
            title: titles.doc.clone(),
            body,
            categories,
            sort_key: Some(sort_key.clone()),
            strategy: Strategy::overwrite(settings.ownership()),
        });

        if let Some(wrapper) = &titles.wrapper {
            let target = titles.doc.as_str();
            let mut categories = vec![root.clone()];
            categories.extend(navigation_categories);
            expansion.pages.push(Page {
                kind: PageKind::Transclusion {
                    target: target.to_string(),
                },
                title: wrapper.clone(),
                body: format!(
                    "#REDIRECT [[{target}]]\n<!-- To add your own notes, replace the redirect \
                     line above with {{{{:{target}}}}} and write around it. The generated \
                     content stays in [[{target}]]. -->"
                ),
                categories,
                sort_key: Some(sort_key.clone()),
                strategy: Strategy::transclusion(
                    Ownership::Member {
                        category: root.clone(),
                    },
                    target,
                ),
            });
        }

        let base = record
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        for item in media {
            let source = base.join(&item.source);
            if !source.is_file() {
                let message = format!(
                    "{}: image {} not found at {}",
                    record.file_name,
                    item.source,
                    source.display()
                );
                warn!("{message}");
                expansion.warnings.push(message);
                continue;
            }
            let title = match Title::new(&item.title, false) {
                Ok(title) => title,
                Err(error) => {
                    expansion
                        .warnings
                        .push(format!("{}: {error}", record.file_name));
                    continue;
                }
            };
            expansion.pages.push(Page {
                kind: PageKind::Image {
                    source: item.source.clone(),
                },
                title,
                body: "Image generated for the API documentation.".to_string(),
                categories: vec![
                    root.clone(),
                    format!("Category:{}", settings.media_category),
                ],
                sort_key: None,
                strategy: Strategy::asset(settings.ownership(), source, IMAGE_COMMENT),
            });
        }

        Some(expansion)
    }

    fn notice(&self, record: &DocumentRecord, titles: &RecordTitles) -> String {
        match &titles.wrapper {
            Some(wrapper) => format!(
                "<!-- Generated by doxywiki from {}. Changes made here are overwritten on the \
                 next run; add hand-written content to [[{wrapper}]] instead. -->",
                record.file_name
            ),
            None => format!(
                "<!-- Generated by doxywiki from {}. Changes made here are overwritten on the \
                 next run; edit the documentation comments in the source code instead. -->",
                record.file_name
            ),
        }
    }

    fn infobox(
        &self,
        record: &DocumentRecord,
        titles: &RecordTitles,
        breadcrumb: &[String],
        summary: &[String],
    ) -> String {
        let mut rows = vec![("Type", record.doc_type.as_str().to_string())];
        if !breadcrumb.is_empty() {
            rows.push(("Location", join_cell(breadcrumb, " / ")));
        }
        if !summary.is_empty() {
            rows.push(("Contents", join_cell(summary, "<br />")));
        }
        let related = self
            .related
            .iter()
            .filter(|(title, _)| title != titles.public().as_str())
            .map(|(title, label)| format!("[[{title}|{label}]]"))
            .collect::<Vec<_>>();
        if !related.is_empty() {
            rows.push(("See also", related.join("<br />")));
        }

        let mut table = String::from("{| class=\"wikitable doxywiki-infobox\"\n");
        for (index, (label, value)) in rows.iter().enumerate() {
            if index > 0 {
                table.push_str("|-\n");
            }
            table.push_str(&format!("! {label}\n| {value}\n"));
        }
        table.push_str("|}");
        table
    }
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub pages: Vec<Page>,
    pub warnings: Vec<String>,
}

fn record_titles(
    settings: &Settings,
    record: &DocumentRecord,
) -> Result<RecordTitles, title::TitleError> {
    let doc = Title::prefixed(
        &settings.page_prefix,
        &record.title,
        settings.full_display_titles,
    )?;
    let wrapper = match &settings.navigation {
        Navigation::Transclusion { prefix, .. } => {
            Some(Title::prefixed(prefix, &record.title, false)?)
        }
        Navigation::Direct { .. } => None,
    };
    Ok(RecordTitles { doc, wrapper })
}

/// Table cells cannot hold a bare `|` line start; keep fragments on one line.
fn join_cell(items: &[String], separator: &str) -> String {
    items
        .iter()
        .map(|item| item.replace('\n', " ").trim().to_string())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn escape_display(display: &str) -> String {
    display
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Write each generated page and the media list under `debug_dir`.
pub fn dump_pages(desired: &DesiredSet, debug_dir: &Path) -> Result<usize> {
    fs::create_dir_all(debug_dir)
        .with_context(|| format!("failed to create {}", debug_dir.display()))?;
    let mut written = 0;
    let mut media = Vec::new();
    for page in desired.pages() {
        match &page.kind {
            PageKind::Doc { file_name, .. } => {
                let path = debug_dir.join(format!("{file_name}.wiki"));
                fs::write(&path, format!("{}\n{}\n", page.title, page.content()))
                    .with_context(|| format!("failed to write {}", path.display()))?;
                written += 1;
            }
            PageKind::Image { source } => media.push(format!("{}\t{source}", page.title)),
            _ => {}
        }
    }
    let path: PathBuf = debug_dir.join("media.txt");
    let mut listing = media.join("\n");
    listing.push('\n');
    fs::write(&path, listing).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(written)
}
