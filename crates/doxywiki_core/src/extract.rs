use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::html::{Document, Element, UnmatchedClose, text_content};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocType {
    File,
    Namespace,
    Class,
    Interface,
    #[serde(rename = "MEMBERLIST")]
    MemberList,
    Other,
}

impl DocType {
    pub const ALL: [DocType; 6] = [
        DocType::File,
        DocType::Namespace,
        DocType::Class,
        DocType::Interface,
        DocType::MemberList,
        DocType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Namespace => "NAMESPACE",
            Self::Class => "CLASS",
            Self::Interface => "INTERFACE",
            Self::MemberList => "MEMBERLIST",
            Self::Other => "OTHER",
        }
    }

    /// Human label used in category names.
    pub fn label(self) -> &'static str {
        match self {
            Self::File => "Files",
            Self::Namespace => "Namespaces",
            Self::Class => "Classes",
            Self::Interface => "Interfaces",
            Self::MemberList => "Member Lists",
            Self::Other => "Other",
        }
    }
}

pub const DEFAULT_OTHER_FILES: &[&str] = &["hierarchy"];
pub const DEFAULT_PREFIXES: &[(&str, DocType)] = &[
    ("namespace_", DocType::Namespace),
    ("class_", DocType::Class),
    ("struct_", DocType::Class),
    ("interface_", DocType::Interface),
    ("_", DocType::File),
];
const MEMBERLIST_SUFFIX: &str = "-members";
const ESCAPED_DOT: &str = "_8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    other_files: Vec<String>,
    prefixes: Vec<(String, DocType)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_OTHER_FILES.iter().map(ToString::to_string).collect(),
            DEFAULT_PREFIXES
                .iter()
                .map(|(prefix, doc_type)| (prefix.to_string(), *doc_type))
                .collect(),
        )
    }
}

impl Classifier {
    pub fn new(other_files: Vec<String>, mut prefixes: Vec<(String, DocType)>) -> Self {
        prefixes.sort_by(|left, right| right.0.len().cmp(&left.0.len()).then(left.0.cmp(&right.0)));
        Self {
            other_files,
            prefixes,
        }
    }

    pub fn classify(&self, file_name: &str) -> Option<DocType> {
        let stem = file_name.strip_suffix(".html")?;
        if self.other_files.iter().any(|other| other == stem) {
            return Some(DocType::Other);
        }
        if stem.ends_with(MEMBERLIST_SUFFIX) {
            return Some(DocType::MemberList);
        }
        if let Some((_, doc_type)) = self
            .prefixes
            .iter()
            .find(|(prefix, _)| stem.starts_with(prefix.as_str()))
        {
            return Some(*doc_type);
        }
        if stem.contains(ESCAPED_DOT) {
            return Some(DocType::File);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub file_path: PathBuf,
    pub file_name: String,
    pub doc_type: DocType,
    pub title: String,
    pub breadcrumb: Vec<String>,
    pub summary: Vec<String>,
    pub body: String,
    pub footer: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file} has no {element} element")]
    MissingElement { file: String, element: &'static str },
    #[error("{file} is malformed: {source}")]
    Malformed {
        file: String,
        #[source]
        source: UnmatchedClose,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub records: Vec<DocumentRecord>,
    pub failures: Vec<String>,
    pub ignored: usize,
}

/// Walk `source_dir`, classify every `.html` file and extract a record from each.
pub fn discover_records(source_dir: &Path, classifier: &Classifier) -> Result<Discovery> {
    if !source_dir.is_dir() {
        bail!(
            "documentation source directory does not exist: {}",
            normalize_path(source_dir)
        );
    }

    let mut candidates = Vec::new();
    let mut discovery = Discovery::default();
    for entry in WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.ends_with(".html") {
            continue;
        }
        match classifier.classify(&file_name) {
            Some(doc_type) => candidates.push((entry.into_path(), file_name, doc_type)),
            None => {
                debug!(file = %file_name, "ignoring unclassified file");
                discovery.ignored += 1;
            }
        }
    }

    for (path, file_name, doc_type) in candidates {
        match read_record(&path, &file_name, doc_type) {
            Ok(record) => discovery.records.push(record),
            Err(error) => {
                warn!("skipping {file_name}: {error}");
                discovery.failures.push(error.to_string());
            }
        }
    }
    Ok(discovery)
}

pub fn read_record(
    path: &Path,
    file_name: &str,
    doc_type: DocType,
) -> Result<DocumentRecord, ExtractError> {
    let html = fs::read_to_string(path).map_err(|source| ExtractError::Io {
        path: normalize_path(path),
        source,
    })?;
    extract_record(path, file_name, doc_type, &html)
}

pub fn extract_record(
    path: &Path,
    file_name: &str,
    doc_type: DocType,
    html: &str,
) -> Result<DocumentRecord, ExtractError> {
    let document = Document::parse(html).map_err(|source| ExtractError::Malformed {
        file: file_name.to_string(),
        source,
    })?;
    let missing = |element| ExtractError::MissingElement {
        file: file_name.to_string(),
        element,
    };

    let title = single(
        &document,
        file_name,
        "title",
        |document: &Document, element: &Element| {
            element.tag.name == "div"
                && element.tag.has_class("title")
                && document.is_within(element, |tag| tag.has_class("header"))
        },
    )
    .map(|element| document.text(element))
    .filter(|title| !title.is_empty())
    .ok_or_else(|| missing("title"))?;

    let body = single(&document, file_name, "contents", |_, element| {
        element.tag.name == "div" && element.tag.has_class("contents")
    })
    .map(|element| document.inner_html(element).to_string())
    .ok_or_else(|| missing("contents"))?;

    let footer = document
        .find_all(|_, element| element.tag.name == "address" && element.tag.has_class("footer"))
        .chain(document.find_all(|_, element| {
            element.tag.name == "li" && element.tag.has_class("footer")
        }))
        .next()
        .map(|element| document.inner_html(element).trim().to_string())
        .ok_or_else(|| missing("footer"))?;

    let breadcrumb = document
        .find_all(|document, element| {
            element.tag.name == "li"
                && element.tag.has_class("navelem")
                && document.is_within(element, |tag| tag.attr("id") == Some("nav-path"))
        })
        .map(|element| document.inner_html(element).trim().to_string())
        .filter(|fragment| !text_content(fragment).is_empty())
        .collect();

    let summary = document
        .find_all(|document, element| {
            element.tag.name == "a"
                && document.is_within(element, |tag| tag.has_class("summary"))
        })
        .map(|element| document.outer_html(element).to_string())
        .collect();

    Ok(DocumentRecord {
        file_path: path.to_path_buf(),
        file_name: file_name.to_string(),
        doc_type,
        title,
        breadcrumb,
        summary,
        body,
        footer,
    })
}

fn single<'d, 'a, F>(
    document: &'d Document<'a>,
    file_name: &str,
    label: &str,
    predicate: F,
) -> Option<&'d Element>
where
    F: Fn(&Document, &Element) -> bool + 'd,
{
    let mut matches = document.find_all(predicate);
    let first = matches.next()?;
    if matches.next().is_some() {
        warn!("{file_name}: ambiguous {label} element, using the first");
    }
    Some(first)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    const CLASS_PAGE: &str = r##"<!DOCTYPE html>
<html><head><title>Foo</title></head>
<body>
<div id="nav-path" class="navpath"><ul>
<li class="navelem"><a class="el" href="namespace_outer.html">Outer</a></li>
<li class="navelem"><a class="el" href="class_foo.html">Foo</a></li>
</ul></div>
<div class="header">
  <div class="summary">
<a href="#pub-methods">Public Member Functions</a> &#124;
<a href="class_foo-members.html">List of all members</a>  </div>
  <div class="headertitle">
<div class="title">Outer::Foo&lt; T &gt; Class Template Reference</div>  </div>
</div>
<div class="contents">
<p>Does things. See <a class="el" href="class_bar.html#a1">Bar::go</a>.</p>
<img src="class_foo__inherit__graph.png" usemap="#map" alt=""/>
<map name="map"><area href="class_bar.html" shape="rect" coords="0,0,1,1"/></map>
</div>
<hr class="footer"/><address class="footer"><small>Generated by doxygen</small></address>
</body></html>
"##;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write");
    }

    #[test]
    fn classify_uses_other_files_suffix_and_longest_prefix() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("hierarchy.html"), Some(DocType::Other));
        assert_eq!(
            classifier.classify("class_foo-members.html"),
            Some(DocType::MemberList)
        );
        assert_eq!(classifier.classify("class_foo.html"), Some(DocType::Class));
        assert_eq!(classifier.classify("struct_pair.html"), Some(DocType::Class));
        assert_eq!(
            classifier.classify("namespace_outer.html"),
            Some(DocType::Namespace)
        );
        assert_eq!(
            classifier.classify("interface_i_thing.html"),
            Some(DocType::Interface)
        );
        assert_eq!(classifier.classify("_foo_8h.html"), Some(DocType::File));
        assert_eq!(classifier.classify("foo_8h.html"), Some(DocType::File));
        assert_eq!(classifier.classify("index.html"), None);
        assert_eq!(classifier.classify("class_foo.css"), None);
    }

    #[test]
    fn custom_prefixes_are_honored() {
        let classifier = Classifier::new(
            Vec::new(),
            vec![
                ("class".to_string(), DocType::Class),
                ("classic_".to_string(), DocType::Other),
            ],
        );
        assert_eq!(classifier.classify("classic_x.html"), Some(DocType::Other));
        assert_eq!(classifier.classify("classFoo.html"), Some(DocType::Class));
        assert_eq!(classifier.classify("hierarchy.html"), None);
    }

    #[test]
    fn extract_record_reads_doxygen_layout() {
        let record = extract_record(
            Path::new("html/class_foo.html"),
            "class_foo.html",
            DocType::Class,
            CLASS_PAGE,
        )
        .expect("extract");

        assert_eq!(record.title, "Outer::Foo< T > Class Template Reference");
        assert_eq!(record.breadcrumb.len(), 2);
        assert!(record.breadcrumb[0].contains("namespace_outer.html"));
        assert_eq!(record.summary.len(), 2);
        assert!(record.summary[1].starts_with("<a href=\"class_foo-members.html\">"));
        assert!(record.body.contains("Does things."));
        assert!(record.body.contains("<map name=\"map\">"));
        assert_eq!(record.footer, "<small>Generated by doxygen</small>");
    }

    #[test]
    fn extract_record_requires_footer() {
        let html = CLASS_PAGE.replace("<address class=\"footer\">", "<address>");
        let error = extract_record(
            Path::new("class_foo.html"),
            "class_foo.html",
            DocType::Class,
            &html,
        )
        .expect_err("missing footer");
        assert!(matches!(
            error,
            ExtractError::MissingElement {
                element: "footer",
                ..
            }
        ));
    }

    #[test]
    fn extract_record_accepts_navpath_footer() {
        let html = CLASS_PAGE
            .replace("<address class=\"footer\">", "<address>")
            .replace(
                "</body>",
                "<div id=\"nav-path\"><ul><li class=\"footer\">Generated</li></ul></div></body>",
            );
        let record = extract_record(
            Path::new("class_foo.html"),
            "class_foo.html",
            DocType::Class,
            &html,
        )
        .expect("extract");
        assert_eq!(record.footer, "Generated");
    }

    #[test]
    fn extract_record_reports_unrecoverable_nesting() {
        let html = CLASS_PAGE.replace("</body>", "</section></body>");
        let error = extract_record(
            Path::new("class_foo.html"),
            "class_foo.html",
            DocType::Class,
            &html,
        )
        .expect_err("malformed");
        assert!(matches!(error, ExtractError::Malformed { .. }));
    }

    #[test]
    fn discover_records_skips_broken_and_unclassified_files() {
        let temp = tempdir().expect("tempdir");
        let html_dir = temp.path().join("html");
        write_file(&html_dir.join("class_foo.html"), CLASS_PAGE);
        write_file(
            &html_dir.join("class_broken.html"),
            "<html><body><div class=\"contents\">x</div></body></html>",
        );
        write_file(&html_dir.join("index.html"), CLASS_PAGE);
        write_file(&html_dir.join("doxygen.css"), "body {}");

        let discovery = discover_records(&html_dir, &Classifier::default()).expect("discover");
        assert_eq!(discovery.records.len(), 1);
        assert_eq!(discovery.records[0].file_name, "class_foo.html");
        assert_eq!(discovery.failures.len(), 1);
        assert!(discovery.failures[0].contains("class_broken.html"));
        assert_eq!(discovery.ignored, 1);
    }

    #[test]
    fn discover_records_fails_for_missing_directory() {
        let temp = tempdir().expect("tempdir");
        let error = discover_records(&temp.path().join("nope"), &Classifier::default())
            .expect_err("missing dir");
        assert!(error.to_string().contains("does not exist"));
    }
}
