use std::fmt;

use thiserror::Error;

/// MediaWiki rejects titles longer than this many bytes.
pub const MAX_TITLE_BYTES: usize = 255;
pub const PLACEHOLDER: char = '-';

pub const NS_MAIN: i32 = 0;
pub const NS_USER: i32 = 2;
pub const NS_FILE: i32 = 6;
pub const NS_MEDIAWIKI: i32 = 8;
pub const NS_CATEGORY: i32 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TitleError {
    #[error("title is empty after normalization (raw: {0:?})")]
    Empty(String),
    #[error("title {title:?} is not a legal page title: {reason}")]
    Invalid { title: String, reason: &'static str },
}

/// A legal page title plus the display override used when normalization had to alter it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Title {
    normalized: String,
    display: Option<String>,
}

impl Title {
    pub fn new(raw: &str, keep_display: bool) -> Result<Self, TitleError> {
        let soft = soft_normalize(raw);
        let normalized = hard_normalize(&soft);
        validate(&normalized).map_err(|error| match error {
            TitleError::Empty(_) => TitleError::Empty(raw.to_string()),
            other => other,
        })?;
        let display = if keep_display && normalized != soft {
            Some(soft)
        } else {
            None
        };
        Ok(Self {
            normalized,
            display,
        })
    }

    /// `prefix name`, or just `name` when the prefix is blank.
    pub fn prefixed(prefix: &str, name: &str, keep_display: bool) -> Result<Self, TitleError> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            Self::new(name, keep_display)
        } else {
            Self::new(&format!("{prefix} {name}"), keep_display)
        }
    }

    pub fn in_namespace(namespace: &str, name: &str) -> Result<Self, TitleError> {
        let local = Self::new(name, false)?;
        Self::new(&format!("{namespace}:{}", local.normalized), false)
    }

    pub fn category(name: &str) -> Result<Self, TitleError> {
        Self::in_namespace("Category", name)
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// The part after the namespace prefix, if any.
    pub fn local_name(&self) -> &str {
        match self.normalized.split_once(':') {
            Some((_, rest)) => rest,
            None => &self.normalized,
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Full normalization of a raw string into a legal title.
pub fn normalize(raw: &str) -> Result<String, TitleError> {
    Title::new(raw, false).map(|title| title.normalized)
}

pub fn soft_normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch == '_' || ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    capitalize_first(&out)
}

pub fn hard_normalize(soft: &str) -> String {
    let replaced: String = soft
        .chars()
        .map(|ch| if is_illegal_char(ch) { PLACEHOLDER } else { ch })
        .collect();
    let replaced = neutralize_percent_escapes(&replaced);
    let replaced = neutralize_tilde_runs(&replaced);
    let replaced = neutralize_relative_segments(&replaced);
    let mut out = match replaced.strip_prefix(':') {
        Some(rest) => format!("{PLACEHOLDER}{rest}"),
        None => replaced,
    };
    truncate_to_bytes(&mut out, MAX_TITLE_BYTES);
    // The cut can leave a trailing `.` or `..` segment behind.
    neutralize_relative_segments(out.trim())
}

pub fn validate(title: &str) -> Result<(), TitleError> {
    if title.is_empty() {
        return Err(TitleError::Empty(String::new()));
    }
    let invalid = |reason| {
        Err(TitleError::Invalid {
            title: title.to_string(),
            reason,
        })
    };
    if title.len() > MAX_TITLE_BYTES {
        return invalid("longer than 255 bytes");
    }
    if title.chars().any(is_illegal_char) {
        return invalid("contains an illegal character");
    }
    if title.starts_with(':') {
        return invalid("starts with a colon");
    }
    if title.contains("~~~") {
        return invalid("contains a signature sequence");
    }
    if has_percent_escape(title) {
        return invalid("contains a percent escape");
    }
    if title.split('/').any(|segment| segment == "." || segment == "..") {
        return invalid("contains a relative path segment");
    }
    if title != title.trim() || title.contains("  ") || title.contains('_') {
        return invalid("is not soft-normalized");
    }
    Ok(())
}

/// Comparison key for titles coming back from the remote store.
pub fn title_key(title: &str) -> String {
    soft_normalize(title)
}

pub fn same_title(left: &str, right: &str) -> bool {
    title_key(left) == title_key(right)
}

pub fn is_category_title(title: &str) -> bool {
    title_key(title).starts_with("Category:")
}

/// Category sort key: dot-separated components in reverse order.
pub fn sort_key(raw_title: &str) -> String {
    let reversed = raw_title
        .split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .rev()
        .collect::<Vec<_>>()
        .join(".");
    reversed
        .chars()
        .map(|ch| match ch {
            '[' | ']' | '|' | '{' | '}' => PLACEHOLDER,
            ch if ch.is_whitespace() => ' ',
            ch => ch,
        })
        .collect()
}

fn is_illegal_char(ch: char) -> bool {
    matches!(ch, '#' | '<' | '>' | '[' | ']' | '|' | '{' | '}' | '\u{FFFD}') || ch.is_control()
}

fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(value.len());
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn has_percent_escape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.windows(3).any(|window| {
        window[0] == b'%' && window[1].is_ascii_hexdigit() && window[2].is_ascii_hexdigit()
    })
}

fn neutralize_percent_escapes(value: &str) -> String {
    if !has_percent_escape(value) {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    for (index, ch) in value.char_indices() {
        let escape = ch == '%'
            && bytes.get(index + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(index + 2).is_some_and(u8::is_ascii_hexdigit);
        out.push(if escape { PLACEHOLDER } else { ch });
    }
    out
}

fn neutralize_tilde_runs(value: &str) -> String {
    if !value.contains("~~~") {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut run = 0usize;
    for ch in value.chars() {
        if ch == '~' {
            run += 1;
            continue;
        }
        flush_tildes(&mut out, run);
        run = 0;
        out.push(ch);
    }
    flush_tildes(&mut out, run);
    out
}

fn flush_tildes(out: &mut String, run: usize) {
    let ch = if run >= 3 { PLACEHOLDER } else { '~' };
    out.extend(std::iter::repeat_n(ch, run));
}

fn neutralize_relative_segments(value: &str) -> String {
    if !value.split('/').any(|segment| segment == "." || segment == "..") {
        return value.to_string();
    }
    value
        .split('/')
        .map(|segment| match segment {
            "." | ".." => segment.replace('.', &PLACEHOLDER.to_string()),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn truncate_to_bytes(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut cut = max;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "Foo",
        "foo_bar  baz",
        "  leading and trailing  ",
        "Foo< T > Class Template Reference",
        "std::vector< int >",
        "operator[]",
        "a|b{c}#d",
        ":colon start",
        "100%20 done",
        "sig~~~~ here",
        "./relative/../path",
        "..",
        "tab\tand\nnewline",
        "ßharp",
        "ǆemal",
        "trailing_",
    ];

    #[test]
    fn soft_normalization_collapses_separators_and_capitalizes() {
        assert_eq!(soft_normalize("  foo__bar   baz "), "Foo bar baz");
        assert_eq!(soft_normalize("x"), "X");
        assert_eq!(soft_normalize(""), "");
    }

    #[test]
    fn hard_normalization_replaces_illegal_characters() {
        assert_eq!(
            normalize("Foo< T > Class Template Reference").expect("normalize"),
            "Foo- T - Class Template Reference"
        );
        assert_eq!(normalize("a|b{c}#d").expect("normalize"), "A-b-c--d");
        assert_eq!(normalize(":colon").expect("normalize"), "-colon");
        assert_eq!(normalize("100%20 done").expect("normalize"), "100-20 done");
        assert_eq!(normalize("50% off").expect("normalize"), "50% off");
        assert_eq!(normalize("a~~~b~~c").expect("normalize"), "A---b~~c");
        assert_eq!(normalize("../x/./y").expect("normalize"), "--/x/-/y");
    }

    #[test]
    fn normalization_is_idempotent() {
        for sample in SAMPLES {
            let once = normalize(sample).expect("first pass");
            let twice = normalize(&once).expect("second pass");
            assert_eq!(once, twice, "sample {sample:?}");
            validate(&once).expect("normalized title validates");
        }
    }

    #[test]
    fn truncation_respects_byte_limit_and_char_boundaries() {
        let raw = "é".repeat(200);
        let title = normalize(&raw).expect("normalize");
        assert!(title.len() <= MAX_TITLE_BYTES);
        assert!(title.chars().all(|ch| ch == 'é' || ch == 'É'));
        assert_eq!(normalize(&title).expect("again"), title);

        let spaced = format!("{} tail", "a".repeat(254));
        let title = normalize(&spaced).expect("normalize");
        assert!(!title.ends_with(' '));
        assert_eq!(normalize(&title).expect("again"), title);
    }

    #[test]
    fn truncation_does_not_leave_relative_segment() {
        let raw = format!("{}/.xyz", "a".repeat(MAX_TITLE_BYTES - 2));
        let hard = hard_normalize(&raw);
        assert_eq!(hard.len(), MAX_TITLE_BYTES);
        assert!(hard.ends_with("/-"));
        validate(&hard).expect("legal after truncation");
    }

    #[test]
    fn empty_titles_are_rejected() {
        assert!(matches!(normalize("   "), Err(TitleError::Empty(_))));
        assert!(matches!(normalize("___"), Err(TitleError::Empty(_))));
    }

    #[test]
    fn display_title_only_when_altered_and_enabled() {
        let title = Title::new("Foo< T >", true).expect("title");
        assert_eq!(title.as_str(), "Foo- T -");
        assert_eq!(title.display(), Some("Foo< T >"));

        let title = Title::new("Foo< T >", false).expect("title");
        assert_eq!(title.display(), None);

        let title = Title::new("plain_title", true).expect("title");
        assert_eq!(title.as_str(), "Plain title");
        assert_eq!(title.display(), None);
    }

    #[test]
    fn prefixed_and_namespaced_titles() {
        let title = Title::prefixed("DoxygenDocs", "Foo", false).expect("title");
        assert_eq!(title.as_str(), "DoxygenDocs Foo");
        let title = Title::prefixed("  ", "foo", false).expect("title");
        assert_eq!(title.as_str(), "Foo");
        let category = Title::category("doxygen_docs").expect("category");
        assert_eq!(category.as_str(), "Category:Doxygen docs");
        assert_eq!(category.local_name(), "Doxygen docs");
    }

    #[test]
    fn category_helpers_compare_remote_titles() {
        assert!(same_title("Category:Doxygen_Docs", "Category:Doxygen Docs"));
        assert!(is_category_title("Category:X"));
        assert!(!is_category_title("File:X.png"));
    }

    #[test]
    fn sort_key_reverses_dot_components() {
        assert_eq!(sort_key("Outer.Inner.Leaf"), "Leaf.Inner.Outer");
        assert_eq!(sort_key("Plain"), "Plain");
        assert_eq!(sort_key("a[1].b"), "b.a-1-");
    }
}
