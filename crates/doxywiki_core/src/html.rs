use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub self_closing: bool,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|item| item == class))
    }

    /// Void or explicitly self-closed; never pushed onto the open-element stack.
    pub fn is_empty_element(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Comment,
    Declaration,
    Open(Tag),
    Close(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub raw: &'a str,
    pub span: Range<usize>,
}

/// Lenient scanner over an HTML string. Never fails: anything that does not look like
/// markup is returned as text.
pub struct Tokenizer<'a> {
    html: &'a str,
    pos: usize,
    raw_text_until: Option<&'static str>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(html: &'a str) -> Self {
        Self {
            html,
            pos: 0,
            raw_text_until: None,
        }
    }

    fn token(&mut self, kind: TokenKind, end: usize) -> Token<'a> {
        let start = self.pos;
        self.pos = end;
        Token {
            kind,
            raw: &self.html[start..end],
            span: start..end,
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let html = self.html;
        if self.pos >= html.len() {
            return None;
        }

        if let Some(element) = self.raw_text_until.take() {
            let closing = format!("</{element}");
            let end = index_of_ignore_case(html, &closing, self.pos).unwrap_or(html.len());
            if end > self.pos {
                return Some(self.token(TokenKind::Text, end));
            }
        }

        let start = self.pos;
        if !starts_with_at(html, start, "<") {
            let end = html[start..]
                .find('<')
                .map_or(html.len(), |offset| start + offset);
            return Some(self.token(TokenKind::Text, end));
        }

        if starts_with_at(html, start, "<!--") {
            let end = html[start + 4..]
                .find("-->")
                .map_or(html.len(), |offset| start + 4 + offset + 3);
            return Some(self.token(TokenKind::Comment, end));
        }

        let bytes = html.as_bytes();
        match bytes.get(start + 1).copied() {
            Some(b'!') | Some(b'?') => {
                let end = find_tag_end(html, start + 1).map_or(html.len(), |index| index + 1);
                Some(self.token(TokenKind::Declaration, end))
            }
            Some(b'/') if bytes.get(start + 2).is_some_and(u8::is_ascii_alphabetic) => {
                let Some(end) = find_tag_end(html, start + 2) else {
                    return Some(self.token(TokenKind::Text, html.len()));
                };
                let name = read_tag_name(&html[start + 2..end]);
                Some(self.token(TokenKind::Close(name), end + 1))
            }
            Some(byte) if byte.is_ascii_alphabetic() => {
                let Some(end) = find_tag_end(html, start + 1) else {
                    return Some(self.token(TokenKind::Text, html.len()));
                };
                let raw = &html[start..=end];
                let name = read_tag_name(&raw[1..]);
                let attrs = parse_attributes(raw, &name);
                let self_closing = raw[..raw.len() - 1].trim_end().ends_with('/');
                if !self_closing
                    && let Some(element) = RAW_TEXT_ELEMENTS
                        .iter()
                        .find(|element| **element == name.as_str())
                {
                    self.raw_text_until = Some(*element);
                }
                Some(self.token(
                    TokenKind::Open(Tag {
                        name,
                        attrs,
                        self_closing,
                    }),
                    end + 1,
                ))
            }
            _ => {
                let end = html[start + 1..]
                    .find('<')
                    .map_or(html.len(), |offset| start + 1 + offset);
                Some(self.token(TokenKind::Text, end))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("closing </{tag}> has no matching open element (open: {path})")]
pub struct UnmatchedClose {
    pub tag: String,
    pub path: String,
}

/// Open-element stack with nearest-match recovery.
///
/// A closing tag that does not match the innermost element pops outward to the nearest
/// element with the same name, implicitly closing everything in between. Only a closing
/// tag with no open counterpart at all is an error, and the stack is left untouched.
#[derive(Debug, Clone, Default)]
pub struct TagStack {
    open: Vec<String>,
}

impl TagStack {
    pub fn push(&mut self, name: &str) {
        self.open.push(name.to_string());
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Depth of the innermost open element named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.open.iter().rposition(|item| item == name)
    }

    /// Returns the names popped from innermost outward, the matched element last.
    pub fn close(&mut self, name: &str) -> Result<Vec<String>, UnmatchedClose> {
        let Some(position) = self.open.iter().rposition(|item| item == name) else {
            return Err(UnmatchedClose {
                tag: name.to_string(),
                path: self.path(),
            });
        };
        let mut popped = self.open.split_off(position);
        popped.reverse();
        Ok(popped)
    }

    pub fn path(&self) -> String {
        if self.open.is_empty() {
            "<root>".to_string()
        } else {
            self.open.join(" > ")
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: Tag,
    pub parent: Option<usize>,
    pub outer: Range<usize>,
    pub inner: Range<usize>,
}

/// A flat element tree over a source string, recording the byte spans of each element.
#[derive(Debug, Clone)]
pub struct Document<'a> {
    source: &'a str,
    elements: Vec<Element>,
}

impl<'a> Document<'a> {
    pub fn parse(source: &'a str) -> Result<Self, UnmatchedClose> {
        let mut elements: Vec<Element> = Vec::new();
        let mut stack = TagStack::default();
        let mut open_indices: Vec<usize> = Vec::new();

        for token in Tokenizer::new(source) {
            match token.kind {
                TokenKind::Open(tag) => {
                    let empty = tag.is_empty_element();
                    let name = tag.name.clone();
                    let index = elements.len();
                    elements.push(Element {
                        tag,
                        parent: open_indices.last().copied(),
                        outer: token.span.start..token.span.end,
                        inner: token.span.end..token.span.end,
                    });
                    if !empty {
                        stack.push(&name);
                        open_indices.push(index);
                    }
                }
                TokenKind::Close(name) => {
                    let popped = stack.close(&name)?;
                    for (offset, _) in popped.iter().enumerate() {
                        let Some(index) = open_indices.pop() else {
                            break;
                        };
                        let element = &mut elements[index];
                        element.inner.end = token.span.start;
                        element.outer.end = if offset + 1 == popped.len() {
                            token.span.end
                        } else {
                            token.span.start
                        };
                    }
                }
                TokenKind::Text | TokenKind::Comment | TokenKind::Declaration => {}
            }
        }

        for index in open_indices {
            elements[index].inner.end = source.len();
            elements[index].outer.end = source.len();
        }

        Ok(Self { source, elements })
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn inner_html(&self, element: &Element) -> &'a str {
        &self.source[element.inner.clone()]
    }

    pub fn outer_html(&self, element: &Element) -> &'a str {
        &self.source[element.outer.clone()]
    }

    pub fn ancestors(&self, element: &Element) -> impl Iterator<Item = &Element> {
        std::iter::successors(element.parent.map(|index| &self.elements[index]), move |item| {
            item.parent.map(|index| &self.elements[index])
        })
    }

    pub fn find_all<'d, F>(&'d self, predicate: F) -> impl Iterator<Item = &'d Element>
    where
        F: Fn(&Self, &Element) -> bool + 'd,
    {
        self.elements
            .iter()
            .filter(move |element| predicate(self, element))
    }

    pub fn is_within<F>(&self, element: &Element, predicate: F) -> bool
    where
        F: Fn(&Tag) -> bool,
    {
        self.ancestors(element).any(|ancestor| predicate(&ancestor.tag))
    }

    /// Text content with tags dropped, entities decoded and whitespace collapsed.
    pub fn text(&self, element: &Element) -> String {
        text_content(self.inner_html(element))
    }
}

pub fn text_content(fragment: &str) -> String {
    let mut raw = String::with_capacity(fragment.len());
    for token in Tokenizer::new(fragment) {
        if token.kind == TokenKind::Text {
            raw.push_str(token.raw);
        }
    }
    collapse_whitespace(&decode_html(&raw))
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        match candidate.find(';').filter(|end| *end <= 10) {
            Some(end) => match decode_entity(&candidate[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "nbsp" => Some('\u{a0}'),
        "mdash" => Some('\u{2014}'),
        "ndash" => Some('\u{2013}'),
        "copy" => Some('\u{a9}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn read_tag_name(after_lt: &str) -> String {
    after_lt
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut index = start;
    let mut quote = None::<u8>;
    while index < bytes.len() {
        let byte = bytes[index];
        if let Some(active) = quote {
            if byte == active {
                quote = None;
            }
            index += 1;
            continue;
        }
        if byte == b'"' || byte == b'\'' {
            quote = Some(byte);
            index += 1;
            continue;
        }
        if byte == b'>' {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn parse_attributes(tag_raw: &str, tag_name: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let bytes = tag_raw.as_bytes();
    let mut index = tag_name.len() + 1;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'>' {
            break;
        }
        if byte == b'/' || byte.is_ascii_whitespace() {
            index += 1;
            continue;
        }

        let name_start = index;
        while index < bytes.len() {
            let ch = bytes[index];
            if ch.is_ascii_whitespace() || ch == b'=' || ch == b'>' || ch == b'/' {
                break;
            }
            index += 1;
        }
        if name_start == index {
            index += 1;
            continue;
        }
        let name = tag_raw[name_start..index].to_ascii_lowercase();
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        let mut value = String::new();
        if bytes.get(index).copied() == Some(b'=') {
            index += 1;
            while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                index += 1;
            }
            if let Some(quote) = bytes
                .get(index)
                .copied()
                .filter(|byte| *byte == b'"' || *byte == b'\'')
            {
                index += 1;
                let value_start = index;
                while index < bytes.len() && bytes[index] != quote {
                    index += 1;
                }
                value = tag_raw[value_start..index].to_string();
                if bytes.get(index).copied() == Some(quote) {
                    index += 1;
                }
            } else {
                let value_start = index;
                while index < bytes.len()
                    && !bytes[index].is_ascii_whitespace()
                    && bytes[index] != b'>'
                {
                    index += 1;
                }
                value = tag_raw[value_start..index].to_string();
            }
        }
        attrs.entry(name).or_insert_with(|| decode_html(&value));
    }

    attrs
}

fn index_of_ignore_case(text: &str, search: &str, start: usize) -> Option<usize> {
    let text_bytes = text.as_bytes();
    let search_bytes = search.as_bytes();
    if search_bytes.is_empty() || search_bytes.len() > text_bytes.len() {
        return None;
    }
    let last_start = text_bytes.len() - search_bytes.len();
    (start..=last_start).find(|index| {
        text_bytes[*index..*index + search_bytes.len()].eq_ignore_ascii_case(search_bytes)
    })
}

fn starts_with_at(text: &str, index: usize, sequence: &str) -> bool {
    text.as_bytes()
        .get(index..index + sequence.len())
        .is_some_and(|slice| slice == sequence.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(html: &str) -> Vec<TokenKind> {
        Tokenizer::new(html).map(|token| token.kind).collect()
    }

    #[test]
    fn tokenizer_splits_tags_text_and_comments() {
        let tokens: Vec<_> = Tokenizer::new("<p class=\"x\">a &amp; b<!-- c --></p>").collect();
        assert_eq!(tokens.len(), 4);
        match &tokens[0].kind {
            TokenKind::Open(tag) => {
                assert_eq!(tag.name, "p");
                assert!(tag.has_class("x"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tokens[1].raw, "a &amp; b");
        assert_eq!(tokens[2].kind, TokenKind::Comment);
        assert_eq!(tokens[3].kind, TokenKind::Close("p".to_string()));
        let joined: String = tokens.iter().map(|token| token.raw).collect();
        assert_eq!(joined, "<p class=\"x\">a &amp; b<!-- c --></p>");
    }

    #[test]
    fn tokenizer_handles_quotes_self_closing_and_stray_angles() {
        let tokens: Vec<_> = Tokenizer::new("<img src='a>b.png' alt=x/> 1 < 2").collect();
        match &tokens[0].kind {
            TokenKind::Open(tag) => {
                assert_eq!(tag.attr("src"), Some("a>b.png"));
                assert!(tag.self_closing);
                assert!(tag.is_empty_element());
            }
            other => panic!("unexpected {other:?}"),
        }
        let text: String = tokens[1..].iter().map(|token| token.raw).collect();
        assert_eq!(text, " 1 < 2");
    }

    #[test]
    fn tokenizer_keeps_script_bodies_as_text() {
        let found = kinds("<script>if (a < b) { x('</p>'); }</script>");
        assert_eq!(found.len(), 3);
        assert_eq!(found[1], TokenKind::Text);
        assert_eq!(found[2], TokenKind::Close("script".to_string()));
    }

    #[test]
    fn unterminated_tag_becomes_text() {
        assert_eq!(kinds("<div class=\"x"), vec![TokenKind::Text]);
    }

    #[test]
    fn tag_stack_recovers_to_nearest_match() {
        let mut stack = TagStack::default();
        stack.push("div");
        stack.push("p");
        stack.push("b");
        let popped = stack.close("p").expect("recover");
        assert_eq!(popped, vec!["b".to_string(), "p".to_string()]);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn tag_stack_reports_unmatched_close_without_popping() {
        let mut stack = TagStack::default();
        stack.push("div");
        let error = stack.close("span").expect_err("no match");
        assert_eq!(error.tag, "span");
        assert_eq!(error.path, "div");
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn document_records_inner_spans_and_ancestry() {
        let html = "<html><body><div class=\"header\"><div class=\"title\">Foo<b>x</div></div></body></html>";
        let document = Document::parse(html).expect("parse");
        let title = document
            .find_all(|_, element| element.tag.has_class("title"))
            .next()
            .expect("title");
        assert_eq!(document.inner_html(title), "Foo<b>x");
        assert!(document.is_within(title, |tag| tag.has_class("header")));
        assert_eq!(document.text(title), "Foox");
    }

    #[test]
    fn document_rejects_close_without_any_open_match() {
        let error = Document::parse("<div></span></div>").expect_err("unmatched");
        assert_eq!(error.tag, "span");
    }

    #[test]
    fn decode_html_handles_named_and_numeric_entities() {
        assert_eq!(
            decode_html("Foo&lt; T &gt; &amp; &#65;&#x42; &bogus; &"),
            "Foo< T > & AB &bogus; &"
        );
    }
}
