use std::collections::{BTreeMap, BTreeSet};

use crate::html::{Tag, TagStack, TokenKind, Tokenizer, collapse_whitespace, decode_html};
use crate::title::{Title, TitleError};

/// Source file name to public title, used to turn generated links into wiki links.
#[derive(Debug, Clone, Default)]
pub struct CrossReferences {
    titles: BTreeMap<String, String>,
    media_prefix: String,
}

impl CrossReferences {
    pub fn new(media_prefix: &str) -> Self {
        Self {
            titles: BTreeMap::new(),
            media_prefix: media_prefix.trim().to_string(),
        }
    }

    pub fn insert(&mut self, file_name: &str, title: &str) {
        self.titles.insert(file_name.to_string(), title.to_string());
    }

    pub fn resolve(&self, file_name: &str) -> Option<&str> {
        self.titles.get(file_name).map(String::as_str)
    }

    pub fn media_title(&self, source: &str) -> Result<Title, TitleError> {
        let name = source.replace(['/', '\\'], "-");
        if self.media_prefix.is_empty() {
            Title::in_namespace("File", &name)
        } else {
            Title::in_namespace("File", &format!("{} {name}", self.media_prefix))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// `src` as written in the HTML, relative to the documentation directory.
    pub source: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversion {
    pub markup: String,
    pub media: Vec<MediaRef>,
    pub warnings: Vec<String>,
}

/// Rewrite an HTML fragment into wiki markup. Never fails; constructs it cannot express
/// are dropped with a warning.
pub fn convert(fragment: &str, references: &CrossReferences) -> Conversion {
    let mut converter = Converter {
        references,
        out: String::with_capacity(fragment.len()),
        frames: Vec::new(),
        stack: TagStack::default(),
        media: Vec::new(),
        seen_media: BTreeSet::new(),
        warnings: Vec::new(),
        map_depth: 0,
    };
    for token in Tokenizer::new(fragment) {
        converter.token(token.kind, token.raw);
    }
    while !converter.frames.is_empty() {
        converter.finish_frame();
    }
    Conversion {
        markup: converter.out,
        media: converter.media,
        warnings: converter.warnings,
    }
}

enum Frame {
    Link(LinkFrame),
    Anchor { depth: usize },
}

impl Frame {
    fn depth(&self) -> usize {
        match self {
            Self::Link(link) => link.depth,
            Self::Anchor { depth } => *depth,
        }
    }
}

struct LinkFrame {
    href: String,
    depth: usize,
    markup: String,
    text: String,
    images: Vec<String>,
}

enum LinkTarget {
    /// Empty target: keep the label, drop the link.
    Drop,
    Internal(String),
    External(String),
}

struct Converter<'r> {
    references: &'r CrossReferences,
    out: String,
    frames: Vec<Frame>,
    stack: TagStack,
    media: Vec<MediaRef>,
    seen_media: BTreeSet<String>,
    warnings: Vec<String>,
    map_depth: usize,
}

impl Converter<'_> {
    fn token(&mut self, kind: TokenKind, raw: &str) {
        if self.map_depth > 0 {
            match kind {
                TokenKind::Open(tag) if tag.name == "map" && !tag.is_empty_element() => {
                    self.map_depth += 1;
                }
                TokenKind::Close(name) if name == "map" => self.map_depth -= 1,
                _ => {}
            }
            return;
        }

        match kind {
            TokenKind::Text => {
                if let Some(Frame::Link(link)) = self.innermost_link() {
                    link.text.push_str(raw);
                }
                self.write(raw);
            }
            TokenKind::Comment | TokenKind::Declaration => self.write(raw),
            TokenKind::Open(tag) => self.open(tag, raw),
            TokenKind::Close(name) => self.close(&name, raw),
        }
    }

    fn open(&mut self, tag: Tag, raw: &str) {
        match tag.name.as_str() {
            "map" => {
                if !tag.is_empty_element() {
                    self.map_depth = 1;
                }
            }
            "img" => self.image(&tag),
            "a" => {
                if let Some(href) = tag.attr("href") {
                    while matches!(self.frames.last(), Some(Frame::Link(_))) {
                        self.finish_frame();
                    }
                    let frame = LinkFrame {
                        href: decode_html(href),
                        depth: self.stack.depth(),
                        markup: String::new(),
                        text: String::new(),
                        images: Vec::new(),
                    };
                    if !tag.is_empty_element() {
                        self.frames.push(Frame::Link(frame));
                    }
                    return;
                }
                if let Some(id) = tag.attr("name").or_else(|| tag.attr("id")) {
                    let marker = format!("<span id=\"{}\"></span>", escape_attr(id));
                    self.write(&marker);
                }
                if !tag.is_empty_element() {
                    self.frames.push(Frame::Anchor {
                        depth: self.stack.depth(),
                    });
                }
            }
            _ => {
                self.write(raw);
                if !tag.is_empty_element() {
                    self.stack.push(&tag.name);
                }
            }
        }
    }

    fn close(&mut self, name: &str, raw: &str) {
        if name == "a" {
            if self.frames.is_empty() {
                self.warnings.push("dropped closing </a> with no open link".to_string());
            } else {
                self.finish_frame();
            }
            return;
        }

        // An element opened outside a link closes the link too.
        if let Some(position) = self.stack.position(name) {
            while self
                .frames
                .last()
                .is_some_and(|frame| frame.depth() > position)
            {
                self.finish_frame();
            }
        }

        match self.stack.close(name) {
            Ok(popped) => {
                for implicit in popped.iter().take(popped.len().saturating_sub(1)) {
                    let closing = format!("</{implicit}>");
                    self.write(&closing);
                }
                self.write(raw);
            }
            Err(error) => self.warnings.push(format!("dropped {error}")),
        }
    }

    fn image(&mut self, tag: &Tag) {
        let Some(source) = tag.attr("src").map(str::trim).filter(|src| !src.is_empty()) else {
            self.warnings.push("dropped <img> without src".to_string());
            return;
        };
        if is_external(source) {
            let embed = format!("[{source}]");
            self.write(&embed);
            return;
        }
        let title = match self.references.media_title(source) {
            Ok(title) => title.as_str().to_string(),
            Err(error) => {
                self.warnings.push(format!("dropped image {source}: {error}"));
                return;
            }
        };
        if self.seen_media.insert(source.to_string()) {
            self.media.push(MediaRef {
                source: source.to_string(),
                title: title.clone(),
            });
        }
        let embed = format!("[[{title}]]");
        if let Some(Frame::Link(link)) = self.innermost_link() {
            link.images.push(title);
        }
        self.write(&embed);
    }

    fn finish_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let Frame::Link(link) = frame else {
            return;
        };

        let label = collapse_whitespace(&link.markup);
        let has_text = !collapse_whitespace(&decode_html(&link.text)).is_empty();
        let target = self.resolve(&link.href);

        let rendered = if has_text {
            match target {
                LinkTarget::Drop => label,
                LinkTarget::Internal(target) => format!("[[{target}|{label}]]"),
                LinkTarget::External(url) => format!("[{url} {label}]"),
            }
        } else if let [image] = link.images.as_slice() {
            match target {
                LinkTarget::Drop => format!("[[{image}]]"),
                LinkTarget::Internal(target) | LinkTarget::External(target) => {
                    format!("[[{image}|link={target}]]")
                }
            }
        } else {
            self.warnings.push(format!(
                "dropped link to {:?} with no text or single image",
                link.href
            ));
            return;
        };
        self.write(&rendered);
    }

    fn resolve(&mut self, href: &str) -> LinkTarget {
        let (target, fragment) = match href.rsplit_once('#') {
            Some((target, fragment)) => (target.trim(), fragment.trim()),
            None => (href.trim(), ""),
        };
        if target.is_empty() {
            return if fragment.is_empty() {
                LinkTarget::Drop
            } else {
                LinkTarget::Internal(format!("#{fragment}"))
            };
        }
        if let Some(title) = self.references.resolve(target) {
            return if fragment.is_empty() {
                LinkTarget::Internal(title.to_string())
            } else {
                LinkTarget::Internal(format!("{title}#{fragment}"))
            };
        }
        if !is_external(href) {
            self.warnings
                .push(format!("unresolved link target {target:?}, kept as external link"));
        }
        LinkTarget::External(href.trim().to_string())
    }

    fn innermost_link(&mut self) -> Option<&mut Frame> {
        self.frames
            .iter_mut()
            .rev()
            .find(|frame| matches!(frame, Frame::Link(_)))
    }

    fn write(&mut self, markup: &str) {
        match self.innermost_link() {
            Some(Frame::Link(link)) => link.markup.push_str(markup),
            _ => self.out.push_str(markup),
        }
    }
}

fn is_external(url: &str) -> bool {
    let url = url.trim();
    url.contains("://") || url.starts_with("//") || url.starts_with("mailto:")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn references() -> CrossReferences {
        let mut references = CrossReferences::new("");
        references.insert("class_foo.html", "Foo");
        references.insert("namespace_outer.html", "Outer");
        references
    }

    #[test]
    fn internal_link_keeps_fragment_and_label() {
        let conversion = convert(
            r#"<a href="class_foo.html#bar">Foo::bar</a>"#,
            &references(),
        );
        assert_eq!(conversion.markup, "[[Foo#bar|Foo::bar]]");
        assert!(conversion.warnings.is_empty());
    }

    #[test]
    fn fragment_starts_after_the_last_hash() {
        let mut references = references();
        references.insert("page#1.html", "Odd");
        let conversion = convert(r##"<a href="page#1.html#frag">L</a>"##, &references);
        assert_eq!(conversion.markup, "[[Odd#frag|L]]");
        assert!(conversion.warnings.is_empty());

        let conversion = convert(r##"<a href="class_foo.html#x#y">L</a>"##, &references);
        assert_eq!(conversion.markup, "[class_foo.html#x#y L]");
        assert_eq!(conversion.warnings.len(), 1);
    }

    #[test]
    fn external_link_is_preserved_verbatim() {
        let conversion = convert(r#"<a href="http://example.com">ext</a>"#, &references());
        assert_eq!(conversion.markup, "[http://example.com ext]");
        assert!(conversion.warnings.is_empty());
    }

    #[test]
    fn same_page_fragment_becomes_local_link() {
        let conversion = convert(r##"<a href="#pub-methods">Methods</a>"##, &references());
        assert_eq!(conversion.markup, "[[#pub-methods|Methods]]");
    }

    #[test]
    fn empty_target_keeps_label_only() {
        let conversion = convert(r##"see <a href="#">here</a>."##, &references());
        assert_eq!(conversion.markup, "see here.");
    }

    #[test]
    fn unresolved_relative_link_warns() {
        let conversion = convert(r#"<a href="missing.html">Gone</a>"#, &references());
        assert_eq!(conversion.markup, "[missing.html Gone]");
        assert_eq!(conversion.warnings.len(), 1);
        assert!(conversion.warnings[0].contains("missing.html"));
    }

    #[test]
    fn named_anchor_becomes_span_marker() {
        let conversion = convert(
            r#"<a class="anchor" id="a1f2"></a><h2>Title</h2><a name="x"></a>"#,
            &references(),
        );
        assert_eq!(
            conversion.markup,
            r#"<span id="a1f2"></span><h2>Title</h2><span id="x"></span>"#
        );
    }

    #[test]
    fn images_are_recorded_once_and_embedded() {
        let mut references = references();
        references.media_prefix = "Docs".to_string();
        let conversion = convert(
            r#"<img src="graph.png" alt=""/><p><img src="graph.png"></p>"#,
            &references,
        );
        assert_eq!(
            conversion.markup,
            "[[File:Docs graph.png]]<p>[[File:Docs graph.png]]</p>"
        );
        assert_eq!(
            conversion.media,
            vec![MediaRef {
                source: "graph.png".to_string(),
                title: "File:Docs graph.png".to_string(),
            }]
        );
    }

    #[test]
    fn image_only_link_becomes_linked_image() {
        let conversion = convert(
            r#"<a href="class_foo.html"><img src="foo.png"/></a>"#,
            &references(),
        );
        assert_eq!(conversion.markup, "[[File:Foo.png|link=Foo]]");
        assert_eq!(conversion.media.len(), 1);
    }

    #[test]
    fn empty_link_is_dropped_with_warning() {
        let conversion = convert(r#"a<a href="class_foo.html"> </a>b"#, &references());
        assert_eq!(conversion.markup, "ab");
        assert_eq!(conversion.warnings.len(), 1);
    }

    #[test]
    fn image_maps_are_dropped() {
        let conversion = convert(
            r##"<img src="g.png" usemap="#m"/><map name="m"><area href="class_foo.html" shape="rect"/></map>after"##,
            &references(),
        );
        assert_eq!(conversion.markup, "[[File:G.png]]after");
    }

    #[test]
    fn other_markup_passes_through() {
        let fragment = "<table class=\"memname\"><tr><td>int</td></tr></table>\n<p>x &lt; y</p>";
        let conversion = convert(fragment, &references());
        assert_eq!(conversion.markup, fragment);
    }

    #[test]
    fn loose_nesting_is_recovered() {
        let conversion = convert("<div><b>bold</div></span>tail", &references());
        assert_eq!(conversion.markup, "<div><b>bold</b></div>tail");
        assert_eq!(conversion.warnings.len(), 1);
        assert!(conversion.warnings[0].contains("</span>"));
    }

    #[test]
    fn link_closed_by_enclosing_element() {
        let conversion = convert(
            r#"<td><a href="class_foo.html">Foo</td>rest"#,
            &references(),
        );
        assert_eq!(conversion.markup, "<td>[[Foo|Foo]]</td>rest");
    }

    #[test]
    fn label_markup_is_kept_inside_link() {
        let conversion = convert(
            r#"<a href="namespace_outer.html"><b>Outer</b>
  namespace</a>"#,
            &references(),
        );
        assert_eq!(conversion.markup, "[[Outer|<b>Outer</b> namespace]]");
    }
}
