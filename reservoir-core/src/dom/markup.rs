//! Markup Parsing and Serialization
//!
//! Markup is tokenized by html5ever, which takes care of attribute syntax,
//! character references, comments and the raw-text states of `script`,
//! `style`, `textarea` and `title`. The arena is built straight from the
//! token stream instead of through the full tree-construction algorithm, so
//! fragments keep exactly the elements they were written with.
//!
//! Serialization escapes text (`& < >`) and attribute values (`& "`), so a
//! parse of serialized output reproduces the same tree. Dry-content caching
//! depends on that round trip.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

use super::node::{NodeId, NodeKind};
use super::Document;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub(crate) fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// Returns the string in HTML-escaped form, safe to inject as markup.
pub fn escape_html(unsafe_text: &str) -> String {
    let mut out = String::with_capacity(unsafe_text.len());
    for c in unsafe_text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// Builds arena nodes from the html5ever token stream.
///
/// Tree construction is simple: void and self-closing elements
/// never open, and an end tag closes back to the nearest open element with
/// the same name or is ignored.
struct ArenaSink<'a> {
    doc: &'a mut Document,
    parent: NodeId,
    /// Open elements below `parent`.
    open: Vec<NodeId>,
    text: String,
}

impl<'a> ArenaSink<'a> {
    fn new(doc: &'a mut Document, parent: NodeId) -> Self {
        Self {
            doc,
            parent,
            open: Vec::new(),
            text: String::new(),
        }
    }

    fn top(&self) -> NodeId {
        self.open.last().copied().unwrap_or(self.parent)
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let node = self.doc.alloc(NodeKind::Text(std::mem::take(&mut self.text)));
        self.doc.append_child(self.top(), node);
    }

    fn start_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        self.flush_text();
        let name = &*tag.name;
        let node = self.doc.create_element(name);
        for attribute in &tag.attrs {
            self.doc
                .set_attribute(node, &attribute.name.local, &attribute.value);
        }
        self.doc.append_child(self.top(), node);

        if tag.self_closing || is_void(name) {
            return TokenSinkResult::Continue;
        }
        self.open.push(node);
        match name {
            "script" => TokenSinkResult::RawData(RawKind::ScriptData),
            "style" => TokenSinkResult::RawData(RawKind::Rawtext),
            "textarea" | "title" => TokenSinkResult::RawData(RawKind::Rcdata),
            _ => TokenSinkResult::Continue,
        }
    }

    fn end_tag(&mut self, tag: Tag) {
        self.flush_text();
        if let Some(depth) = self
            .open
            .iter()
            .rposition(|&id| self.doc.tag(id) == Some(&*tag.name))
        {
            self.open.truncate(depth);
        }
    }
}

impl TokenSink for ArenaSink<'_> {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::CharacterTokens(text) => self.text.push_str(&text),
            Token::NullCharacterToken => self.text.push('\0'),
            Token::CommentToken(text) => {
                self.flush_text();
                let node = self.doc.alloc(NodeKind::Comment(text.to_string()));
                self.doc.append_child(self.top(), node);
            }
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(tag),
                TagKind::EndTag => self.end_tag(tag),
            },
            _ => {}
        }
        TokenSinkResult::Continue
    }

    fn end(&mut self) {
        self.flush_text();
    }
}

/// Parse `html` and append the resulting nodes to `parent`.
pub(crate) fn parse_into(doc: &mut Document, parent: NodeId, html: &str) {
    let mut input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(html));

    let mut tokenizer = Tokenizer::new(ArenaSink::new(doc, parent), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

/// Serialize the children of `id` into `out`.
pub(crate) fn write_children(doc: &Document, id: NodeId, out: &mut String) {
    if let Some(node) = doc.node(id) {
        for &child in node.child_nodes() {
            write_node(doc, child, out);
        }
    }
}

/// Serialize `id` itself (outer markup) into `out`.
pub(crate) fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    let Some(node) = doc.node(id) else {
        return;
    };

    match node.kind() {
        NodeKind::Document => write_children(doc, id, out),
        NodeKind::Element(data) => {
            out.push('<');
            out.push_str(&data.tag);
            for (name, value) in &data.attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_attribute(value, out);
                out.push('"');
            }
            out.push('>');

            if is_void(&data.tag) {
                return;
            }
            write_children(doc, id, out);
            out.push_str("</");
            out.push_str(&data.tag);
            out.push('>');
        }
        NodeKind::Text(text) => {
            let raw_parent = node
                .parent()
                .and_then(|parent| doc.tag(parent))
                .is_some_and(is_raw_text);
            if raw_parent {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}
