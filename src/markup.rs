//! Markup parsing and serialization for [`Document`].
//!
//! Supports the HTML subset that annotated documents and template bodies use:
//! elements with quoted, bare or valueless attributes, text, comments, a
//! doctype, void elements, `/>` self-closing tags and the common character
//! references.

use crate::error::{MarkupError, Position};
use crate::tree::{Document, NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

impl Document {
    /// Parse a whole document.
    pub fn parse(markup: &str) -> Result<Document, MarkupError> {
        let mut doc = Document::new();
        let root = doc.root();
        for node in parse_fragment(&mut doc, markup)? {
            doc.append_child(root, node);
        }
        Ok(doc)
    }
}

/// Parse `markup` into detached nodes owned by `doc`, returning the
/// top-level nodes in order. On error no new node is left behind.
pub fn parse_fragment(doc: &mut Document, markup: &str) -> Result<Vec<NodeId>, MarkupError> {
    let mark = doc.next_id();
    parse_nodes(doc, markup).inspect_err(|_| doc.discard_from(mark))
}

fn parse_nodes(doc: &mut Document, markup: &str) -> Result<Vec<NodeId>, MarkupError> {
    let mut parser = Parser {
        input: markup,
        pos: 0,
    };
    let mut open: Vec<(NodeId, Position)> = Vec::new();
    let mut top = Vec::new();

    while parser.pos < parser.input.len() {
        let begin = parser.position();
        let node = if parser.starts_with("<!--") {
            parser.skip_comment(begin)?;
            None
        } else if parser.starts_with("<!") {
            parser.skip_declaration(begin)?;
            None
        } else if parser.starts_with("</") {
            let tag = parser.parse_close_tag()?;
            match open.pop() {
                Some((el, _)) if doc.tag(el) == Some(tag.as_str()) => {}
                Some((el, _)) => {
                    return Err(parser.error_span(
                        format!(
                            "Mismatched closing tag </{}>, expected </{}>",
                            tag,
                            doc.tag(el).unwrap_or_default()
                        ),
                        begin,
                    ))
                }
                None => {
                    return Err(parser.error_span(format!("Unexpected closing tag </{}>", tag), begin))
                }
            }
            None
        } else if parser.at_open_tag() {
            let (el, self_closing) = parser.parse_open_tag(doc)?;
            let is_leaf = self_closing || doc.tag(el).is_some_and(is_void);
            attach(doc, &open, &mut top, el);
            if !is_leaf {
                open.push((el, begin));
            }
            None
        } else {
            Some(parser.parse_text(doc))
        };
        if let Some(text) = node {
            attach(doc, &open, &mut top, text);
        }
    }

    if let Some((el, begin)) = open.pop() {
        return Err(parser.error_span(
            format!("Unclosed <{}>", doc.tag(el).unwrap_or_default()),
            begin,
        ));
    }
    Ok(top)
}

fn attach(doc: &mut Document, open: &[(NodeId, Position)], top: &mut Vec<NodeId>, node: NodeId) {
    match open.last() {
        Some((parent, _)) => doc.append_child(*parent, node),
        None => top.push(node),
    }
}

/// Replace the children of `node` with the parsed `markup`.
pub fn set_inner_html(doc: &mut Document, node: NodeId, markup: &str) -> Result<(), MarkupError> {
    let nodes = parse_fragment(doc, markup)?;
    for child in doc.children(node).to_vec() {
        doc.remove(child);
    }
    for child in nodes {
        doc.append_child(node, child);
    }
    Ok(())
}

/// Parser state: tracks position in the input string.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    // ── Helpers ──────────────────────────────────────────────────────

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn starts_with(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    fn position(&self) -> Position {
        Position::at(self.input, self.pos)
    }

    fn error_point(&self, message: String) -> MarkupError {
        let pos = self.position();
        MarkupError {
            message,
            begin: pos,
            end: pos,
        }
    }

    fn error_span(&self, message: String, begin: Position) -> MarkupError {
        MarkupError {
            message,
            begin,
            end: self.position(),
        }
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
    }

    fn at_open_tag(&self) -> bool {
        let mut chars = self.remaining().chars();
        chars.next() == Some('<') && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
    }

    // ── Constructs ───────────────────────────────────────────────────

    fn skip_comment(&mut self, begin: Position) -> Result<(), MarkupError> {
        match self.remaining()[4..].find("-->") {
            Some(i) => {
                self.advance(4 + i + 3);
                Ok(())
            }
            None => {
                self.pos = self.input.len();
                Err(self.error_span("Unterminated comment".to_string(), begin))
            }
        }
    }

    fn skip_declaration(&mut self, begin: Position) -> Result<(), MarkupError> {
        match self.remaining().find('>') {
            Some(i) => {
                self.advance(i + 1);
                Ok(())
            }
            None => {
                self.pos = self.input.len();
                Err(self.error_span("Unterminated declaration".to_string(), begin))
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, MarkupError> {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if is_name_char(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error_point("Expected a name".to_string()));
        }
        Ok(self.input[start..self.pos].to_ascii_lowercase())
    }

    fn parse_close_tag(&mut self) -> Result<String, MarkupError> {
        self.advance(2);
        let tag = self.parse_name()?;
        self.skip_ws();
        if self.peek_char() != Some('>') {
            return Err(self.error_point("Expected '>'".to_string()));
        }
        self.advance(1);
        Ok(tag)
    }

    /// Parse `<tag attr=...>`; returns the element and whether it ended in `/>`.
    fn parse_open_tag(&mut self, doc: &mut Document) -> Result<(NodeId, bool), MarkupError> {
        let begin = self.position();
        self.advance(1);
        let tag = self.parse_name()?;
        let el = doc.create_element(&tag);
        loop {
            self.skip_ws();
            match self.peek_char() {
                Some('>') => {
                    self.advance(1);
                    return Ok((el, false));
                }
                Some('/') if self.starts_with("/>") => {
                    self.advance(2);
                    return Ok((el, true));
                }
                Some(_) => {
                    let name = self.parse_name()?;
                    self.skip_ws();
                    let value = if self.peek_char() == Some('=') {
                        self.advance(1);
                        self.skip_ws();
                        self.parse_attribute_value()?
                    } else {
                        String::new()
                    };
                    doc.set_attribute(el, &name, &value);
                }
                None => return Err(self.error_span(format!("Unterminated <{}> tag", tag), begin)),
            }
        }
    }

    fn parse_attribute_value(&mut self) -> Result<String, MarkupError> {
        let begin = self.position();
        match self.peek_char() {
            Some(q @ ('"' | '\'')) => {
                self.advance(1);
                match self.remaining().find(q) {
                    Some(i) => {
                        let raw = &self.input[self.pos..self.pos + i];
                        self.advance(i + 1);
                        Ok(decode_entities(raw))
                    }
                    None => Err(self.error_span("Unterminated attribute value".to_string(), begin)),
                }
            }
            _ => {
                let start = self.pos;
                while let Some(ch) = self.peek_char() {
                    if ch.is_whitespace() || ch == '>' || self.starts_with("/>") {
                        break;
                    }
                    self.advance(ch.len_utf8());
                }
                Ok(decode_entities(&self.input[start..self.pos]))
            }
        }
    }

    fn parse_text(&mut self, doc: &mut Document) -> NodeId {
        let start = self.pos;
        // Always consume at least one character so a stray '<' becomes text.
        if let Some(ch) = self.peek_char() {
            self.advance(ch.len_utf8());
        }
        while self.pos < self.input.len() {
            if self.at_open_tag() || self.starts_with("</") || self.starts_with("<!") {
                break;
            }
            if let Some(ch) = self.peek_char() {
                self.advance(ch.len_utf8());
            }
        }
        doc.create_text(&decode_entities(&self.input[start..self.pos]))
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':' | '.' | '@')
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let name = &tail[1..semi];
            let ch = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => name
                    .strip_prefix("#x")
                    .or_else(|| name.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| name.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Serialization ───────────────────────────────────────────────────

/// Serialize the children of `node`.
pub fn inner_html(doc: &Document, node: NodeId) -> String {
    let mut buf = String::new();
    for child in doc.children(node) {
        write_node(doc, *child, &mut buf);
    }
    buf
}

/// Serialize `node` itself, including its tag.
pub fn outer_html(doc: &Document, node: NodeId) -> String {
    let mut buf = String::new();
    write_node(doc, node, &mut buf);
    buf
}

fn write_node(doc: &Document, node: NodeId, buf: &mut String) {
    match doc.kind(node) {
        Some(NodeKind::Text(t)) => escape_into(t, false, buf),
        Some(NodeKind::Element(el)) => {
            buf.push('<');
            buf.push_str(&el.tag);
            write_attributes(doc, node, buf);
            buf.push('>');
            if is_void(&el.tag) {
                return;
            }
            for child in doc.children(node) {
                write_node(doc, *child, buf);
            }
            buf.push_str("</");
            buf.push_str(&el.tag);
            buf.push('>');
        }
        Some(NodeKind::Document) => {
            for child in doc.children(node) {
                write_node(doc, *child, buf);
            }
        }
        None => {}
    }
}

/// Attributes in source order, with live form state and display folded in.
fn write_attributes(doc: &Document, node: NodeId, buf: &mut String) {
    let live_value = doc.live_value(node);
    let checked = doc.checked(node);
    let display = doc.display(node);
    let mut wrote_value = false;
    let mut wrote_style = false;

    for (name, value) in doc.attributes(node) {
        match name.as_str() {
            "checked" => continue,
            "value" => {
                wrote_value = true;
                write_attribute(name, live_value.unwrap_or(value.as_str()), buf);
            }
            "style" => {
                wrote_style = true;
                match display {
                    Some(d) => {
                        let base = value.trim().trim_end_matches(';');
                        let merged = if base.is_empty() {
                            format!("display: {}", d)
                        } else {
                            format!("{}; display: {}", base, d)
                        };
                        write_attribute(name, &merged, buf);
                    }
                    None => write_attribute(name, value, buf),
                }
            }
            _ => write_attribute(name, value, buf),
        }
    }
    if let (false, Some(v)) = (wrote_value, live_value) {
        write_attribute("value", v, buf);
    }
    if checked {
        buf.push_str(" checked");
    }
    if let (false, Some(d)) = (wrote_style, display) {
        write_attribute("style", &format!("display: {}", d), buf);
    }
}

fn write_attribute(name: &str, value: &str, buf: &mut String) {
    buf.push(' ');
    buf.push_str(name);
    if !value.is_empty() {
        buf.push_str("=\"");
        escape_into(value, true, buf);
        buf.push('"');
    }
}

fn escape_into(text: &str, attribute: bool, buf: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' if !attribute => buf.push_str("&gt;"),
            '"' if attribute => buf.push_str("&quot;"),
            other => buf.push(other),
        }
    }
}
