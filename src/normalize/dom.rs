//! Owned HTML tree used by the rewrite passes, built on scraper's parser.
//!
//! Input starting with `<!DOCTYPE` or `<html` is parsed as a full document,
//! anything else as a body fragment. Parsing never fails: html5ever
//! recovers from any input. Attributes of parsed elements are ordered by
//! name so serialization is deterministic.

use scraper::{ElementRef, Html};

/// HTML elements that never have content or an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text children are serialized without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Doctype(String),
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value in place, or append the attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(index).1)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        collect_text(&self.children, &mut text);
        text
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(&element.children, out),
            Node::Doctype(_) | Node::Comment(_) => {}
        }
    }
}

/// A parsed input kept in scraper's representation, so selectors can be
/// matched while the owned tree is built.
pub struct SourceTree {
    html: Html,
    document: bool,
    doctype: bool,
}

impl SourceTree {
    pub fn parse(input: &str) -> Self {
        let start: String = input
            .trim_start()
            .chars()
            .take(9)
            .collect::<String>()
            .to_ascii_lowercase();
        let doctype = start.starts_with("<!doctype");
        let document = doctype || start.starts_with("<html");
        let html = if document {
            Html::parse_document(input)
        } else {
            Html::parse_fragment(input)
        };
        Self {
            html,
            document,
            doctype,
        }
    }

    /// Whether the input was a full document rather than a fragment.
    pub fn is_document(&self) -> bool {
        self.document
    }

    /// Text of every `<style>` element, in document order.
    pub fn style_sheets(&self) -> Vec<String> {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name().eq_ignore_ascii_case("style"))
            .map(|el| el.text().collect::<String>())
            .collect()
    }

    pub fn to_nodes(&self) -> Vec<Node> {
        self.to_nodes_with(|_, _| {})
    }

    /// Build the owned tree, calling `visit` on every element with its
    /// source reference once its attributes are copied.
    pub fn to_nodes_with<F>(&self, mut visit: F) -> Vec<Node>
    where
        F: FnMut(ElementRef<'_>, &mut Element),
    {
        let root = self.html.root_element();
        if self.document {
            let mut nodes = Vec::with_capacity(2);
            if self.doctype {
                nodes.push(Node::Doctype("html".to_string()));
            }
            nodes.push(Node::Element(convert_element(root, &mut visit)));
            nodes
        } else {
            convert_children(root, &mut visit)
        }
    }
}

fn convert_element<F>(source: ElementRef<'_>, visit: &mut F) -> Element
where
    F: FnMut(ElementRef<'_>, &mut Element),
{
    let value = source.value();
    let mut attrs: Vec<(String, String)> = value
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut element = Element {
        name: value.name().to_string(),
        attrs,
        children: Vec::new(),
    };
    visit(source, &mut element);
    element.children = convert_children(source, visit);
    element
}

fn convert_children<F>(parent: ElementRef<'_>, visit: &mut F) -> Vec<Node>
where
    F: FnMut(ElementRef<'_>, &mut Element),
{
    let mut nodes = Vec::new();
    for child in parent.children() {
        match child.value() {
            scraper::Node::Text(text) => nodes.push(Node::Text(text.text.to_string())),
            scraper::Node::Comment(comment) => {
                nodes.push(Node::Comment(comment.comment.to_string()))
            }
            scraper::Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    nodes.push(Node::Element(convert_element(element, visit)));
                }
            }
            _ => {}
        }
    }
    nodes
}

/// Serialize nodes back to HTML.
pub fn serialize(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, false, &mut out);
    }
    out
}

fn write_node(node: &Node, raw_text: bool, out: &mut String) {
    match node {
        Node::Doctype(name) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push('>');
        }
        Node::Text(text) if raw_text => out.push_str(text),
        Node::Text(text) => escape_into(text, false, out),
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Element(element) => write_element(element, out),
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(value, true, out);
        out.push('"');
    }
    out.push('>');

    let name = element.name.to_ascii_lowercase();
    if VOID_ELEMENTS.contains(&name.as_str()) {
        return;
    }
    let raw_text = RAW_TEXT_ELEMENTS.contains(&name.as_str());
    for child in &element.children {
        write_node(child, raw_text, out);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}
