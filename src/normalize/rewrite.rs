//! Structural rewrites for email clients: highlight marks become styled
//! spans, aligned images are wrapped in layout tables.
//!
//! The `data-*` attributes that drive a rewrite are consumed by it, so a
//! second pass over rewritten output changes nothing.

use super::dom::{Element, Node};
use super::style::{Declaration, serialize_declarations};

pub fn rewrite(nodes: Vec<Node>) -> Vec<Node> {
    nodes.into_iter().map(rewrite_node).collect()
}

fn rewrite_node(node: Node) -> Node {
    match node {
        Node::Element(element) if element.is("mark") => Node::Element(mark_to_span(&element)),
        Node::Element(element) if element.is("img") && is_sized_image(&element) => {
            image_to_block(element)
        }
        Node::Element(mut element) => {
            element.children = rewrite(std::mem::take(&mut element.children));
            Node::Element(element)
        }
        other => other,
    }
}

/// A `<span>` holding the mark's text, colored from its data attributes.
fn mark_to_span(mark: &Element) -> Element {
    let mut declarations = Vec::new();
    for (attr, property) in [
        ("data-color", "background-color"),
        ("data-color-text", "color"),
        ("data-align", "text-align"),
        ("data-width", "width"),
    ] {
        if let Some(value) = mark.attr(attr).map(str::trim).filter(|v| !v.is_empty()) {
            declarations.push(Declaration::new(property, value));
        }
    }

    let mut span = Element::new("span");
    if !declarations.is_empty() {
        span.set_attr("style", serialize_declarations(&declarations));
    }
    let text = mark.text_content();
    if !text.is_empty() {
        span.children.push(Node::Text(text));
    }
    span
}

fn is_sized_image(img: &Element) -> bool {
    img.attr("data-align").is_some() || img.attr("data-width").is_some()
}

/// Reset the image style to a block layout; aligned images are wrapped in a
/// full-width table whose cell carries the alignment.
fn image_to_block(mut img: Element) -> Node {
    img.remove_attr("style");
    let align = img
        .remove_attr("data-align")
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    let width = img
        .remove_attr("data-width")
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty());

    let display = if align.is_some() { "inline-block" } else { "block" };
    let mut declarations = vec![
        Declaration::new("display", display),
        Declaration::new("height", "auto"),
    ];
    if let Some(width) = width {
        declarations.push(Declaration::new("width", width));
    }
    img.set_attr("style", serialize_declarations(&declarations));
    img.attrs.sort_by(|a, b| a.0.cmp(&b.0));

    let Some(align) = align else {
        return Node::Element(img);
    };

    let cell = Element::new("td")
        .with_attr("align", align)
        .with_attr("style", "vertical-align: top;")
        .with_child(Node::Element(img));
    let table = Element::new("table")
        .with_attr("cellpadding", "0")
        .with_attr("cellspacing", "0")
        .with_attr("width", "100%")
        .with_child(Node::Element(
            Element::new("tbody").with_child(Node::Element(
                Element::new("tr").with_child(Node::Element(cell)),
            )),
        ));
    Node::Element(table)
}
