//! CSS inlining.
//!
//! Email clients strip `<style>` blocks, so rules are copied onto the
//! `style` attribute of every element they match. What cannot be inlined
//! (`@media` and other at-rules, dynamic pseudo-classes, pseudo-elements,
//! selectors the matcher does not understand) is kept verbatim in a single
//! `<style>` block at the start of the output.

use std::cmp::Ordering;

use scraper::Selector;

use super::dom::{Element, Node, SourceTree, serialize};
use super::style::{
    Declaration, QuoteTracker, parse_declarations, serialize_declarations, split_top_level,
};

/// Moves stylesheet rules into inline `style` attributes.
pub trait CssInliner: Send + Sync {
    /// Inline `html`. Never fails; input without stylesheets comes back
    /// unchanged.
    fn inline(&self, html: &str) -> String;
}

/// Inliner matching selectors with scraper's selector engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorInliner;

impl CssInliner for SelectorInliner {
    fn inline(&self, html: &str) -> String {
        let tree = SourceTree::parse(html);
        let sheets = tree.style_sheets();
        if sheets.is_empty() {
            return html.to_string();
        }

        let sheet = Stylesheet::parse(&sheets.join("\n"));
        let mut nodes = tree.to_nodes_with(|source, element| {
            if SKIPPED_ELEMENTS.contains(&element.name.as_str()) {
                return;
            }
            let matched: Vec<&StyleRule> = sheet
                .rules
                .iter()
                .filter(|rule| rule.selector.matches(&source))
                .collect();
            if !matched.is_empty() {
                apply_rules(element, matched);
            }
        });

        remove_style_elements(&mut nodes);
        if !sheet.preserved.is_empty() {
            let style = Element::new("style").with_child(Node::Text(sheet.preserved.join("\n")));
            insert_leading_style(&mut nodes, style, tree.is_document());
        }
        serialize(&nodes)
    }
}

/// Elements that never receive inline styles.
const SKIPPED_ELEMENTS: &[&str] = &[
    "style", "script", "head", "meta", "title", "link", "base", "html",
];

/// Pseudo-classes whose state only exists in an interactive client.
const DYNAMIC_PSEUDO_CLASSES: &[&str] = &[
    ":hover",
    ":active",
    ":focus",
    ":visited",
    ":link",
    ":target",
    ":checked",
    ":before",
    ":after",
    ":first-line",
    ":first-letter",
];

/// `(ids, classes/attributes/pseudo-classes, types)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity(pub u32, pub u32, pub u32);

/// One inlinable selector with the declarations it carries.
struct StyleRule {
    selector: Selector,
    specificity: Specificity,
    order: usize,
    declarations: Vec<Declaration>,
}

/// A parsed stylesheet split into inlinable rules and preserved text.
struct Stylesheet {
    rules: Vec<StyleRule>,
    preserved: Vec<String>,
}

impl Stylesheet {
    fn parse(css: &str) -> Self {
        let css = strip_comments(css);
        let mut sheet = Stylesheet {
            rules: Vec::new(),
            preserved: Vec::new(),
        };

        for block in split_blocks(&css) {
            match block {
                CssBlock::AtRule(text) => sheet.preserved.push(text.to_string()),
                CssBlock::Rule { prelude, body } => sheet.add_rule(prelude, body),
            }
        }
        sheet
    }

    fn add_rule(&mut self, prelude: &str, body: &str) {
        let declarations = parse_declarations(body);
        let body = body.trim();
        for selector_text in split_top_level(prelude, ',') {
            let selector_text = selector_text.trim();
            if selector_text.is_empty() {
                continue;
            }
            let parsed = if is_dynamic(selector_text) {
                None
            } else {
                Selector::parse(selector_text).ok()
            };
            match parsed {
                Some(selector) => {
                    if declarations.is_empty() {
                        continue;
                    }
                    let order = self.rules.len();
                    self.rules.push(StyleRule {
                        selector,
                        specificity: specificity(selector_text),
                        order,
                        declarations: declarations.clone(),
                    });
                }
                None => self.preserved.push(format!("{selector_text} {{ {body} }}")),
            }
        }
    }
}

fn is_dynamic(selector: &str) -> bool {
    let lower = selector.to_ascii_lowercase();
    lower.contains("::")
        || DYNAMIC_PSEUDO_CLASSES.iter().any(|pseudo| {
            lower.match_indices(pseudo).any(|(index, _)| {
                let rest = &lower[index + pseudo.len()..];
                !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-')
            })
        })
}

enum CssBlock<'a> {
    /// Complete at-rule text, block or statement.
    AtRule(&'a str),
    Rule { prelude: &'a str, body: &'a str },
}

/// Split a comment-free stylesheet into top-level blocks. An unterminated
/// trailing block extends to the end of input.
fn split_blocks(css: &str) -> Vec<CssBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = css.trim_start();

    while !rest.is_empty() {
        if rest.starts_with('@') {
            let brace = rest.find('{');
            let semicolon = rest.find(';');
            let end = match (brace, semicolon) {
                (Some(b), Some(s)) if s < b => s + 1,
                (None, Some(s)) => s + 1,
                (Some(b), _) => matching_brace(rest, b).map(|e| e + 1).unwrap_or(rest.len()),
                (None, None) => rest.len(),
            };
            blocks.push(CssBlock::AtRule(rest[..end].trim()));
            rest = rest[end..].trim_start();
            continue;
        }

        let Some(open) = rest.find('{') else {
            break;
        };
        let close = matching_brace(rest, open).unwrap_or(rest.len());
        blocks.push(CssBlock::Rule {
            prelude: &rest[..open],
            body: &rest[open + 1..close],
        });
        rest = rest.get(close + 1..).unwrap_or("").trim_start();
    }
    blocks
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quotes = QuoteTracker::default();
    for (index, c) in text[open..].char_indices() {
        if !quotes.outside(c) {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop `/* ... */` comments outside strings. An unterminated comment runs
/// to the end of input.
fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut quotes = QuoteTracker::default();
    let mut rest = css;
    while let Some(c) = rest.chars().next() {
        if quotes.outside(c) && rest.starts_with("/*") {
            rest = match rest[2..].find("*/") {
                Some(end) => &rest[2 + end + 2..],
                None => "",
            };
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Selector specificity counted from its text.
pub fn specificity(selector: &str) -> Specificity {
    let mut spec = Specificity(0, 0, 0);
    let chars: Vec<char> = selector.chars().collect();
    let mut i = 0;

    let is_ident = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    let ident_end = |from: usize| {
        let mut j = from;
        while j < chars.len() && is_ident(chars[j]) {
            j += 1;
        }
        j
    };
    let group_end = |from: usize| {
        let mut depth = 0usize;
        let mut j = from;
        while j < chars.len() {
            match chars[j] {
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return j + 1;
                    }
                }
                _ => {}
            }
            j += 1;
        }
        j
    };

    while i < chars.len() {
        match chars[i] {
            '#' => {
                spec.0 += 1;
                i = ident_end(i + 1);
            }
            '.' => {
                spec.1 += 1;
                i = ident_end(i + 1);
            }
            '[' => {
                spec.1 += 1;
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                spec.2 += 1;
                i = ident_end(i + 2);
            }
            ':' => {
                let end = ident_end(i + 1);
                let name: String = chars[i + 1..end].iter().collect::<String>().to_lowercase();
                i = end;
                if chars.get(i) == Some(&'(') {
                    let close = group_end(i);
                    let inner: String = chars[i + 1..close.saturating_sub(1).max(i + 1)]
                        .iter()
                        .collect();
                    i = close;
                    match name.as_str() {
                        "where" => {}
                        "not" | "is" | "has" => {
                            let most = split_top_level(&inner, ',')
                                .into_iter()
                                .map(specificity)
                                .max()
                                .unwrap_or(Specificity(0, 0, 0));
                            spec.0 += most.0;
                            spec.1 += most.1;
                            spec.2 += most.2;
                        }
                        _ => spec.1 += 1,
                    }
                } else {
                    spec.1 += 1;
                }
            }
            c if c.is_alphabetic() => {
                spec.2 += 1;
                i = ident_end(i);
            }
            _ => i += 1,
        }
    }
    spec
}

/// Merge matched rules into the element's `style` attribute.
///
/// Precedence, lowest first: sheet declarations (by specificity, then
/// source order), inline declarations, `!important` sheet declarations,
/// `!important` inline declarations.
fn apply_rules(element: &mut Element, mut matched: Vec<&StyleRule>) {
    matched.sort_by(|a, b| match a.specificity.cmp(&b.specificity) {
        Ordering::Equal => a.order.cmp(&b.order),
        other => other,
    });

    let inline = element
        .attr("style")
        .map(parse_declarations)
        .unwrap_or_default();

    let sheet_declarations = matched.iter().flat_map(|rule| rule.declarations.iter());
    let candidates = sheet_declarations
        .map(|d| (d, if d.important { 2 } else { 0 }))
        .chain(inline.iter().map(|d| (d, if d.important { 3 } else { 1 })));

    let mut merged: Vec<(Declaration, u8)> = Vec::new();
    for (declaration, rank) in candidates {
        match merged
            .iter_mut()
            .find(|(existing, _)| existing.property == declaration.property)
        {
            Some((existing, existing_rank)) => {
                if rank >= *existing_rank {
                    *existing = declaration.clone();
                    *existing_rank = rank;
                }
            }
            None => merged.push((declaration.clone(), rank)),
        }
    }

    let declarations: Vec<Declaration> = merged.into_iter().map(|(d, _)| d).collect();
    element.set_attr("style", serialize_declarations(&declarations));
    element.attrs.sort_by(|a, b| a.0.cmp(&b.0));
}

fn remove_style_elements(nodes: &mut Vec<Node>) {
    nodes.retain(|node| !matches!(node, Node::Element(el) if el.is("style")));
    for node in nodes.iter_mut() {
        if let Node::Element(element) = node {
            remove_style_elements(&mut element.children);
        }
    }
}

/// Put `style` first in `<head>` for documents, first in the fragment
/// otherwise.
fn insert_leading_style(nodes: &mut Vec<Node>, style: Element, document: bool) {
    if document {
        let head = nodes.iter_mut().find_map(|node| match node {
            Node::Element(html) if html.is("html") => {
                html.children.iter_mut().find_map(|child| match child {
                    Node::Element(head) if head.is("head") => Some(head),
                    _ => None,
                })
            }
            _ => None,
        });
        if let Some(head) = head {
            head.children.insert(0, Node::Element(style));
            return;
        }
    }
    nodes.insert(0, Node::Element(style));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(html: &str) -> String {
        SelectorInliner.inline(html)
    }

    // ===================================================================
    // Specificity
    // ===================================================================

    #[test]
    fn specificity_counts_ids_classes_types() {
        assert_eq!(specificity("p"), Specificity(0, 0, 1));
        assert_eq!(specificity(".a"), Specificity(0, 1, 0));
        assert_eq!(specificity("#x"), Specificity(1, 0, 0));
        assert_eq!(specificity("div.a > p"), Specificity(0, 1, 2));
        assert_eq!(specificity("a[href]"), Specificity(0, 1, 1));
        assert_eq!(specificity("li:first-child"), Specificity(0, 1, 1));
        assert_eq!(specificity("p:not(.a, #b)"), Specificity(1, 0, 1));
        assert_eq!(specificity(":where(#a) p"), Specificity(0, 0, 1));
        assert_eq!(specificity("*"), Specificity(0, 0, 0));
        assert_eq!(
            specificity(".simple-editor-content h1"),
            Specificity(0, 1, 1)
        );
    }

    // ===================================================================
    // Inlining
    // ===================================================================

    #[test]
    fn input_without_style_is_unchanged() {
        let html = r#"<p class="x">Hola</p>"#;
        assert_eq!(inline(html), html);
    }

    #[test]
    fn inlines_matching_rules_and_drops_style_block() {
        let html = concat!(
            "<style>p { color: red; } .big { font-size: 20px }</style>",
            r#"<p class="big">x</p><div>y</div>"#
        );
        assert_eq!(
            inline(html),
            r#"<p class="big" style="color: red; font-size: 20px;">x</p><div>y</div>"#
        );
    }

    #[test]
    fn descendant_selectors_apply_inside_wrapper() {
        let html = concat!(
            "<style>.simple-editor-content p { margin: 0 }</style>",
            r#"<div class="simple-editor-content"><p>a</p></div><p>b</p>"#
        );
        assert_eq!(
            inline(html),
            r#"<div class="simple-editor-content"><p style="margin: 0;">a</p></div><p>b</p>"#
        );
    }

    #[test]
    fn higher_specificity_wins_regardless_of_order() {
        let html = "<style>.a { color: blue } p { color: red }</style><p class=\"a\">x</p>";
        assert_eq!(inline(html), r#"<p class="a" style="color: blue;">x</p>"#);
    }

    #[test]
    fn later_rule_wins_at_equal_specificity() {
        let html = "<style>p { color: red } p { color: green }</style><p>x</p>";
        assert_eq!(inline(html), r#"<p style="color: green;">x</p>"#);
    }

    #[test]
    fn existing_inline_wins_unless_important() {
        let html = concat!(
            "<style>p { color: red; margin: 0 !important; padding: 1px }</style>",
            r#"<p style="color: blue; margin: 5px">x</p>"#
        );
        assert_eq!(
            inline(html),
            r#"<p style="color: blue; margin: 0 !important; padding: 1px;">x</p>"#
        );
    }

    #[test]
    fn media_queries_and_hover_are_preserved_up_front() {
        let html = concat!(
            "<p>x</p><style>",
            "/* editor styles */ a:hover { color: red } ",
            "@media (max-width: 600px) { p { font-size: 12px } } ",
            "p { color: black }",
            "</style>"
        );
        assert_eq!(
            inline(html),
            concat!(
                "<style>a:hover { color: red }\n",
                "@media (max-width: 600px) { p { font-size: 12px } }</style>",
                r#"<p style="color: black;">x</p>"#
            )
        );
    }

    #[test]
    fn mixed_selector_list_is_split() {
        let html = "<style>p, p::before { color: red }</style><p>x</p>";
        assert_eq!(
            inline(html),
            r#"<style>p::before { color: red }</style><p style="color: red;">x</p>"#
        );
    }

    #[test]
    fn unparsable_selectors_are_preserved() {
        let html = "<style>p!!x { color: red }</style><p>x</p>";
        assert_eq!(inline(html), "<style>p!!x { color: red }</style><p>x</p>");
    }

    #[test]
    fn inlining_twice_is_stable() {
        let html = concat!(
            "<style>@media print { p { display: none } } ",
            "p { color: red } a:hover { color: blue }</style>",
            r#"<p style="margin: 0">x <a href="https://example.com">y</a></p>"#
        );
        let once = inline(html);
        assert_eq!(inline(&once), once);
        assert_eq!(once.matches("color: red").count(), 1);
    }

    #[test]
    fn document_keeps_preserved_style_in_head() {
        let html = concat!(
            "<!DOCTYPE html><html><head>",
            "<style>@media screen { p { color: red } } p { margin: 0 }</style></head>",
            "<body><p>x</p></body></html>"
        );
        assert_eq!(
            inline(html),
            concat!(
                "<!DOCTYPE html><html><head>",
                "<style>@media screen { p { color: red } }</style></head>",
                r#"<body><p style="margin: 0;">x</p></body></html>"#
            )
        );
    }

    #[test]
    fn comment_markers_inside_strings_are_kept() {
        let html = concat!(
            r#"<style>p { content: "/* x */"; color: red } /* note */ a { quotes: '*/' }</style>"#,
            "<p>x</p><a>y</a>"
        );
        assert_eq!(
            inline(html),
            concat!(
                r#"<p style="content: &quot;/* x */&quot;; color: red;">x</p>"#,
                r#"<a style="quotes: '*/';">y</a>"#
            )
        );
    }

    #[test]
    fn strip_comments_respects_quotes_and_escapes() {
        assert_eq!(strip_comments("a /* b */ c"), "a  c");
        assert_eq!(
            strip_comments(r#"p { content: "/*" } /* x */"#),
            r#"p { content: "/*" } "#
        );
        assert_eq!(
            strip_comments(r#"p { content: "\" /* kept */" }"#),
            r#"p { content: "\" /* kept */" }"#
        );
        assert_eq!(strip_comments("a /* open"), "a ");
    }

    #[test]
    fn unterminated_css_does_not_panic() {
        let out = inline("<style>p { color: red</style><p>x</p>");
        assert_eq!(out, r#"<p style="color: red;">x</p>"#);
        let out = inline("<style>@media screen { p {</style><p>x</p>");
        assert!(out.contains("<p>x</p>"));
    }
}
