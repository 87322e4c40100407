//! Email HTML normalization.
//!
//! Rich-text bodies come out of the editor with `<mark>` highlights,
//! `data-*` driven image alignment and a `<style>` block scoped to the
//! editor wrapper. None of that survives common email clients, so bodies
//! are rewritten before sending:
//!
//! ```text
//! parse -> rewrite (marks, images) -> serialize -> inline CSS
//! ```
//!
//! Normalization is pure and never fails. Running it on its own output
//! leaves the structure unchanged.

pub mod dom;
pub mod inline;
pub mod rewrite;
pub mod style;

pub use inline::{CssInliner, SelectorInliner};

/// Normalizer with a pluggable CSS inliner.
pub struct EmailHtmlNormalizer {
    inliner: Box<dyn CssInliner>,
}

impl EmailHtmlNormalizer {
    pub fn new() -> Self {
        Self::with_inliner(SelectorInliner)
    }

    pub fn with_inliner(inliner: impl CssInliner + 'static) -> Self {
        Self {
            inliner: Box::new(inliner),
        }
    }

    pub fn normalize(&self, html: &str) -> String {
        let tree = dom::SourceTree::parse(html);
        let nodes = rewrite::rewrite(tree.to_nodes());
        self.inliner.inline(&dom::serialize(&nodes))
    }
}

impl Default for EmailHtmlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EmailHtmlNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailHtmlNormalizer").finish_non_exhaustive()
    }
}

/// Normalize with the default inliner.
pub fn normalize(html: &str) -> String {
    EmailHtmlNormalizer::new().normalize(html)
}
