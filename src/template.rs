//! Template rendering for notification emails.
//!
//! Stored templates use a deliberately small token language: `{{ name }}`
//! is replaced by the context value named `name`, or by nothing when the
//! context has no such value. There is no nesting, no filters and no
//! control flow, so HTML produced by the rich-text editor goes through
//! untouched apart from the tokens.
//!
//! An optional [`Layout`] (minijinja) can wrap the rendered body in a
//! site-wide frame before the HTML is normalized.
//!
//! ```ignore
//! use hrnotify::template::render;
//!
//! let context = serde_json::json!({"nombre": "Ana"});
//! assert_eq!(render("Hola {{nombre}}", context.as_object().unwrap()), "Hola Ana");
//! ```

use std::sync::LazyLock;

use minijinja::{AutoEscape, Environment, UndefinedBehavior, context};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::TemplateError;
use crate::model::Template;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]*)\}\}").expect("valid regex"));

/// Subject and body of one email after token substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Replace every `{{ identifier }}` token in `template`.
///
/// Identifiers are trimmed. A missing key renders as the empty string, a
/// present `null` as `null`; never fails.
pub fn render(template: &str, context: &Map<String, Value>) -> String {
    TOKEN_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            context
                .get(caps[1].trim())
                .map(value_to_text)
                .unwrap_or_default()
        })
        .into_owned()
}

/// String form of a context value.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Render both subject and body of a stored template.
pub fn render_template(template: &Template, context: &Map<String, Value>) -> RenderedEmail {
    let rendered = RenderedEmail {
        subject: render(&template.subject, context),
        body: render(&template.body, context),
    };
    tracing::trace!(
        template_id = %template.id,
        subject_len = rendered.subject.len(),
        body_len = rendered.body.len(),
        "Template rendered"
    );
    rendered
}

/// Jinja layout wrapping every rendered body.
///
/// The layout sees `body` (already HTML, inserted unescaped), `subject`
/// and `rule_id` (both escaped).
pub struct Layout {
    env: Environment<'static>,
    source: String,
}

impl Layout {
    /// Compile-check `source` and build the layout.
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.template_from_str(&source)
            .map_err(|e| TemplateError::RenderFailed {
                message: e.to_string(),
            })?;
        Ok(Self { env, source })
    }

    /// Wrap `body` in the layout.
    pub fn wrap(&self, body: &str, subject: &str, rule_id: &str) -> Result<String, TemplateError> {
        let ctx = context! {
            body => minijinja::Value::from_safe_string(body.to_string()),
            subject => subject,
            rule_id => rule_id,
        };
        self.env
            .render_str(&self.source, ctx)
            .map_err(|e| TemplateError::RenderFailed {
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("source_len", &self.source.len())
            .finish()
    }
}
