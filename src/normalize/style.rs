//! Inline `style` attribute declarations.

/// One `property: value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Lowercased property name.
    pub property: String,
    pub value: String,
    pub important: bool,
}

impl Declaration {
    pub fn new(property: &str, value: impl Into<String>) -> Self {
        Self {
            property: property.trim().to_ascii_lowercase(),
            value: value.into(),
            important: false,
        }
    }
}

/// Parse a declaration block (`a: b; c: d !important`). Entries without a
/// colon or with an empty property or value are dropped.
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    split_top_level(block, ';')
        .into_iter()
        .filter_map(|entry| {
            let (property, value) = entry.split_once(':')?;
            let property = property.trim();
            let mut value = value.trim();
            let mut important = false;
            if let Some(stripped) = strip_important(value) {
                value = stripped;
                important = true;
            }
            if property.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration {
                property: property.to_ascii_lowercase(),
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

fn strip_important(value: &str) -> Option<&str> {
    let lower = value.to_ascii_lowercase();
    let index = lower.rfind("!important")?;
    if lower[index + "!important".len()..].trim().is_empty() {
        Some(value[..index].trim_end())
    } else {
        None
    }
}

/// Serialize as `a: b; c: d !important;`.
pub fn serialize_declarations(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(|d| {
            if d.important {
                format!("{}: {} !important;", d.property, d.value)
            } else {
                format!("{}: {};", d.property, d.value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tracks whether CSS text being scanned is inside a quoted string.
///
/// Backslash escapes inside strings are honored, so `"a\"b"` is one string.
#[derive(Debug, Default)]
pub struct QuoteTracker {
    quote: Option<char>,
    escaped: bool,
}

impl QuoteTracker {
    /// Feed the next character. True when `c` is plain CSS: neither inside
    /// a string nor one of its delimiters.
    pub fn outside(&mut self, c: char) -> bool {
        match self.quote {
            Some(_) if self.escaped => self.escaped = false,
            Some(_) if c == '\\' => self.escaped = true,
            Some(q) if c == q => self.quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => self.quote = Some(c),
            None => return true,
        }
        false
    }
}

/// Split on `separator` outside quotes and parentheses.
pub fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quotes = QuoteTracker::default();
    let mut start = 0;
    for (index, c) in input.char_indices() {
        if !quotes.outside(c) {
            continue;
        }
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&input[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}
