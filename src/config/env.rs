//! `${VAR}` expansion and layout file loading.

use crate::error::ConfigError;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Largest accepted layout file.
const MAX_LAYOUT_BYTES: usize = 1024 * 1024;

static ENV_REF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Expand every `${NAME}` in `value` from the process environment.
///
/// All unset names are reported together, each once.
pub fn resolve_env_vars(value: &str) -> Result<String, ConfigError> {
    let mut unset: Vec<String> = Vec::new();

    let expanded = ENV_REF_REGEX.replace_all(value, |caps: &Captures<'_>| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            if !unset.iter().any(|n| n == name) {
                unset.push(name.to_string());
            }
            String::new()
        })
    });

    match unset.len() {
        0 => Ok(expanded.into_owned()),
        1 => Err(ConfigError::ValidationError(format!(
            "undefined environment variable: {}",
            unset[0]
        ))),
        _ => Err(ConfigError::ValidationError(format!(
            "undefined environment variables: {}",
            unset.join(", ")
        ))),
    }
}

/// Load the layout template; relative paths are taken from `config_dir`.
pub fn resolve_layout_template(file: &str, config_dir: &Path) -> Result<String, ConfigError> {
    let path: PathBuf = if Path::new(file).is_absolute() {
        PathBuf::from(file)
    } else {
        config_dir.join(file)
    };
    let fail = |reason: String| {
        ConfigError::ValidationError(format!("layout_template_file {}: {}", reason, path.display()))
    };

    let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => fail("not found".to_string()),
        _ => fail(format!("unreadable ({})", e)),
    })?;
    if bytes.len() > MAX_LAYOUT_BYTES {
        return Err(fail(format!("larger than 1MB ({} bytes)", bytes.len())));
    }
    let source = String::from_utf8(bytes).map_err(|_| fail("is not valid UTF-8".to_string()))?;

    tracing::debug!(path = %path.display(), "Layout template loaded");
    Ok(source)
}
