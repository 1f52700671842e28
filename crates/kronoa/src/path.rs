//! Path normalization and validation, applied at every public entry point.
//!
//! Content paths are `/`-separated, relative, and never contain dot-leading
//! components: every key beginning with a dot is reserved for the engine's
//! own markers and pointers, so user content can never collide with them.

use crate::{Error, Result};

/// System dotfiles the engine itself writes. These names are valid as
/// storage keys but are never accepted through a public API.
pub const SYSTEM_NAMES: &[&str] = &[
    ".production.json",
    ".staging.json",
    ".origin",
    ".flattened",
    ".head",
];

/// Trim surrounding whitespace and slashes, and collapse runs of slashes.
/// Normalization alone never fails; an unusable path is caught by
/// [`validate`].
pub fn normalize(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize `path` and require that it names user content: non-empty, no
/// `..`, no dot-leading components. Returns the normalized form.
pub fn validate(path: &str) -> Result<String> {
    let normalized = normalize(path);
    if normalized.is_empty() {
        return Err(Error::invalid_path(path, "path is empty"));
    }
    for component in normalized.split('/') {
        if component == ".." {
            return Err(Error::invalid_path(path, "path traversal is not allowed"));
        }
        if component.starts_with('.') {
            return Err(Error::invalid_path(
                path,
                "dot-leading components are reserved",
            ));
        }
    }
    Ok(normalized)
}

/// Working labels become pointer file names (`.{label}.json`), so they are a
/// single path component: no separators, no dots.
pub fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(Error::invalid_path(label, "label is empty"));
    }
    if label.contains('/') || label.contains('\\') {
        return Err(Error::invalid_path(label, "label must not contain slashes"));
    }
    if label == "." || label == ".." || label.contains('.') {
        return Err(Error::invalid_path(label, "label must not contain dots"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize("  /a//b/c/ "), "a/b/c");
        assert_eq!(normalize("///"), "");
        assert_eq!(normalize("a"), "a");
    }

    #[test]
    fn validate_accepts_ordinary_paths() {
        assert_eq!(validate("articles/2024/a.md").unwrap(), "articles/2024/a.md");
        assert_eq!(validate("/articles//a.md/").unwrap(), "articles/a.md");
    }

    #[test]
    fn validate_rejects_reserved_and_traversal() {
        assert!(matches!(validate(""), Err(Error::InvalidPath { .. })));
        assert!(matches!(validate("a/../b"), Err(Error::InvalidPath { .. })));
        assert!(matches!(validate(".origin"), Err(Error::InvalidPath { .. })));
        assert!(matches!(validate("a/.hidden/b"), Err(Error::InvalidPath { .. })));
        for name in SYSTEM_NAMES {
            assert!(validate(name).is_err());
        }
    }

    #[test]
    fn labels_are_single_plain_components() {
        assert!(validate_label("draft").is_ok());
        assert!(validate_label("hotfix-2").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("a/b").is_err());
        assert!(validate_label("..").is_err());
        assert!(validate_label("v1.2").is_err());
    }
}
