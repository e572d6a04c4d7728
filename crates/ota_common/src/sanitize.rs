//! Filename sanitization for everything that reaches the bundle directory.
//!
//! Client-supplied names are reduced to `[A-Za-z0-9._-]` before any path is
//! built from them. The result can be empty, so callers must check it.

/// Reduce a client-supplied filename to a safe, flat name.
///
/// Separators and NUL bytes are removed first, then every character outside
/// the ASCII alphanumerics and `._-` is dropped.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Sanitize and reject names that would collapse to nothing or to a
/// directory reference.
pub fn sanitize_nonempty(raw: &str) -> Option<String> {
    let safe = sanitize(raw);
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        None
    } else {
        Some(safe)
    }
}

/// Case-insensitive suffix check that also requires a non-empty stem.
pub fn has_extension(name: &str, extension: &str) -> bool {
    name.len() > extension.len()
        && name
            .get(name.len() - extension.len()..)
            .map(|suffix| suffix.eq_ignore_ascii_case(extension))
            .unwrap_or(false)
}
