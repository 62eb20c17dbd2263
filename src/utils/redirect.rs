// Post-login redirect target validation

/// Whether `raw` is acceptable as a post-login redirect destination.
///
/// Only same-origin relative paths pass: the value must start with a
/// single `/` and must not smuggle a scheme, an authority, a traversal
/// segment, a backslash, or control characters. Anything else falls back
/// to the configured post-login URL, so a crafted `rd` parameter cannot
/// turn the login flow into an open redirect.
#[must_use]
pub fn is_safe_return_url(raw: &str) -> bool {
    if raw.len() > 2048 {
        return false;
    }
    // "//host" and "/\host" are protocol-relative authorities, ":" would
    // allow "javascript:" and friends past a naive path check
    raw.starts_with('/')
        && !raw.starts_with("//")
        && !raw.contains(':')
        && !raw.contains('\\')
        && !raw.contains("..")
        && !raw.chars().any(char::is_control)
}
