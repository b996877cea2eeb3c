//! Helpers for the `key:value` tokens that pipeline steps take as arguments.

/// Split an option token at its first `:` into `(key, value)`.
///
/// Returns `None` for tokens without a colon. Only the first colon counts,
/// so `accept:text/xml` and `user-agent:Foo/1.0 (+http://x)` keep their values
/// intact.
pub fn split_option(arg: &str) -> Option<(&str, &str)> {
    arg.split_once(':')
}

/// Boolean-ish flag values: `true`, `1`, `yes` (case-insensitive).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}
