//! Shell quoting for values interpolated into remote commands
//!
//! Every account name, path, group list and key line that ends up in a
//! remote command goes through [`shell_quote`] first.

/// Escapes a string for use inside a single-quoted shell word.
///
/// Replaces single quotes with the pattern `'"'"'` which ends the current
/// single-quoted string, adds a double-quoted single quote, and starts a new
/// single-quoted string.
///
/// # Examples
///
/// ```
/// use ssh_baseline::ssh::sanitize::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Quotes a value as exactly one shell word.
///
/// # Examples
///
/// ```
/// use ssh_baseline::ssh::sanitize::shell_quote;
///
/// assert_eq!(shell_quote("/home/alice"), "'/home/alice'");
/// assert_eq!(shell_quote("a b; rm -rf /"), "'a b; rm -rf /'");
/// ```
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", escape_for_shell(s))
}
