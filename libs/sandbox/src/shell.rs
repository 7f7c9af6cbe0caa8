//! Shell quoting for commands sent to an instance.
//!
//! Every dynamic value placed into a shell command (commit messages, file
//! paths, branch names, repository URLs) goes through [`quote`].

use std::borrow::Cow;

use shell_escape::escape;

/// Quote a single argument for POSIX `sh`.
pub fn quote(arg: &str) -> String {
    escape(Cow::Borrowed(arg)).into_owned()
}

/// Build `program arg1 arg2 ...` with every argument quoted.
pub fn command<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg.as_ref()));
    }
    line
}

/// Embed an access token into an `https://` repository URL.
///
/// URLs that are not `https://`, or an empty token, are returned unchanged.
pub fn authenticated_url(repo_url: &str, token: &str) -> String {
    if token.is_empty() {
        return repo_url.to_string();
    }
    match repo_url.strip_prefix("https://") {
        Some(rest) => format!("https://{}@{}", token, rest),
        None => repo_url.to_string(),
    }
}

/// Replace every occurrence of a secret with `***`.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_word_unchanged() {
        assert_eq!(quote("main"), "main");
    }

    #[test]
    fn test_quote_dangerous_values() {
        for value in ["a b", "$(whoami)", "`id`", "x; rm -rf ./tmp", "it's"] {
            let quoted = quote(value);
            assert!(
                quoted.starts_with('\'') || quoted.contains('\\'),
                "value should be quoted: {value} -> {quoted}"
            );
        }
    }

    #[test]
    fn test_command_quotes_each_argument() {
        let line = command("git", ["commit", "-m", "fix: handle 'quotes'"]);
        assert!(line.starts_with("git commit -m '"));
        assert!(!line.contains("-m fix:"));
    }

    #[test]
    fn test_authenticated_url() {
        assert_eq!(
            authenticated_url("https://github.com/acme/brain.git", "tok"),
            "https://tok@github.com/acme/brain.git"
        );
        assert_eq!(
            authenticated_url("git@github.com:acme/brain.git", "tok"),
            "git@github.com:acme/brain.git"
        );
        assert_eq!(
            authenticated_url("https://github.com/acme/brain.git", ""),
            "https://github.com/acme/brain.git"
        );
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("clone https://tok@github.com failed", "tok"),
            "clone https://***@github.com failed"
        );
        assert_eq!(redact("nothing", ""), "nothing");
    }
}
