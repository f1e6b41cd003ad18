//! Loopback address rewriting on the remote host
//!
//! Application code must listen on all interfaces, while rendered HTML must
//! point browsers at the public host. Both rewrites replace the same loopback
//! literals and run as `sed -i` on the remote file.

/// Loopback spellings that are replaced
pub const LOOPBACK_LITERALS: [&str; 2] = ["127.0.0.1", "localhost"];

/// Address a server binds to for all interfaces
pub const BIND_ALL: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewrite {
    replacement: String,
}

impl HostRewrite {
    /// Rewrite for application source: listen everywhere
    pub fn bind_all() -> Self {
        Self {
            replacement: BIND_ALL.to_string(),
        }
    }

    /// Rewrite for templates: link to the machine's public address
    pub fn public_host(host: impl Into<String>) -> Self {
        Self {
            replacement: host.into(),
        }
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Apply the rewrite to a string. Mirrors what the sed invocation does.
    pub fn apply(&self, text: &str) -> String {
        LOOPBACK_LITERALS
            .iter()
            .fold(text.to_string(), |acc, literal| {
                acc.replace(literal, &self.replacement)
            })
    }

    /// `sudo sed -i -e s/../../g ... <file>`
    pub fn sed_args(&self, file: &str) -> Vec<String> {
        let mut args = vec!["sudo".to_string(), "sed".to_string(), "-i".to_string()];
        for literal in LOOPBACK_LITERALS {
            args.push("-e".to_string());
            args.push(format!(
                "s/{}/{}/g",
                escape_pattern(literal),
                escape_replacement(&self.replacement)
            ));
        }
        args.push(file.to_string());
        args
    }
}

fn escape_pattern(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if ".[]*^$\\/".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_replacement(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\/&".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
