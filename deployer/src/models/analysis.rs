//! Repository analysis models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application framework detected in a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Flask,
    Django,
    Node,
    Docker,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Flask => "flask",
            Framework::Django => "django",
            Framework::Node => "node",
            Framework::Docker => "docker",
            Framework::Unknown => "unknown",
        }
    }

    /// Port used when the repository does not say otherwise
    pub fn default_port(&self) -> u16 {
        match self {
            Framework::Flask => 5000,
            Framework::Node => 3000,
            Framework::Django | Framework::Docker | Framework::Unknown => 8000,
        }
    }

    /// Entry-point file names whose bind address gets rewritten on the host
    pub fn entry_points(&self) -> &'static [&'static str] {
        match self {
            Framework::Flask | Framework::Unknown => &["app.py"],
            Framework::Django => &["manage.py", "settings.py"],
            Framework::Node => &["server.js", "app.js", "index.js"],
            Framework::Docker => &[],
        }
    }
}

/// Result of inspecting the target repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Local checkout path
    pub repo_path: PathBuf,

    /// Repository URL the checkout came from
    pub repo_url: String,

    pub framework: Framework,

    pub port: u16,

    pub start_command: String,
}

impl Analysis {
    /// Repository name derived from the URL, e.g. `https://x/y/app.git` -> `app`
    pub fn repo_name(&self) -> Option<String> {
        repo_name_from_url(&self.repo_url)
    }
}

/// Last usable path segment of a repository URL with any `.git` suffix removed.
///
/// Segments that end up empty, `.` or `..` are skipped, so `.../shop/.git`
/// names `shop`. `None` when no segment is usable.
pub fn repo_name_from_url(repo_url: &str) -> Option<String> {
    let path = match url::Url::parse(repo_url) {
        Ok(url) => url.path().to_string(),
        // scp-like git@host:owner/repo.git
        Err(_) => repo_url
            .rsplit_once(':')
            .map(|(_, p)| p.to_string())
            .unwrap_or_else(|| repo_url.to_string()),
    };

    path.rsplit('/')
        .map(|segment| segment.trim_end_matches(".git"))
        .find(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}
