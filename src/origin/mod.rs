use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::git::{GitError, Vcs};

/// Hosting service the tool talks to.
pub const HOST: &str = "gitlab.com";

/// Canonical remote URL prefixes of [`HOST`] (SSH and HTTPS).
const PREFIXES: [&str; 2] = ["git@gitlab.com:", "https://gitlab.com/"];

static PROJECT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)*$").expect("project path regex")
});

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Not inside a git repository, or no 'origin' remote configured.")]
    NoOrigin,
    #[error("Failed to extract gitlab server from: {0}")]
    UnsupportedHost(String),
    #[error("Invalid project path in origin URL: {0}")]
    InvalidProjectPath(String),
    #[error(transparent)]
    Git(#[from] GitError),
}

pub type Result<T> = std::result::Result<T, OriginError>;

/// Coordinates of the project the `origin` remote points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginCoordinates {
    /// e.g. `gitlab.com`
    pub host: String,
    /// e.g. `https://gitlab.com/api/v4`
    pub api_base_url: String,
    /// e.g. `postmarketOS/pmaports`
    pub project_path: String,
    /// First segment of the project path, e.g. `postmarketOS`
    pub project_namespace: String,
    /// `project_path` percent-encoded for use as one API path segment
    pub encoded_project_path: String,
    /// The remote URL as configured
    pub remote_url: String,
}

impl OriginCoordinates {
    /// Web UI address of a merge request in this project.
    pub fn merge_request_url(&self, request_id: u64) -> String {
        format!(
            "https://{}/{}/merge_requests/{}",
            self.host, self.project_path, request_id
        )
    }
}

/// Read the `origin` remote and derive the project coordinates from it.
pub fn resolve(vcs: &dyn Vcs) -> Result<OriginCoordinates> {
    let url = vcs.remote_url("origin")?.ok_or(OriginError::NoOrigin)?;
    parse_origin_url(&url)
}

/// Derive project coordinates from a remote URL such as
/// `git@gitlab.com:group/project.git` or `https://gitlab.com/group/project`.
pub fn parse_origin_url(url: &str) -> Result<OriginCoordinates> {
    let rest = PREFIXES
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix))
        .ok_or_else(|| OriginError::UnsupportedHost(url.to_string()))?;

    let project_path = rest.strip_suffix(".git").unwrap_or(rest);
    if project_path.starts_with('-') || !PROJECT_PATH.is_match(project_path) {
        return Err(OriginError::InvalidProjectPath(project_path.to_string()));
    }

    let project_namespace = project_path
        .split('/')
        .next()
        .unwrap_or(project_path)
        .to_string();

    Ok(OriginCoordinates {
        host: HOST.to_string(),
        api_base_url: format!("https://{HOST}/api/v4"),
        project_path: project_path.to_string(),
        project_namespace,
        encoded_project_path: urlencoding::encode(project_path).into_owned(),
        remote_url: url.to_string(),
    })
}
