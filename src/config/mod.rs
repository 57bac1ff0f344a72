use anyhow::{Context, Result, bail};
use std::path::PathBuf;

use crate::cli::Cli;
use crate::status::is_valid_branch;

/// Name of the per-user cache directory below the platform cache root.
const APP_DIR: &str = "git-mr";

/// Runtime settings, from command line options and their environment
/// variable fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of all persisted state (HTTP cache and request database).
    pub cache_root: PathBuf,
    /// Name of the project's main integration branch.
    pub default_branch: String,
    /// API token sent with every request, if any.
    pub token: Option<String>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let cache_root = match &cli.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_root()?,
        };

        if !is_valid_branch(&cli.default_branch) {
            bail!("Invalid default branch name: {}", cli.default_branch);
        }

        Ok(Self {
            cache_root,
            default_branch: cli.default_branch.clone(),
            token: cli.token.clone().filter(|token| !token.is_empty()),
        })
    }

    /// Directory holding one file per cached API response.
    pub fn http_cache_dir(&self) -> PathBuf {
        self.cache_root.join("http")
    }

    /// Location of the branch → merge request database.
    pub fn db_path(&self) -> PathBuf {
        self.cache_root.join("requests.db")
    }
}

/// Log filter directives. A non-empty `RUST_LOG` always wins; otherwise
/// `--verbose` selects debug output for this crate.
pub fn log_directives(verbose: bool, rust_log: Option<String>) -> String {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => directives,
        None if verbose => "git_mr=debug".to_string(),
        None => "git_mr=info".to_string(),
    }
}

fn default_cache_root() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .context("Could not determine the user cache directory, pass --cache-dir")?;
    Ok(base.join(APP_DIR))
}
