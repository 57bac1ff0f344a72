use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "git-mr",
    version,
    about = "Check out, inspect and polish GitLab merge requests"
)]
pub struct Cli {
    /// Do not use the local cache for merge request information.
    #[arg(short, long)]
    pub no_cache: bool,

    /// Display debug log: all git commands and locations of HTTP cache files.
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory for the HTTP cache and the branch database.
    #[arg(long, env = "GIT_MR_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Name of the project's default branch.
    #[arg(long, env = "GIT_MR_DEFAULT_BRANCH", default_value = "master", value_name = "NAME")]
    pub default_branch: String,

    /// GitLab access token, needed for private projects.
    #[arg(long, env = "GIT_MR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the merge request status and what to do next.
    Status(StatusArgs),
    /// Add the merge request's remote and switch to its branch.
    Checkout(CheckoutArgs),
    /// Add the merge request ID to all commit messages of the branch.
    Fixmsg,
    /// List branches associated with merge requests in this project.
    List,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Merge request ID. Defaults to the one checked out on the current branch.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub request_id: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Merge request ID.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub request_id: u64,

    /// Do not fetch the remote and origin repositories.
    #[arg(short, long)]
    pub no_fetch: bool,

    /// Overwrite the remote URLs if they differ.
    #[arg(short, long)]
    pub overwrite_remote: bool,
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
