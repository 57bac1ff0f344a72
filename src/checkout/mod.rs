use std::io::Write;
use tracing::debug;

use crate::status::get_status;
use crate::{Error, Result, Session};

/// Parameters of a checkout.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutOptions {
    pub request_id: u64,
    /// Download the merge request data again instead of using the cache.
    pub no_cache: bool,
    /// Fetch the source remote (and origin, for foreign sources).
    pub fetch: bool,
    /// Replace the URLs of an existing remote that points elsewhere.
    pub overwrite_remote: bool,
}

/// Add the merge request's source repository as remote, fetch it and
/// switch to the merge request branch. Records the branch in the request
/// database and returns the local branch name.
///
/// Nothing that already exists locally is silently repointed: a remote
/// with a different URL needs `overwrite_remote`, and a local branch
/// tracking another remote is an error.
pub fn checkout(
    session: &mut Session<'_>,
    options: &CheckoutOptions,
    out: &mut dyn Write,
) -> Result<String> {
    let request_id = options.request_id;
    let status = get_status(&session.api, &session.origin, request_id, options.no_cache)?;
    let vcs = session.vcs;
    let origin = &session.origin;

    let (namespace, repo) =
        status
            .source_project_path
            .split_once('/')
            .ok_or_else(|| Error::InvalidField {
                field: "source",
                value: status.source_project_path.clone(),
            })?;

    // Don't add the origin remote twice
    let same_project = namespace == origin.project_namespace;
    let remote = if same_project { "origin" } else { namespace };

    let project_repo_git = format!("{namespace}/{repo}.git");
    let url = format!("https://{}/{}", origin.host, project_repo_git);
    let push_url = format!("git@{}:{}", origin.host, project_repo_git);

    let existing = vcs.remote_url(remote)?;
    if let Some(existing) = &existing {
        if existing != &url && existing != &push_url {
            if !options.overwrite_remote {
                return Err(Error::RemoteMismatch {
                    remote: remote.to_string(),
                    existing: existing.clone(),
                    expected: url,
                    push_url,
                    request_id,
                });
            }
            writeln!(out, "Overwriting remote URL (old: '{existing}')")?;
            vcs.run_checked(&["remote", "set-url", remote, &url])?;
            vcs.run_checked(&["remote", "set-url", "--push", remote, &push_url])?;
        }
    }

    // Keeps the default branch current for the rebase check
    if options.fetch && !same_project {
        writeln!(out, "Fetch {}", origin.remote_url)?;
        vcs.run_checked(&["fetch", "origin"])?;
    }

    let mut fetch = options.fetch;
    if existing.is_none() {
        debug!("adding remote {} ({})", remote, url);
        vcs.run_checked(&["remote", "add", remote, &url])?;
        vcs.run_checked(&["remote", "set-url", "--push", remote, &push_url])?;
        fetch = true;
    }
    if fetch {
        writeln!(out, "Fetch {url}")?;
        vcs.run_checked(&["fetch", remote])?;
    }

    // Never shadow the local default branch
    let branch = &status.source_branch;
    let local_branch = if *branch == session.default_branch {
        format!("{namespace}-{branch}")
    } else {
        branch.clone()
    };

    writeln!(out, "Checkout {local_branch} from {remote}/{branch}")?;
    if vcs.local_branches()?.contains(&local_branch) {
        let upstream = vcs.branch_upstream_remote(&local_branch)?;
        if upstream.as_deref() != Some(remote) {
            return Err(Error::BranchRemoteMismatch {
                branch: local_branch,
                existing: upstream.unwrap_or_else(|| "(none)".to_string()),
                expected: remote.to_string(),
                default_branch: session.default_branch.clone(),
                request_id,
            });
        }
        vcs.run_checked(&["checkout", &local_branch])?;
    } else {
        let start = format!("{remote}/{branch}");
        vcs.run(&["checkout", "-b", &local_branch, &start], false)?;
        if vcs.current_branch()? != local_branch {
            return Err(Error::CheckoutFailed {
                branch: local_branch,
                request_id,
            });
        }
    }

    session
        .db
        .set(&origin.host, &origin.project_path, &local_branch, request_id)?;
    Ok(local_branch)
}
