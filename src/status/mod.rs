use regex::Regex;
use serde::Deserialize;
use std::io::Write;
use std::sync::LazyLock;

use crate::api::ApiClient;
use crate::fixmsg::id_suffix;
use crate::git::Vcs;
use crate::origin::OriginCoordinates;
use crate::{Error, LifecycleState, RequestStatus, Result, Session, TriState};

static NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("namespace regex"));

static SOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("source path regex")
});

// Any number of `/`-separated segments, so `user/topic/part` is accepted.
static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)*$").expect("branch regex")
});

/// Merge request resource, only the fields we read.
/// https://docs.gitlab.com/ee/api/merge_requests.html
#[derive(Debug, Deserialize)]
struct MergeRequestResource {
    title: String,
    source_branch: String,
    source_project_id: u64,
    state: LifecycleState,
    #[serde(default)]
    allow_maintainer_to_push: Option<bool>,
    #[serde(default)]
    allow_collaboration: Option<bool>,
}

/// https://docs.gitlab.com/ee/api/projects.html
#[derive(Debug, Deserialize)]
struct ProjectResource {
    path_with_namespace: String,
    namespace: NamespaceResource,
}

#[derive(Debug, Deserialize)]
struct NamespaceResource {
    name: String,
}

/// Whether `name` is acceptable as a branch name on a git command line.
pub fn is_valid_branch(name: &str) -> bool {
    !name.starts_with('-') && BRANCH.is_match(name)
}

/// Reject API supplied values that could be mistaken for git options or
/// contain anything but a conservative set of characters.
fn check_field(field: &'static str, value: &str, pattern: &Regex) -> Result<()> {
    if value.starts_with('-') || !pattern.is_match(value) {
        return Err(Error::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Query the merge request and its source project from the API.
///
/// The source project is always served from the cache when possible:
/// its path hardly ever changes, and a stale one still works locally.
pub fn get_status(
    api: &ApiClient<'_>,
    origin: &OriginCoordinates,
    request_id: u64,
    no_cache: bool,
) -> Result<RequestStatus> {
    let request: MergeRequestResource = api.fetch_as(
        &format!(
            "/projects/{}/merge_requests/{}",
            origin.encoded_project_path, request_id
        ),
        no_cache,
    )?;
    let source: ProjectResource =
        api.fetch_as(&format!("/projects/{}", request.source_project_id), false)?;

    check_field("source", &source.path_with_namespace, &SOURCE_PATH)?;
    check_field("source_namespace", &source.namespace.name, &NAMESPACE)?;
    check_field("branch", &request.source_branch, &BRANCH)?;

    // Requests from branches of the project itself can always be pushed to.
    let allow_maintainer_push = request.allow_maintainer_to_push.unwrap_or(false)
        || request.allow_collaboration.unwrap_or(false)
        || source.namespace.name == origin.project_namespace;

    Ok(RequestStatus {
        title: request.title,
        source_branch: request.source_branch,
        source_project_path: source.path_with_namespace,
        source_namespace: source.namespace.name,
        allow_maintainer_push,
        state: request.state,
    })
}

/// Whether every commit's subject ends with ` (!<id>)`.
pub fn commits_have_id(vcs: &dyn Vcs, commits: &[String], request_id: u64) -> Result<bool> {
    let suffix = id_suffix(request_id);
    for commit in commits {
        if !vcs.commit_subject(commit)?.ends_with(&suffix) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Everything the status report and checklist are derived from.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub request_id: u64,
    pub url: String,
    pub status: RequestStatus,
    pub checked_out: bool,
    pub commit_count: usize,
    pub clean_worktree: TriState,
    pub rebased: TriState,
    pub commits_have_id: TriState,
    pub default_branch: String,
}

impl StatusReport {
    /// Gather the report. The local checks only run when the request's
    /// branch is the one checked out, otherwise they stay `Unknown`.
    pub fn collect(session: &Session<'_>, request_id: u64, no_cache: bool) -> Result<Self> {
        let status = get_status(&session.api, &session.origin, request_id, no_cache)?;
        let checked_out = session.checked_out()? == Some(request_id);

        let mut report = Self {
            request_id,
            url: session.origin.merge_request_url(request_id),
            status,
            checked_out,
            commit_count: 0,
            clean_worktree: TriState::Unknown,
            rebased: TriState::Unknown,
            commits_have_id: TriState::Unknown,
            default_branch: session.default_branch.clone(),
        };

        if checked_out {
            let vcs = session.vcs;
            let upstream = session.upstream();
            let commits = vcs.commits_ahead(&upstream, "HEAD")?;
            report.rebased = vcs.commits_ahead("HEAD", &upstream)?.is_empty().into();
            report.clean_worktree = vcs.is_working_tree_clean()?.into();
            report.commits_have_id = commits_have_id(vcs, &commits, request_id)?.into();
            report.commit_count = commits.len();
        }

        Ok(report)
    }

    fn write_header(&self, out: &mut dyn Write) -> Result<()> {
        let status = &self.status;
        writeln!(out, "{}", self.url)?;
        writeln!(out)?;
        writeln!(out, "\"{}\" (!{})", status.title, self.request_id)?;
        if self.checked_out {
            writeln!(
                out,
                "{} commit{} from {}/{}",
                self.commit_count,
                if self.commit_count > 1 { "s" } else { "" },
                status.source_namespace,
                status.source_branch
            )?;
        } else {
            writeln!(out, "not checked out, from {}", status.source_project_path)?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_checks(&self, out: &mut dyn Write) -> Result<()> {
        let checks = [
            (
                TriState::from(self.status.allow_maintainer_push),
                "Changes allowed".to_string(),
            ),
            (self.clean_worktree, "Clean worktree".to_string()),
            (self.rebased, format!("Rebase on {}", self.default_branch)),
            (self.commits_have_id, "MR-ID in commit msgs".to_string()),
        ];
        for (state, label) in checks {
            writeln!(out, "{} {}", state.marker(), label)?;
        }
        Ok(())
    }
}

/// Next steps towards merging, in priority order.
///
/// Stops at the first unmet requirement, so only the action that is
/// currently possible is listed. The squash hint is informational and
/// doesn't stop the evaluation.
pub fn checklist(report: &StatusReport) -> Vec<String> {
    let id = report.request_id;
    let default_branch = &report.default_branch;
    let mut items = Vec::new();

    if !report.status.allow_maintainer_push {
        items.push(
            "Ask MR author to tick 'Allow commits from members who can merge to the target branch.'"
                .to_string(),
        );
        items.push(format!("Check again ('git mr -n status {id}')"));
        return items;
    }

    if !report.checked_out {
        items.push(format!("Checkout this MR ('git mr checkout {id}')"));
        return items;
    }

    if report.clean_worktree != TriState::Yes {
        items.push("Commit or stash changes in your worktree".to_string());
        items.push("Check again ('git mr status')".to_string());
        return items;
    }

    if report.commit_count > 1 {
        items.push(format!(
            "{} commits: consider squashing ('git rebase -i origin/{default_branch}')",
            report.commit_count
        ));
    }

    if report.rebased != TriState::Yes {
        items.push(format!(
            "Rebase on {default_branch} ('git rebase origin/{default_branch}')"
        ));
        items.push("Check again ('git mr status')".to_string());
        return items;
    }

    if report.commits_have_id != TriState::Yes {
        items.push("Add the MR-ID to all commits ('git mr fixmsg')".to_string());
        return items;
    }

    items.extend(
        [
            "Pretty 'git log'? (consider copying MR desc)",
            "Push your changes ('git push --force')",
            "Web UI: comment about your reviewing and testing",
            "Web UI: approve MR",
            "Web UI: adjust MR squash settings (remember the GitLab bug)",
            "Web UI: do (automatic) merge",
        ]
        .map(str::to_string),
    );
    items
}

/// Print the status report of a merge request followed by the checklist.
///
/// `request_id` is `None` when it couldn't be determined; that is an error.
/// Closed and merged requests fail right after the header.
pub fn print_status(
    session: &Session<'_>,
    request_id: Option<u64>,
    no_cache: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let request_id = request_id.ok_or(Error::NoRequest)?;
    let report = StatusReport::collect(session, request_id, no_cache)?;

    report.write_header(out)?;
    match report.status.state {
        LifecycleState::Closed => return Err(Error::Closed),
        LifecycleState::Merged => return Err(Error::Merged),
        LifecycleState::Opened | LifecycleState::Locked | LifecycleState::Other => {}
    }
    report.write_checks(out)?;

    writeln!(out)?;
    writeln!(out, "Checklist:")?;
    for item in checklist(&report) {
        writeln!(out, "* {item}")?;
    }
    Ok(())
}
