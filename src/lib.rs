pub mod api;
pub mod checkout;
pub mod cli;
pub mod config;
pub mod fixmsg;
pub mod git;
pub mod origin;
pub mod state;
pub mod status;

#[cfg(test)]
mod testing;

use serde::Deserialize;
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::git::{GitError, Vcs};
use crate::origin::{OriginCoordinates, OriginError};
use crate::state::{RequestDb, StateError};

/// Three-valued check result.
///
/// `Unknown` is used for checks that need a local checkout of the merge
/// request branch and therefore can't be evaluated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Unknown,
    Yes,
    No,
}

impl TriState {
    /// Marker printed in front of a check line in the status report.
    pub fn marker(self) -> &'static str {
        match self {
            TriState::Unknown => "[???]",
            TriState::Yes => "[OK ]",
            TriState::No => "[NOK]",
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { TriState::Yes } else { TriState::No }
    }
}

/// Lifecycle state of a merge request as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Opened,
    Closed,
    Merged,
    Locked,
    #[serde(other)]
    Other,
}

/// Validated merge request information.
///
/// All strings that end up in git command lines (`source_branch`,
/// `source_project_path`, `source_namespace`) have passed the safety
/// patterns in [`status`] before a value of this type is handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatus {
    pub title: String,
    pub source_branch: String,
    pub source_project_path: String,
    pub source_namespace: String,
    pub allow_maintainer_push: bool,
    pub state: LifecycleState,
}

/// Collaborators shared by the status, checkout and fixmsg actions.
pub struct Session<'a> {
    pub vcs: &'a dyn Vcs,
    pub origin: OriginCoordinates,
    pub api: ApiClient<'a>,
    pub db: RequestDb,
    pub default_branch: String,
}

impl Session<'_> {
    /// Remote-tracking ref of the default branch, e.g. `origin/master`.
    pub fn upstream(&self) -> String {
        format!("origin/{}", self.default_branch)
    }

    /// Merge request ID recorded for the currently checked out branch.
    pub fn checked_out(&self) -> Result<Option<u64>> {
        let branch = self.vcs.current_branch()?;
        let id = self
            .db
            .get(&self.origin.host, &self.origin.project_path, &branch)?;
        Ok(id)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to write output")]
    Io(#[from] std::io::Error),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error(
        "can't associate the current branch with a merge request ID. \
         Run 'git mr checkout N' first (N is the MR-ID)."
    )]
    NoRequest,
    #[error("no merge request is currently checked out.\nRun 'git mr checkout N' first.")]
    NothingCheckedOut,
    #[error("HEAD is detached, switch to the merge request branch first")]
    DetachedHead,
    #[error("MR has been closed.")]
    Closed,
    #[error("MR has been merged.")]
    Merged,
    #[error(
        "Remote '{remote}' already exists and has a different URL.\n\n\
         existing: {existing}\n\
         expected: {expected}\n\n\
         If you are fine with the expected URL, use \
         'git mr checkout {request_id} --overwrite-remote' to overwrite it.\n\n\
         git-mr will also set this push URL: {push_url}"
    )]
    RemoteMismatch {
        remote: String,
        existing: String,
        expected: String,
        push_url: String,
        request_id: u64,
    },
    #[error(
        "Branch '{branch}' exists, but points to a different remote.\n\n\
         existing remote: {existing}\n\
         expected remote: {expected}\n\n\
         Consider deleting this branch and trying again:\n\
         $ git checkout {default_branch}\n\
         $ git branch -D {branch}\n\
         $ git mr checkout {request_id}"
    )]
    BranchRemoteMismatch {
        branch: String,
        existing: String,
        expected: String,
        default_branch: String,
        request_id: u64,
    },
    #[error(
        "checkout of '{branch}' failed.\n\
         * Does that branch still exist?\n\
         * Maybe the MR has been closed/merged already?\n\
         * Consider fetching the remote ('git mr checkout {request_id}' without --no-fetch)"
    )]
    CheckoutFailed { branch: String, request_id: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
