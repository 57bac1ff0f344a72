//! In-memory stand-ins for git and the HTTP transport used by unit tests.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use tempfile::TempDir;

use crate::Session;
use crate::api::{self, ApiClient, ApiError, Transport};
use crate::git::{self, GitOutput, Vcs};
use crate::state::RequestDb;

pub const ORIGIN_URL: &str = "https://gitlab.com/pmOS/pmaports.git";
pub const API: &str = "https://gitlab.com/api/v4";

/// Simulated repository state.
#[derive(Debug, Default)]
pub struct RepoState {
    /// name -> (fetch URL, push URL)
    pub remotes: BTreeMap<String, (String, String)>,
    /// local branch -> upstream remote
    pub branches: BTreeMap<String, Option<String>>,
    pub current: String,
    /// `remote/branch` refs that exist on the server
    pub remote_branches: BTreeSet<String>,
    pub fetched: BTreeSet<String>,
    /// (id, subject) of commits on HEAD but not on the default branch, newest first
    pub ahead: Vec<(String, String)>,
    pub behind: usize,
    pub dirty: bool,
}

/// A [`Vcs`] that interprets the git command lines issued by the engines
/// against a [`RepoState`] and records every command.
pub struct FakeGit {
    state: RefCell<RepoState>,
    log: RefCell<Vec<String>>,
}

impl FakeGit {
    /// Repository on `master` with an `origin` remote pointing at [`ORIGIN_URL`].
    pub fn new() -> Self {
        let mut state = RepoState {
            current: "master".to_string(),
            ..RepoState::default()
        };
        state
            .branches
            .insert("master".to_string(), Some("origin".to_string()));
        state.remotes.insert(
            "origin".to_string(),
            (ORIGIN_URL.to_string(), ORIGIN_URL.to_string()),
        );
        state.fetched.insert("origin".to_string());
        Self {
            state: RefCell::new(state),
            log: RefCell::new(Vec::new()),
        }
    }

    /// Remote configured and fetched before; replaces `origin` if named so.
    pub fn with_remote(self, name: &str, url: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state
                .remotes
                .insert(name.to_string(), (url.to_string(), url.to_string()));
            state.fetched.insert(name.to_string());
        }
        self
    }

    pub fn without_remote(self, name: &str) -> Self {
        self.state.borrow_mut().remotes.remove(name);
        self
    }

    pub fn with_branch(self, name: &str, upstream: Option<&str>) -> Self {
        self.state
            .borrow_mut()
            .branches
            .insert(name.to_string(), upstream.map(str::to_string));
        self
    }

    pub fn with_remote_branch(self, remote_ref: &str) -> Self {
        self.state
            .borrow_mut()
            .remote_branches
            .insert(remote_ref.to_string());
        self
    }

    pub fn on_branch(self, name: &str) -> Self {
        self.state.borrow_mut().current = name.to_string();
        self
    }

    /// Commits ahead of the default branch, newest first.
    pub fn with_commits(self, subjects: &[&str]) -> Self {
        self.state.borrow_mut().ahead = subjects
            .iter()
            .enumerate()
            .map(|(i, subject)| (format!("c0ffee{i:02}"), subject.to_string()))
            .collect();
        self
    }

    pub fn behind(self, count: usize) -> Self {
        self.state.borrow_mut().behind = count;
        self
    }

    pub fn dirty(self) -> Self {
        self.state.borrow_mut().dirty = true;
        self
    }

    pub fn state(&self) -> Ref<'_, RepoState> {
        self.state.borrow()
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.log.borrow().iter().any(|c| c == command)
    }

    fn interpret(&self, args: &[&str]) -> Option<String> {
        let mut state = self.state.borrow_mut();
        match args {
            ["remote", "get-url", name] => state.remotes.get(*name).map(|(url, _)| url.clone()),
            ["remote", "add", name, url] => {
                if state.remotes.contains_key(*name) {
                    return None;
                }
                state
                    .remotes
                    .insert(name.to_string(), (url.to_string(), url.to_string()));
                Some(String::new())
            }
            ["remote", "set-url", "--push", name, url] => {
                let remote = state.remotes.get_mut(*name)?;
                remote.1 = url.to_string();
                Some(String::new())
            }
            ["remote", "set-url", name, url] => {
                let remote = state.remotes.get_mut(*name)?;
                remote.0 = url.to_string();
                Some(String::new())
            }
            ["fetch", name] => {
                if !state.remotes.contains_key(*name) {
                    return None;
                }
                state.fetched.insert(name.to_string());
                Some(String::new())
            }
            ["for-each-ref", "refs/heads", "--format", _] => {
                Some(state.branches.keys().cloned().collect::<Vec<_>>().join("\n"))
            }
            ["rev-parse", "--abbrev-ref", "HEAD"] => Some(state.current.clone()),
            ["rev-parse", "--abbrev-ref", spec] => {
                let branch = spec.strip_suffix("@{u}")?;
                let remote = state.branches.get(branch)?.clone()?;
                Some(format!("{remote}/{branch}"))
            }
            ["checkout", "-b", name, start] => {
                let (remote, _) = start.split_once('/')?;
                if !state.fetched.contains(remote) || !state.remote_branches.contains(*start) {
                    return None;
                }
                state
                    .branches
                    .insert(name.to_string(), Some(remote.to_string()));
                state.current = name.to_string();
                Some(String::new())
            }
            ["checkout", name] => {
                if !state.branches.contains_key(*name) {
                    return None;
                }
                state.current = name.to_string();
                Some(String::new())
            }
            ["rev-list", range] if range.ends_with("..HEAD") => Some(
                state
                    .ahead
                    .iter()
                    .map(|(id, _)| id.clone())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            ["rev-list", range] if range.starts_with("HEAD..") => Some(
                (0..state.behind)
                    .map(|i| format!("beef{i:04}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            ["status", "--porcelain"] => {
                let porcelain = if state.dirty { " M file.txt" } else { "" };
                Some(porcelain.to_string())
            }
            ["show", "-s", "--format=%s", id] => state
                .ahead
                .iter()
                .find(|(commit, _)| commit.as_str() == *id)
                .map(|(_, subject)| subject.clone()),
            _ => None,
        }
    }
}

impl Vcs for FakeGit {
    fn exec(&self, args: &[&str], _input: Option<&str>, _env: &[(&str, &str)]) -> git::Result<GitOutput> {
        self.log.borrow_mut().push(args.join(" "));
        Ok(match self.interpret(args) {
            Some(stdout) => GitOutput {
                success: true,
                stdout,
                stderr: String::new(),
            },
            None => GitOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("fatal: fake git can't do '{}'", args.join(" ")),
            },
        })
    }
}

/// [`Transport`] serving canned bodies and counting requests.
pub struct FakeTransport {
    responses: HashMap<String, String>,
    calls: Cell<usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Cell::new(0),
        }
    }

    pub fn with_response(mut self, url: &str, body: &str) -> Self {
        self.responses.insert(url.to_string(), body.to_string());
        self
    }

    /// Merge request `request_id` of `pmOS/pmaports` coming from the
    /// project `source_path` in `namespace`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_request(
        self,
        request_id: u64,
        title: &str,
        branch: &str,
        state: &str,
        allow_push: Option<bool>,
        source_path: &str,
        namespace: &str,
    ) -> Self {
        let request = serde_json::json!({
            "iid": request_id,
            "title": title,
            "source_branch": branch,
            "source_project_id": 1000 + request_id,
            "state": state,
            "allow_maintainer_to_push": allow_push,
            "web_url": format!("https://gitlab.com/pmOS/pmaports/merge_requests/{request_id}"),
        });
        let project = serde_json::json!({
            "id": 1000 + request_id,
            "path_with_namespace": source_path,
            "namespace": { "name": namespace, "path": namespace },
        });
        self.with_response(
            &format!("{API}/projects/pmOS%2Fpmaports/merge_requests/{request_id}"),
            &request.to_string(),
        )
        .with_response(
            &format!("{API}/projects/{}", 1000 + request_id),
            &project.to_string(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Transport for FakeTransport {
    fn get(&self, url: &str, sink: &mut dyn Write) -> api::Result<()> {
        self.calls.set(self.calls.get() + 1);
        let body = self.responses.get(url).ok_or_else(|| ApiError::Http {
            url: url.to_string(),
            message: "404 Not Found".to_string(),
        })?;
        sink.write_all(body.as_bytes())?;
        Ok(())
    }
}

/// Fakes plus a temporary directory for the cache and the request database.
pub struct TestEnv {
    pub dir: TempDir,
    pub git: FakeGit,
    pub transport: FakeTransport,
}

impl TestEnv {
    pub fn new(git: FakeGit, transport: FakeTransport) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            git,
            transport,
        }
    }

    pub fn session(&self) -> Session<'_> {
        let origin = crate::origin::resolve(&self.git).unwrap();
        Session {
            vcs: &self.git,
            api: ApiClient::new(API, self.dir.path().join("http"), &self.transport),
            origin,
            db: RequestDb::open(&self.dir.path().join("requests.db")).unwrap(),
            default_branch: "master".to_string(),
        }
    }
}
