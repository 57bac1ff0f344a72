use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("invalid git ref: {0}")]
    InvalidRef(String),
    #[error("unexpected git output: {0}")]
    UnexpectedOutput(String),
    #[error("git output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("failed to run git")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Author and committer of a commit, in the form git accepts through
/// `GIT_AUTHOR_*` / `GIT_COMMITTER_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub author_name: String,
    pub author_email: String,
    pub author_date: String,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date: String,
}

impl CommitIdentity {
    fn env(&self) -> [(&str, &str); 6] {
        [
            ("GIT_AUTHOR_NAME", self.author_name.as_str()),
            ("GIT_AUTHOR_EMAIL", self.author_email.as_str()),
            ("GIT_AUTHOR_DATE", self.author_date.as_str()),
            ("GIT_COMMITTER_NAME", self.committer_name.as_str()),
            ("GIT_COMMITTER_EMAIL", self.committer_email.as_str()),
            ("GIT_COMMITTER_DATE", self.committer_date.as_str()),
        ]
    }
}

/// Access to the repository of the working directory.
///
/// Implementors only provide [`Vcs::exec`]; every higher level query is
/// expressed as a git command line on top of it, so all callers go through
/// one choke point that logs the commands being run.
pub trait Vcs {
    /// Run git with `args`, optionally feeding `input` on stdin and setting
    /// extra environment variables.
    fn exec(&self, args: &[&str], input: Option<&str>, env: &[(&str, &str)]) -> Result<GitOutput>;

    /// Run a git command and return its output with trailing whitespace
    /// removed. On a non-zero exit, fails when `check` is set and returns
    /// `None` otherwise.
    fn run(&self, args: &[&str], check: bool) -> Result<Option<String>> {
        let output = self.exec(args, None, &[])?;
        if output.success {
            Ok(Some(output.stdout.trim_end().to_string()))
        } else if check {
            Err(GitError::CommandFailed(format!(
                "git {}: {}",
                args.join(" "),
                output.stderr.trim()
            )))
        } else {
            Ok(None)
        }
    }

    /// Like [`Vcs::run`] with `check` set.
    fn run_checked(&self, args: &[&str]) -> Result<String> {
        self.run(args, true).map(Option::unwrap_or_default)
    }

    /// URL of a remote, `None` if it isn't configured (or there is no repository).
    fn remote_url(&self, name: &str) -> Result<Option<String>> {
        self.run(&["remote", "get-url", name], false)
    }

    /// Current branch name, `"HEAD"` when detached.
    fn current_branch(&self) -> Result<String> {
        self.run_checked(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn local_branches(&self) -> Result<Vec<String>> {
        let output =
            self.run_checked(&["for-each-ref", "refs/heads", "--format", "%(refname:short)"])?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// Name of the remote the branch's upstream lives on, if it has one.
    fn branch_upstream_remote(&self, branch: &str) -> Result<Option<String>> {
        let spec = format!("{branch}@{{u}}");
        let upstream = self.run(&["rev-parse", "--abbrev-ref", &spec], false)?;
        Ok(upstream
            .filter(|upstream| !upstream.is_empty())
            .and_then(|upstream| upstream.split('/').next().map(str::to_string)))
    }

    /// Commits reachable from `head` but not from `base`, newest first.
    fn commits_ahead(&self, base: &str, head: &str) -> Result<Vec<String>> {
        validate_git_ref(base)?;
        validate_git_ref(head)?;
        let range = format!("{base}..{head}");
        let output = self.run_checked(&["rev-list", &range])?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn is_working_tree_clean(&self) -> Result<bool> {
        Ok(self.run_checked(&["status", "--porcelain"])?.is_empty())
    }

    fn commit_subject(&self, id: &str) -> Result<String> {
        validate_git_ref(id)?;
        self.run_checked(&["show", "-s", "--format=%s", id])
    }

    /// Full commit message (subject and body).
    fn commit_message(&self, id: &str) -> Result<String> {
        validate_git_ref(id)?;
        self.run_checked(&["log", "-1", "--format=%B", id])
    }

    fn commit_identity(&self, id: &str) -> Result<CommitIdentity> {
        validate_git_ref(id)?;
        let output = self.run_checked(&[
            "show",
            "-s",
            "--date=raw",
            "--format=%an%x00%ae%x00%ad%x00%cn%x00%ce%x00%cd",
            id,
        ])?;
        let fields: Vec<&str> = output.split('\0').collect();
        if fields.len() != 6 {
            return Err(GitError::UnexpectedOutput(format!(
                "identity of {id}: {output:?}"
            )));
        }
        Ok(CommitIdentity {
            author_name: fields[0].to_string(),
            author_email: fields[1].to_string(),
            author_date: fields[2].to_string(),
            committer_name: fields[3].to_string(),
            committer_email: fields[4].to_string(),
            committer_date: fields[5].to_string(),
        })
    }

    fn rev_parse(&self, spec: &str) -> Result<String> {
        self.run_checked(&["rev-parse", "--verify", spec])
    }

    /// Create a commit object and return its id. Does not move any ref.
    fn commit_tree(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
        identity: &CommitIdentity,
    ) -> Result<String> {
        let mut args = vec!["commit-tree", tree];
        for parent in parents {
            args.push("-p");
            args.push(parent);
        }
        let output = self.exec(&args, Some(message), &identity.env())?;
        if !output.success {
            return Err(GitError::CommandFailed(format!(
                "git commit-tree: {}",
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Point `refname` at `new`, failing if it no longer points at `old`.
    fn update_ref(&self, refname: &str, new: &str, old: &str, reason: &str) -> Result<()> {
        self.run_checked(&["update-ref", "-m", reason, refname, new, old])?;
        Ok(())
    }
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct Git {
    workdir: Option<PathBuf>,
}

impl Git {
    /// Operate on the repository of the process working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operate on the repository containing `path`.
    pub fn in_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(path.into()),
        }
    }
}

impl Vcs for Git {
    fn exec(&self, args: &[&str], input: Option<&str>, env: &[(&str, &str)]) -> Result<GitOutput> {
        debug!("+ git {}", args.join(" "));

        let mut command = Command::new("git");
        command.args(args).envs(env.iter().copied());
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let output = match input {
            None => command.stdin(Stdio::null()).output()?,
            Some(text) => {
                let mut child = command
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;
                let written = match child.stdin.take() {
                    Some(mut stdin) => stdin.write_all(text.as_bytes()),
                    None => Ok(()),
                };
                let output = child.wait_with_output()?;
                written?;
                output
            }
        };

        let result = GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8(output.stdout)?,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.stdout.is_empty() {
            debug!("{}", result.stdout.trim_end());
        }
        if !result.success {
            debug!("exit status {}: {}", output.status, result.stderr.trim_end());
        }
        Ok(result)
    }
}

/// Validate a ref before it goes onto a git command line.
///
/// Allows: alphanumeric, dash, underscore, slash, dot, tilde, caret, @, braces.
/// A leading dash is rejected so a ref can never be parsed as an option.
pub fn validate_git_ref(ref_str: &str) -> Result<()> {
    if ref_str.is_empty() {
        return Err(GitError::InvalidRef("Empty git ref".to_string()));
    }

    if ref_str.starts_with('-') {
        return Err(GitError::InvalidRef(format!(
            "git ref starts with a dash: '{}'",
            ref_str
        )));
    }

    for ch in ref_str.chars() {
        if !ch.is_ascii_alphanumeric()
            && !matches!(ch, '-' | '_' | '/' | '.' | '~' | '^' | '@' | '{' | '}')
        {
            return Err(GitError::InvalidRef(format!(
                "Invalid character in git ref: '{}'",
                ch
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, Git) {
        let dir = tempfile::tempdir().unwrap();
        let git = Git::in_dir(dir.path());
        git.run_checked(&["init", "-q"]).unwrap();
        git.run_checked(&["symbolic-ref", "HEAD", "refs/heads/master"])
            .unwrap();
        git.run_checked(&["config", "user.name", "Test User"]).unwrap();
        git.run_checked(&["config", "user.email", "test@example.org"])
            .unwrap();
        git.run_checked(&["config", "commit.gpgsign", "false"])
            .unwrap();
        (dir, git)
    }

    fn commit(dir: &std::path::Path, git: &Git, file: &str, message: &str) {
        std::fs::write(dir.join(file), message).unwrap();
        git.run_checked(&["add", file]).unwrap();
        git.run_checked(&["commit", "-q", "-m", message]).unwrap();
    }

    #[test]
    fn test_validate_git_ref_valid() {
        assert!(validate_git_ref("master").is_ok());
        assert!(validate_git_ref("feature/foo").is_ok());
        assert!(validate_git_ref("HEAD~1").is_ok());
        assert!(validate_git_ref("origin/master").is_ok());
        assert!(validate_git_ref("HEAD^").is_ok());
        assert!(validate_git_ref("mybranch@{u}").is_ok());
        assert!(validate_git_ref("0a1b2c3d").is_ok());
    }

    #[test]
    fn test_validate_git_ref_invalid() {
        assert!(validate_git_ref(";rm -rf").is_err());
        assert!(validate_git_ref("$(cmd)").is_err());
        assert!(validate_git_ref("|pipe").is_err());
        assert!(validate_git_ref("foo bar").is_err());
        assert!(validate_git_ref("foo\nbar").is_err());
        assert!(validate_git_ref("--upload-pack=evil").is_err());
    }

    #[test]
    fn test_validate_git_ref_empty() {
        assert!(validate_git_ref("").is_err());
    }

    #[test]
    fn run_unchecked_failure_is_none() {
        let (_dir, git) = init_repo();
        assert_eq!(git.remote_url("origin").unwrap(), None);
        assert!(git.run(&["rev-parse", "--verify", "nope"], true).is_err());
    }

    #[test]
    fn unread_input_reports_broken_pipe() {
        let (_dir, git) = init_repo();
        let input = "x".repeat(1 << 20);

        let err = git.exec(&["version"], Some(&input), &[]).unwrap_err();
        match err {
            GitError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(git.run_checked(&["version"]).unwrap().starts_with("git version"));
    }

    #[test]
    fn queries_on_fresh_repository() {
        let (dir, git) = init_repo();
        commit(dir.path(), &git, "a.txt", "First commit");

        assert_eq!(git.current_branch().unwrap(), "master");
        assert_eq!(git.local_branches().unwrap(), vec!["master".to_string()]);
        assert!(git.is_working_tree_clean().unwrap());
        assert_eq!(git.branch_upstream_remote("master").unwrap(), None);

        std::fs::write(dir.path().join("untracked.txt"), "x").unwrap();
        assert!(!git.is_working_tree_clean().unwrap());
    }

    #[test]
    fn commits_ahead_and_subjects() {
        let (dir, git) = init_repo();
        commit(dir.path(), &git, "a.txt", "Base");
        git.run_checked(&["update-ref", "refs/remotes/origin/master", "HEAD"])
            .unwrap();
        commit(dir.path(), &git, "b.txt", "Second");
        commit(dir.path(), &git, "c.txt", "Third");

        let ahead = git.commits_ahead("origin/master", "HEAD").unwrap();
        assert_eq!(ahead.len(), 2);
        assert_eq!(git.commit_subject(&ahead[0]).unwrap(), "Third");
        assert_eq!(git.commit_subject(&ahead[1]).unwrap(), "Second");
        assert!(git.commits_ahead("HEAD", "origin/master").unwrap().is_empty());
    }

    #[test]
    fn commit_tree_preserves_identity() {
        let (dir, git) = init_repo();
        commit(dir.path(), &git, "a.txt", "Base");

        let identity = git.commit_identity("HEAD").unwrap();
        assert_eq!(identity.author_name, "Test User");
        assert_eq!(identity.author_email, "test@example.org");

        let tree = git.rev_parse("HEAD^{tree}").unwrap();
        let id = git
            .commit_tree(&tree, &[], "Rewritten\n", &identity)
            .unwrap();
        assert_eq!(git.commit_subject(&id).unwrap(), "Rewritten");
        assert_eq!(git.commit_identity(&id).unwrap(), identity);
    }
}
