use std::collections::HashMap;
use std::io::Write;
use tracing::debug;

use crate::git::{Vcs, validate_git_ref};
use crate::{Error, Result};

/// Suffix marking a commit subject as belonging to a merge request.
pub fn id_suffix(request_id: u64) -> String {
    format!(" (!{request_id})")
}

/// Append ` (!<id>)` to the subject line of a commit message.
///
/// - the subject is left alone if it already ends with the suffix
/// - exactly one blank line separates subject and body
/// - trailing whitespace is stripped from every line, trailing blank lines
///   are dropped, and the result ends with a newline
pub fn append_request_id(message: &str, request_id: u64) -> String {
    let suffix = id_suffix(request_id);
    let mut lines = message.lines().map(str::trim_end);

    let subject = lines.next().unwrap_or_default();
    let mut result = if subject.ends_with(&suffix) {
        subject.to_string()
    } else {
        format!("{subject}{suffix}")
    };
    result.push('\n');

    let body: Vec<&str> = lines.skip_while(|line| line.is_empty()).collect();
    let end = body
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(0, |last| last + 1);
    if end > 0 {
        result.push('\n');
        for line in &body[..end] {
            result.push_str(line);
            result.push('\n');
        }
    }
    result
}

/// Rewrite the commits between `upstream` and HEAD so that every subject
/// carries the merge request ID, then move the current branch to the new
/// tip. Returns the number of rewritten commits.
///
/// Commits that already have the right message and unchanged parents keep
/// their ids. The branch is only moved if it still points at the tip that
/// was rewritten.
pub fn fixmsg(
    vcs: &dyn Vcs,
    upstream: &str,
    request_id: Option<u64>,
    out: &mut dyn Write,
) -> Result<usize> {
    let request_id = request_id.ok_or(Error::NothingCheckedOut)?;
    let branch = vcs.current_branch()?;
    if branch == "HEAD" {
        return Err(Error::DetachedHead);
    }
    validate_git_ref(upstream)?;

    writeln!(out, "Appending '{}' to all commits...", id_suffix(request_id))?;

    let old_tip = vcs.rev_parse("HEAD")?;
    let range = format!("{upstream}..HEAD");
    let listing = vcs.run_checked(&["rev-list", "--reverse", "--topo-order", "--parents", &range])?;

    let mut rewritten: HashMap<String, String> = HashMap::new();
    for line in listing.lines() {
        let mut ids = line.split_whitespace();
        let Some(commit) = ids.next() else {
            continue;
        };
        let old_parents: Vec<&str> = ids.collect();
        let parents_changed = old_parents.iter().any(|p| rewritten.contains_key(*p));

        let message = vcs.commit_message(commit)?;
        let fixed = append_request_id(&message, request_id);
        if !parents_changed && fixed.trim_end() == message.trim_end() {
            debug!("{} already carries the id", commit);
            continue;
        }

        let parents: Vec<String> = old_parents
            .iter()
            .map(|p| rewritten.get(*p).cloned().unwrap_or_else(|| p.to_string()))
            .collect();
        let identity = vcs.commit_identity(commit)?;
        let tree = vcs.rev_parse(&format!("{commit}^{{tree}}"))?;
        let new = vcs.commit_tree(&tree, &parents, &fixed, &identity)?;
        debug!("{} -> {}", commit, new);
        rewritten.insert(commit.to_string(), new);
    }

    let Some(new_tip) = rewritten.get(&old_tip) else {
        writeln!(out, "All commits already carry the MR-ID")?;
        return Ok(0);
    };

    vcs.update_ref(
        &format!("refs/heads/{branch}"),
        new_tip,
        &old_tip,
        &format!("git-mr fixmsg: append (!{request_id})"),
    )?;
    writeln!(out, "Rewrote {} commit(s), {} is now at {}", rewritten.len(), branch, short(new_tip))?;
    Ok(rewritten.len())
}

fn short(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}
