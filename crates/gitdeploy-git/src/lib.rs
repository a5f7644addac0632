//! `GitRef` normalization and repo-trust matching.
//!
//! This crate turns whatever a provider adapter decoded out of a
//! webhook payload into a normalized [`gitdeploy_types::GitRef`], and
//! answers whether a given repo is trusted per the configured repo
//! list (§4.11).

use chrono::Utc;
use gitdeploy_types::{GitRef, RefType};

/// The raw fields a provider adapter can supply before normalization.
///
/// Adapters are free to populate either `ref_name`/`ref_type` or the
/// shorthand `branch`/`tag` fields; whichever is present wins.
#[derive(Debug, Clone, Default)]
pub struct RawRef {
    pub https_url: String,
    pub ssh_url: String,
    pub rev: String,
    pub r#ref: String,
    pub ref_type: String,
    pub ref_name: String,
    pub branch: String,
    pub tag: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub timestamp: Option<chrono::DateTime<Utc>>,
}

/// Normalize a raw ref into a [`GitRef`].
///
/// Returns `None` when both `https_url` and `ssh_url` are empty — such
/// a ref is invalid and must never reach the engine.
pub fn normalize(raw: RawRef) -> Option<GitRef> {
    if raw.https_url.is_empty() && raw.ssh_url.is_empty() {
        return None;
    }

    let repo_id = derive_repo_id(&raw.https_url, &raw.ssh_url);

    let ref_name = if !raw.ref_name.is_empty() {
        raw.ref_name.clone()
    } else if !raw.branch.is_empty() {
        raw.branch.clone()
    } else if !raw.tag.is_empty() {
        raw.tag.clone()
    } else {
        String::new()
    };

    let ref_type = canonicalize_ref_type(&raw, &ref_name);

    let r#ref = if !raw.r#ref.is_empty() {
        raw.r#ref.clone()
    } else {
        match ref_type {
            RefType::Branch => format!("refs/heads/{ref_name}"),
            RefType::Tag => format!("refs/tags/{ref_name}"),
            RefType::Unknown => format!("refs/UNKNOWN/{ref_name}"),
        }
    };

    Some(GitRef {
        repo_id,
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
        https_url: raw.https_url,
        ssh_url: raw.ssh_url,
        rev: raw.rev,
        r#ref,
        ref_type,
        ref_name,
        owner: raw.repo_owner,
        repo: raw.repo_name,
    })
}

fn canonicalize_ref_type(raw: &RawRef, ref_name: &str) -> RefType {
    let lowered = raw.ref_type.to_lowercase();
    match lowered.as_str() {
        "tags" | "tag" => RefType::Tag,
        "heads" | "branch" => RefType::Branch,
        _ if !raw.tag.is_empty() && raw.tag == ref_name => RefType::Tag,
        _ if !raw.branch.is_empty() && raw.branch == ref_name => RefType::Branch,
        _ => RefType::Unknown,
    }
}

/// Derive `RepoID`: lower-cased host/owner/repo with no scheme or `.git` suffix.
///
/// Prefers `https_url`; falls back to `ssh_url`, including the
/// `git@host:owner/repo.git` scp-like form.
pub fn derive_repo_id(https_url: &str, ssh_url: &str) -> String {
    let raw = if !https_url.is_empty() {
        https_url
    } else {
        ssh_url
    };

    let mut s = raw.to_string();

    for scheme in ["https://", "http://", "git://", "ssh://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
            break;
        }
    }

    // scp-like syntax: user@host:path -> host/path
    if let Some(at_idx) = s.find('@')
        && let Some(colon_idx) = s[at_idx..].find(':')
    {
        let colon_idx = at_idx + colon_idx;
        s = format!("{}/{}", &s[at_idx + 1..colon_idx], &s[colon_idx + 1..]);
    }

    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.to_string();
    }
    s = s.trim_end_matches('/').to_string();

    s.to_lowercase()
}

/// Whether `repo_id` matches the configured, whitespace/comma tokenized
/// trust list. Matching is case-insensitive; a trailing `*` on a token
/// is a prefix wildcard; the first matching token wins (result is the
/// same regardless, since matching is boolean).
pub fn is_trusted(repo_id: &str, repo_list: &str) -> bool {
    let repo_id = repo_id.to_lowercase();
    repo_list
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .any(|tok| {
            let tok = tok.to_lowercase();
            match tok.strip_suffix('*') {
                Some(prefix) => repo_id.starts_with(prefix),
                None => repo_id == tok,
            }
        })
}
