//! # Types
//!
//! Core domain types shared by every crate in the workspace: the
//! normalized [`GitRef`] push descriptor, the [`RefId`]/[`RevId`]
//! identifier algebra and their URL-safe forms, the [`Job`] execution
//! record, and the tree-shaped [`Report`].
//!
//! ## Identifier polymorphism
//!
//! `RefId` identifies a *slot* (`RepoID#RefName`) that admits at most
//! one concurrently running job. `RevId` identifies a finished
//! historical execution (`RepoID#Rev`). Modeling them as distinct
//! nominal types means the compiler rejects accidentally using one as
//! a key into the other's map.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Identifies a slot that admits at most one running job: `RepoID#RefName`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(pub String);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a finished historical execution: `RepoID#Rev`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevId(pub String);

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base64url (no padding) encoding of a [`RefId`]; the only form accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlSafeRefId(pub String);

impl fmt::Display for UrlSafeRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base64url (no padding) encoding of a [`RevId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlSafeRevId(pub String);

impl fmt::Display for UrlSafeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RefId {
    pub fn to_url_safe(&self) -> UrlSafeRefId {
        UrlSafeRefId(URL_SAFE_NO_PAD.encode(self.0.as_bytes()))
    }
}

impl RevId {
    pub fn to_url_safe(&self) -> UrlSafeRevId {
        UrlSafeRevId(URL_SAFE_NO_PAD.encode(self.0.as_bytes()))
    }
}

impl UrlSafeRefId {
    /// Decode back to the `RepoID#RefName` string. Fails on malformed base64.
    pub fn decode(&self) -> Result<RefId, EngineError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| EngineError::InvalidInput(format!("invalid URLSafeRefID: {e}")))?;
        String::from_utf8(bytes)
            .map(RefId)
            .map_err(|e| EngineError::InvalidInput(format!("invalid URLSafeRefID: {e}")))
    }
}

impl UrlSafeRevId {
    pub fn decode(&self) -> Result<RevId, EngineError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| EngineError::InvalidInput(format!("invalid URLSafeRevID: {e}")))?;
        String::from_utf8(bytes)
            .map(RevId)
            .map_err(|e| EngineError::InvalidInput(format!("invalid URLSafeRevID: {e}")))
    }
}

/// Canonicalized kind of ref a push targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
    Unknown,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefType::Branch => f.write_str("branch"),
            RefType::Tag => f.write_str("tag"),
            RefType::Unknown => f.write_str("unknown"),
        }
    }
}

/// A normalized push descriptor.
///
/// `GitRef` is expected to already be normalized (see `gitdeploy-git`)
/// by the time it reaches the engine: `repo_id` derived from one of the
/// URLs, `timestamp` defaulted, `ref_type` canonicalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitRef {
    pub repo_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub https_url: String,
    #[serde(default)]
    pub ssh_url: String,
    pub rev: String,
    pub r#ref: String,
    pub ref_type: RefType,
    pub ref_name: String,
    pub owner: String,
    pub repo: String,
}

impl GitRef {
    /// `RepoID#RefName` — identifies the slot.
    pub fn ref_id(&self) -> RefId {
        RefId(format!("{}#{}", self.repo_id, self.ref_name))
    }

    /// `RepoID#Rev` — identifies the historical execution.
    pub fn rev_id(&self) -> RevId {
        RevId(format!("{}#{}", self.repo_id, self.rev))
    }

    pub fn url_safe_ref_id(&self) -> UrlSafeRefId {
        self.ref_id().to_url_safe()
    }

    pub fn url_safe_rev_id(&self) -> UrlSafeRevId {
        self.rev_id().to_url_safe()
    }

    /// First 7 hex characters of `rev`, used in log filenames.
    pub fn short_rev(&self) -> &str {
        let len = self.rev.len().min(7);
        &self.rev[..len]
    }

    /// A ref with the branch name replaced, for computing a promotion's second slot.
    pub fn with_ref_name(&self, ref_name: &str) -> GitRef {
        let mut clone = self.clone();
        clone.ref_name = ref_name.to_string();
        clone.r#ref = match clone.ref_type {
            RefType::Branch => format!("refs/heads/{ref_name}"),
            RefType::Tag => format!("refs/tags/{ref_name}"),
            RefType::Unknown => format!("refs/UNKNOWN/{ref_name}"),
        };
        clone
    }
}

/// One line written to stdout or stderr by a running job's subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: Stream,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Out,
    Err,
}

/// An execution record: pending, running, or finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Equals the URL-safe `RefId` while active, the URL-safe `RevId` after completion.
    pub id: String,
    pub git_ref: GitRef,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub promote_to: Option<String>,
    #[serde(default)]
    pub promote: bool,
}

impl Job {
    pub fn new(git_ref: GitRef) -> Self {
        let id = git_ref.url_safe_ref_id().0;
        Self {
            started_at: Utc::now(),
            ended_at: None,
            id,
            git_ref,
            exit_code: None,
            logs: Vec::new(),
            report: None,
            promote_to: None,
            promote: false,
        }
    }

    /// Flip `id` from the URL-safe `RefId` form to the URL-safe `RevId` form,
    /// as happens exactly once, at death-row processing.
    pub fn flip_id_to_rev(&mut self) {
        self.id = self.git_ref.url_safe_rev_id().0;
    }
}

/// Tree-shaped structured result reported by a running job, or derived
/// from a pytest JSON report by an external adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    /// Free-form status string (`pass`, `fail`, `passed`, `failed`, ...).
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub results: Vec<Report>,
}

/// Domain error kinds callers match on at the admin/intake boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient filesystem failure: {0}")]
    TransientFs(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("engine already initialized")]
    DoubleInit,
}

/// Deserialize a `Duration` from either a humantime string or a u64 of milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a `Duration` as milliseconds so it round-trips with [`deserialize_duration`].
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ref() -> GitRef {
        GitRef {
            repo_id: "git.example.com/owner/repo".to_string(),
            timestamp: Utc::now(),
            https_url: "https://git.example.com/owner/repo.git".to_string(),
            ssh_url: String::new(),
            rev: "12abcdef7890".to_string(),
            r#ref: "refs/heads/master".to_string(),
            ref_type: RefType::Branch,
            ref_name: "master".to_string(),
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        }
    }

    #[test]
    fn ref_id_joins_repo_and_ref_name() {
        let r = sample_ref();
        assert_eq!(r.ref_id().0, "git.example.com/owner/repo#master");
    }

    #[test]
    fn rev_id_joins_repo_and_rev() {
        let r = sample_ref();
        assert_eq!(r.rev_id().0, "git.example.com/owner/repo#12abcdef7890");
    }

    #[test]
    fn url_safe_round_trips_through_decode() {
        let r = sample_ref();
        let encoded = r.url_safe_ref_id();
        let decoded = encoded.decode().expect("decode");
        assert_eq!(decoded, r.ref_id());
    }

    #[test]
    fn url_safe_form_has_no_padding_characters() {
        let r = sample_ref();
        assert!(!r.url_safe_ref_id().0.contains('='));
    }

    #[test]
    fn job_starts_with_url_safe_ref_id() {
        let r = sample_ref();
        let job = Job::new(r.clone());
        assert_eq!(job.id, r.url_safe_ref_id().0);
    }

    #[test]
    fn flip_id_to_rev_switches_identifier_form() {
        let r = sample_ref();
        let mut job = Job::new(r.clone());
        job.flip_id_to_rev();
        assert_eq!(job.id, r.url_safe_rev_id().0);
    }

    #[test]
    fn with_ref_name_rewrites_ref_path() {
        let r = sample_ref();
        let staging = r.with_ref_name("staging");
        assert_eq!(staging.ref_name, "staging");
        assert_eq!(staging.r#ref, "refs/heads/staging");
    }

    #[test]
    fn short_rev_truncates_to_seven_chars() {
        let r = sample_ref();
        assert_eq!(r.short_rev(), "12abcde");
    }

    #[test]
    fn deserialize_duration_accepts_humantime_string() {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(deserialize_with = "deserialize_duration")] Duration);
        let w: Wrapper = serde_json::from_str("\"2s\"").expect("parse");
        assert_eq!(w.0, Duration::from_secs(2));
    }

    #[test]
    fn deserialize_duration_accepts_milliseconds() {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(deserialize_with = "deserialize_duration")] Duration);
        let w: Wrapper = serde_json::from_str("1500").expect("parse");
        assert_eq!(w.0, Duration::from_millis(1500));
    }

    #[test]
    fn report_defaults_to_empty_results() {
        let r = Report {
            name: "suite".to_string(),
            status: "pass".to_string(),
            ..Default::default()
        };
        assert!(r.results.is_empty());
    }
}
