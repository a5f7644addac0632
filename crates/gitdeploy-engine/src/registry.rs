//! The three-map state registry: `Pending`, `Active`, `Recent`.
//!
//! Owned by the event loop's task and wrapped in a single `Mutex` by
//! `Engine` (§5): the event loop is the sole writer, with one
//! documented exception — [`Registry::set_report`], the report sink's
//! cross-task write into `Active`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use gitdeploy_types::{EngineError, GitRef, Job, RefId, Report, RevId};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// A running job: the shared `Job` record plus a one-shot notify the
/// supervision task listens on to kill its subprocess early.
#[derive(Clone)]
pub struct ActiveJob {
    pub job: Arc<Mutex<Job>>,
    pub kill: Arc<Notify>,
}

#[derive(Default)]
pub struct Registry {
    pub pending: HashMap<RefId, GitRef>,
    pub active: HashMap<RefId, ActiveJob>,
    pub recent: HashMap<RevId, Job>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&mut self, git_ref: GitRef) {
        self.pending.insert(git_ref.ref_id(), git_ref);
    }

    pub fn take_pending(&mut self, ref_id: &RefId) -> Option<GitRef> {
        self.pending.remove(ref_id)
    }

    pub fn is_pending(&self, ref_id: &RefId) -> bool {
        self.pending.contains_key(ref_id)
    }

    pub fn is_active(&self, ref_id: &RefId) -> bool {
        self.active.contains_key(ref_id)
    }

    pub fn insert_active(&mut self, ref_id: RefId, active_job: ActiveJob) {
        self.active.insert(ref_id, active_job);
    }

    /// §4.6. Move `ref_id` out of `Active` and into `Recent`. If the
    /// subprocess hasn't exited yet, wake the supervision task to kill it
    /// and record a sentinel exit code here — the supervision task remains
    /// the sole authority for the durable on-disk JSON log and will
    /// overwrite it with the real exit code once the kill completes.
    /// A no-op (with a warning) if `ref_id` is not active.
    pub async fn remove(&mut self, ref_id: &RefId) -> Option<Job> {
        let Some(active_job) = self.active.remove(ref_id) else {
            warn!(%ref_id, "remove: no active job for ref_id");
            return None;
        };

        let mut job = active_job.job.lock().await.clone();

        if job.exit_code.is_none() {
            active_job.kill.notify_one();
            job.exit_code = Some(-1);
        }

        job.ended_at = Some(Utc::now());
        let rev_id = job.git_ref.rev_id();
        job.flip_id_to_rev();
        job.logs.clear();

        self.recent.insert(rev_id, job.clone());
        Some(job)
    }

    /// §4.9 `SetReport`. The one legitimate cross-task write into `Active`.
    pub async fn set_report(&self, ref_id: &RefId, report: Report) -> Result<(), EngineError> {
        let active_job = self
            .active
            .get(ref_id)
            .ok_or_else(|| EngineError::NotFound(format!("no active job for {ref_id}")))?;
        let mut job = active_job.job.lock().await;
        job.report = Some(report);
        Ok(())
    }

    /// Snapshot of every job (pending synthesized, active, recent) whose
    /// relevant timestamp is at or after `since`.
    pub async fn jobs_since(&self, since: chrono::DateTime<Utc>) -> Vec<Job> {
        let mut out = Vec::new();

        for git_ref in self.pending.values() {
            if git_ref.timestamp >= since {
                let mut job = Job::new(git_ref.clone());
                job.started_at = git_ref.timestamp;
                out.push(job);
            }
        }

        for active_job in self.active.values() {
            let job = active_job.job.lock().await;
            if job.started_at >= since {
                out.push(job.clone());
            }
        }

        for job in self.recent.values() {
            if job.started_at >= since {
                out.push(job.clone());
            }
        }

        out
    }

    /// Look up a job by its URL-safe `RefId` (active/pending) or `RevId` (recent) form.
    pub async fn find(&self, ref_id: &RefId, rev_id: &RevId) -> Option<Job> {
        if let Some(active_job) = self.active.get(ref_id) {
            return Some(active_job.job.lock().await.clone());
        }
        if let Some(git_ref) = self.pending.get(ref_id) {
            return Some(Job::new(git_ref.clone()));
        }
        self.recent.get(rev_id).cloned()
    }

    /// §4.10: drop `Recent` entries whose `GitRef.Timestamp` predates the cutoff.
    pub fn expire_recent(&mut self, cutoff: chrono::DateTime<Utc>) -> usize {
        let before = self.recent.len();
        self.recent.retain(|_, job| job.git_ref.timestamp >= cutoff);
        before - self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeploy_types::RefType;

    fn sample_ref(ref_name: &str) -> GitRef {
        GitRef {
            repo_id: "git.example.com/owner/repo".to_string(),
            timestamp: Utc::now(),
            https_url: "https://git.example.com/owner/repo.git".to_string(),
            ssh_url: String::new(),
            rev: "12abcdef7890".to_string(),
            r#ref: format!("refs/heads/{ref_name}"),
            ref_type: RefType::Branch,
            ref_name: ref_name.to_string(),
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        }
    }

    #[test]
    fn pending_insert_and_take() {
        let mut registry = Registry::new();
        let git_ref = sample_ref("master");
        registry.insert_pending(git_ref.clone());
        assert!(registry.is_pending(&git_ref.ref_id()));

        let taken = registry.take_pending(&git_ref.ref_id()).expect("present");
        assert_eq!(taken, git_ref);
        assert!(!registry.is_pending(&git_ref.ref_id()));
    }

    #[tokio::test]
    async fn remove_on_absent_ref_id_is_a_noop() {
        let mut registry = Registry::new();
        let ref_id = RefId("git.example.com/owner/repo#master".to_string());
        assert!(registry.remove(&ref_id).await.is_none());
    }

    #[tokio::test]
    async fn set_report_on_unknown_ref_is_not_found() {
        let registry = Registry::new();
        let ref_id = RefId("git.example.com/owner/repo#master".to_string());
        let report = Report {
            name: "suite".to_string(),
            status: "pass".to_string(),
            ..Default::default()
        };
        let err = registry.set_report(&ref_id, report).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn expire_recent_drops_entries_older_than_cutoff() {
        let mut registry = Registry::new();
        let old_ref = sample_ref("old");
        let mut old_job = Job::new(old_ref.clone());
        old_job.git_ref.timestamp = Utc::now() - chrono::Duration::days(2);
        registry.recent.insert(old_ref.rev_id(), old_job);

        let fresh_ref = sample_ref("fresh");
        let fresh_job = Job::new(fresh_ref.clone());
        registry.recent.insert(fresh_ref.rev_id(), fresh_job);

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let removed = registry.expire_recent(cutoff);

        assert_eq!(removed, 1);
        assert_eq!(registry.recent.len(), 1);
        assert!(registry.recent.contains_key(&fresh_ref.rev_id()));
    }

    #[tokio::test]
    async fn jobs_since_includes_pending_synthesized_job() {
        let mut registry = Registry::new();
        let git_ref = sample_ref("master");
        registry.insert_pending(git_ref.clone());

        let jobs = registry
            .jobs_since(Utc::now() - chrono::Duration::hours(1))
            .await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].git_ref, git_ref);
    }
}
