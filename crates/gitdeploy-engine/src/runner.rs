//! Subprocess launch, environment construction, and output capture (§4.4).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use gitdeploy_process::SpawnedProcess;
use gitdeploy_types::{GitRef, Job, RefId};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{info, warn};

use crate::registry::ActiveJob;

pub struct Runner {
    scripts_path: PathBuf,
    log_dir: PathBuf,
}

/// Env vars common to deploy and promote invocations (§6 subprocess contract).
pub fn base_envs(
    job_id: &str,
    git_ref: &GitRef,
    callback_url: &str,
    trusted: bool,
) -> Vec<(String, String)> {
    let mut envs = vec![
        ("GIT_DEPLOY_JOB_ID".to_string(), job_id.to_string()),
        (
            "GIT_DEPLOY_TIMESTAMP".to_string(),
            git_ref.timestamp.to_rfc3339(),
        ),
        ("GIT_DEPLOY_CALLBACK_URL".to_string(), callback_url.to_string()),
        ("GIT_REF_NAME".to_string(), git_ref.ref_name.clone()),
        ("GIT_REF_TYPE".to_string(), git_ref.ref_type.to_string()),
        ("GIT_REPO_ID".to_string(), git_ref.repo_id.clone()),
        ("GIT_REPO_OWNER".to_string(), git_ref.owner.clone()),
        ("GIT_REPO_NAME".to_string(), git_ref.repo.clone()),
        ("GIT_CLONE_URL".to_string(), git_ref.https_url.clone()),
        ("GIT_HTTPS_URL".to_string(), git_ref.https_url.clone()),
        ("GIT_SSH_URL".to_string(), git_ref.ssh_url.clone()),
    ];
    if trusted {
        envs.push(("GIT_REPO_TRUSTED".to_string(), "true".to_string()));
    }
    envs
}

fn log_path(log_dir: &Path, git_ref: &GitRef, ext: &str) -> PathBuf {
    let ts = Utc::now().format("%Y-%m-%d_%H-%M-%S");
    log_dir.join(&git_ref.repo_id).join(format!(
        "{ts}.{}.{}.{ext}",
        git_ref.ref_name,
        git_ref.short_rev()
    ))
}

impl Runner {
    pub fn new(scripts_path: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            scripts_path,
            log_dir,
        }
    }

    /// §4.4 steps 4-8: build the deploy invocation, spawn it, and install the
    /// supervision task. Returns `None` (after logging) if the subprocess
    /// failed to start — no state is installed in that case.
    pub async fn launch(
        &self,
        git_ref: GitRef,
        trusted: bool,
        callback_url: String,
        death_tx: mpsc::Sender<RefId>,
        debacklog_tx: mpsc::Sender<GitRef>,
    ) -> Option<ActiveJob> {
        let ref_id = git_ref.ref_id();
        let job = Job::new(git_ref.clone());
        let job_id = job.id.clone();

        let script = self.scripts_path.join("deploy.sh");
        let args = vec![
            "-i".to_string(),
            "--".to_string(),
            script.display().to_string(),
            job_id.clone(),
            git_ref.ref_name.clone(),
            git_ref.ref_type.to_string(),
            git_ref.owner.clone(),
            git_ref.repo.clone(),
            git_ref.https_url.clone(),
        ];
        let envs = base_envs(&job_id, &git_ref, &callback_url, trusted);
        let text_log = log_path(&self.log_dir, &git_ref, "log");

        let spawned = match SpawnedProcess::spawn("sh", &args, &envs, &text_log).await {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(%ref_id, error = %e, "runner: failed to start deploy subprocess");
                return None;
            }
        };

        info!(%ref_id, rev = %git_ref.rev, "job.started");

        let job = Arc::new(Mutex::new(job));
        let kill = Arc::new(Notify::new());

        spawn_supervision(
            ref_id.clone(),
            job.clone(),
            kill.clone(),
            spawned,
            text_log,
            death_tx,
            debacklog_tx,
            git_ref,
        );

        Some(ActiveJob { job, kill })
    }
}

/// §4.4 step 8: wait for exit (or an early kill request from
/// [`Registry::remove`]), persist the JSON log, clear in-memory logs, and
/// notify the event loop via `deathRow` + `debacklog`. Owns the subprocess
/// exclusively so output pumps can be joined cleanly once it exits.
fn spawn_supervision(
    ref_id: RefId,
    job: Arc<Mutex<Job>>,
    kill: Arc<Notify>,
    mut spawned: SpawnedProcess,
    text_log: PathBuf,
    death_tx: mpsc::Sender<RefId>,
    debacklog_tx: mpsc::Sender<GitRef>,
    git_ref: GitRef,
) {
    tokio::spawn(async move {
        let exit_code = loop {
            tokio::select! {
                biased;
                _ = kill.notified() => {
                    if let Err(e) = spawned.kill().await {
                        warn!(%ref_id, error = %e, "runner: kill failed");
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }

            match spawned.try_wait() {
                Ok(Some(code)) => break code,
                Ok(None) => {}
                Err(e) => {
                    warn!(%ref_id, error = %e, "runner: poll failed, treating as crashed");
                    break -1;
                }
            }
        };

        let logs_handle = spawned.logs();
        spawned.join_output_pumps().await;
        let logs = logs_handle.lock().await.clone();

        let mut guard = job.lock().await;
        guard.logs = logs;
        guard.exit_code = Some(exit_code);
        guard.ended_at = Some(Utc::now());
        guard.flip_id_to_rev();

        let json_log = text_log.with_extension("json");
        match write_job_json(&json_log, &guard) {
            Ok(()) => {
                let _ = std::fs::remove_file(&text_log);
            }
            Err(e) => warn!(%ref_id, error = %e, "runner: failed to persist job json"),
        }

        guard.logs.clear();
        drop(guard);

        info!(%ref_id, "job.finished");
        let _ = death_tx.send(ref_id).await;
        let _ = debacklog_tx.send(git_ref).await;
    });
}

fn write_job_json(path: &Path, job: &Job) -> Result<()> {
    let data = serde_json::to_vec_pretty(job).context("failed to serialize job")?;
    std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}
