//! Promotion: a single subprocess that occupies two `RefId` slots at once
//! (§4.7).

use std::path::PathBuf;
use std::sync::Arc;

use gitdeploy_process::SpawnedProcess;
use gitdeploy_types::{GitRef, Job, RefId};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{info, warn};

use crate::registry::{ActiveJob, Registry};
use crate::runner::base_envs;

pub struct Promoter {
    scripts_path: PathBuf,
    log_dir: PathBuf,
}

impl Promoter {
    pub fn new(scripts_path: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            scripts_path,
            log_dir,
        }
    }

    /// §4.7: refuse if either `RefId(from)` or `RefId(to)` is already
    /// active, else spawn `promote.sh` and occupy both slots with the same
    /// shared `Job` (`Promote = true`). Both `RefId`s are sent to
    /// death-row together when the subprocess exits.
    pub async fn promote(
        &self,
        registry: &mut Registry,
        git_ref: GitRef,
        promote_to: String,
        callback_url: String,
        death_tx: mpsc::Sender<RefId>,
    ) {
        let from_ref_id = git_ref.ref_id();
        let to_ref = git_ref.with_ref_name(&promote_to);
        let to_ref_id = to_ref.ref_id();

        if registry.is_active(&from_ref_id) {
            warn!(ref_id = %from_ref_id, "promote: refused, source ref already active");
            return;
        }
        if registry.is_active(&to_ref_id) {
            warn!(ref_id = %to_ref_id, "promote: refused, target ref already active");
            return;
        }

        let script = self.scripts_path.join("promote.sh");
        let job_id = git_ref.url_safe_ref_id().0;
        let args = vec![
            "-i".to_string(),
            "--".to_string(),
            script.display().to_string(),
            job_id.clone(),
            promote_to.clone(),
            git_ref.ref_name.clone(),
            git_ref.ref_type.to_string(),
            git_ref.owner.clone(),
            git_ref.repo.clone(),
            git_ref.https_url.clone(),
        ];
        let mut envs = base_envs(&job_id, &git_ref, &callback_url, false);
        envs.push(("GIT_DEPLOY_PROMOTE_TO".to_string(), promote_to.clone()));

        let ts = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let text_log = self.log_dir.join(&git_ref.repo_id).join(format!(
            "{ts}.{}..{}.{}.log",
            git_ref.ref_name,
            promote_to,
            git_ref.short_rev()
        ));

        let spawned = match SpawnedProcess::spawn("sh", &args, &envs, &text_log).await {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(ref_id = %from_ref_id, error = %e, "promote: failed to start promote subprocess");
                return;
            }
        };

        info!(from = %from_ref_id, to = %to_ref_id, %promote_to, "promote.started");

        let mut job = Job::new(git_ref.clone());
        job.promote_to = Some(promote_to.clone());
        job.promote = true;
        let job = Arc::new(Mutex::new(job));
        let kill = Arc::new(Notify::new());

        registry.insert_active(
            from_ref_id.clone(),
            ActiveJob {
                job: job.clone(),
                kill: kill.clone(),
            },
        );
        registry.insert_active(
            to_ref_id.clone(),
            ActiveJob {
                job: job.clone(),
                kill: kill.clone(),
            },
        );

        spawn_supervision(from_ref_id, to_ref_id, job, kill, spawned, text_log, death_tx);
    }
}

fn spawn_supervision(
    from_ref_id: RefId,
    to_ref_id: RefId,
    job: Arc<Mutex<Job>>,
    kill: Arc<Notify>,
    mut spawned: SpawnedProcess,
    text_log: PathBuf,
    death_tx: mpsc::Sender<RefId>,
) {
    tokio::spawn(async move {
        let exit_code = loop {
            tokio::select! {
                biased;
                _ = kill.notified() => {
                    if let Err(e) = spawned.kill().await {
                        warn!(%from_ref_id, error = %e, "promote: kill failed");
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            }

            match spawned.try_wait() {
                Ok(Some(code)) => break code,
                Ok(None) => {}
                Err(e) => {
                    warn!(%from_ref_id, error = %e, "promote: poll failed, treating as crashed");
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
        guard.ended_at = Some(chrono::Utc::now());
        guard.flip_id_to_rev();

        let json_log = text_log.with_extension("json");
        if let Ok(data) = serde_json::to_vec_pretty(&*guard) {
            if std::fs::write(&json_log, data).is_ok() {
                let _ = std::fs::remove_file(&text_log);
            }
        }
        guard.logs.clear();
        drop(guard);

        info!(%from_ref_id, %to_ref_id, "promote.finished");
        let _ = death_tx.send(from_ref_id).await;
        let _ = death_tx.send(to_ref_id).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeploy_types::RefType;
    use tempfile::tempdir;

    fn sample_ref(scripts_dir: &std::path::Path) -> GitRef {
        let script = scripts_dir.join("promote.sh");
        std::fs::write(&script, "#!/bin/sh\necho promoting\nexit 0\n").expect("write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        GitRef {
            repo_id: "git.example.com/owner/repo".to_string(),
            timestamp: chrono::Utc::now(),
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

    #[tokio::test]
    async fn promote_occupies_both_ref_id_slots() {
        let scripts_dir = tempdir().expect("scripts tempdir");
        let log_dir = tempdir().expect("log tempdir");
        let git_ref = sample_ref(scripts_dir.path());

        let promoter = Promoter::new(scripts_dir.path().to_path_buf(), log_dir.path().to_path_buf());
        let mut registry = Registry::new();
        let (death_tx, mut death_rx) = mpsc::channel(2);

        promoter
            .promote(
                &mut registry,
                git_ref.clone(),
                "staging".to_string(),
                "http://localhost/api/local/jobs/x".to_string(),
                death_tx,
            )
            .await;

        let to_ref = git_ref.with_ref_name("staging");
        assert!(registry.is_active(&git_ref.ref_id()));
        assert!(registry.is_active(&to_ref.ref_id()));

        let first = death_rx.recv().await.expect("first death");
        let second = death_rx.recv().await.expect("second death");
        let mut got = vec![first, second];
        got.sort_by(|a, b| a.0.cmp(&b.0));
        let mut want = vec![git_ref.ref_id(), to_ref.ref_id()];
        want.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn promote_refuses_when_source_ref_is_active() {
        let scripts_dir = tempdir().expect("scripts tempdir");
        let log_dir = tempdir().expect("log tempdir");
        let git_ref = sample_ref(scripts_dir.path());

        let promoter = Promoter::new(scripts_dir.path().to_path_buf(), log_dir.path().to_path_buf());
        let mut registry = Registry::new();
        registry.insert_active(
            git_ref.ref_id(),
            ActiveJob {
                job: Arc::new(Mutex::new(Job::new(git_ref.clone()))),
                kill: Arc::new(Notify::new()),
            },
        );

        let (death_tx, _death_rx) = mpsc::channel(2);
        promoter
            .promote(
                &mut registry,
                git_ref.clone(),
                "staging".to_string(),
                "http://localhost".to_string(),
                death_tx,
            )
            .await;

        let to_ref = git_ref.with_ref_name("staging");
        assert!(!registry.is_active(&to_ref.ref_id()));
    }
}
