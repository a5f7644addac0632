//! §4.5 event loop: the single task that owns the registry, the
//! debounce-timer map, and the backlog, reading from the channel set the
//! design calls `intake`, `debacklog`, `debounced`, `deathRow`,
//! `promotions`, the expiry ticker, and `done`.
//!
//! One Tokio task multiplexes every channel with `select!` so the registry
//! never needs more than a short-lived lock per message.

use std::sync::Arc;

use gitdeploy_config::Config;
use gitdeploy_types::{GitRef, Job, RefId, Report, UrlSafeRefId};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{info, warn};

use crate::backlog::Backlog;
use crate::debounce::Debouncer;
use crate::expiry;
use crate::promote::Promoter;
use crate::registry::Registry;
use crate::runner::Runner;

/// An admin-initiated promotion request (§4.7).
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    pub git_ref: GitRef,
    pub promote_to: String,
}

/// The set of handles a caller (the admin HTTP layer, a webhook adapter)
/// needs to drive the engine without touching its internals.
pub struct EngineHandle {
    pub registry: Arc<Mutex<Registry>>,
    pub intake_tx: mpsc::Sender<GitRef>,
    pub promotions_tx: mpsc::Sender<PromotionRequest>,
    /// §4.8: admin kill requests. Forwarded to `deathRow` when the ref is
    /// active; dropped directly (no subprocess to kill) when only pending.
    pub kill_tx: mpsc::Sender<RefId>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl EngineHandle {
    /// §4.5 `done`: stop the ticker and exit the loop. A no-op if already
    /// called once (the sender is consumed).
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    pub async fn jobs_since(&self, since: chrono::DateTime<chrono::Utc>) -> Vec<Job> {
        self.registry.lock().await.jobs_since(since).await
    }

    pub async fn find(&self, ref_id: &RefId, rev_id: &gitdeploy_types::RevId) -> Option<Job> {
        self.registry.lock().await.find(ref_id, rev_id).await
    }

    pub async fn set_report(
        &self,
        url_safe_ref_id: &UrlSafeRefId,
        report: Report,
    ) -> Result<(), gitdeploy_types::EngineError> {
        crate::report::set_report(&*self.registry.lock().await, url_safe_ref_id, report).await
    }
}

struct Engine {
    registry: Arc<Mutex<Registry>>,
    backlog: Backlog,
    debouncer: Debouncer,
    runner: Runner,
    promoter: Promoter,
    config: Config,
    death_tx: mpsc::Sender<RefId>,
    debacklog_tx: mpsc::Sender<GitRef>,
    debounced_tx: mpsc::Sender<RefId>,
}

/// Start the event loop as a background task. Seeds `Recent` from a
/// startup walk of `config.log_dir` before the loop begins reading
/// channels (§4.10).
pub fn spawn(config: Config) -> (EngineHandle, tokio::task::JoinHandle<()>) {
    let recovered = expiry::scan_log_dir(&config.log_dir, config.expired_log_age, config.stale_log_age);
    let mut initial_registry = Registry::new();
    let recovered_count = recovered.len();
    for job in recovered {
        initial_registry.recent.insert(job.git_ref.rev_id(), job);
    }
    if recovered_count > 0 {
        info!(recovered = recovered_count, "engine.recovered_logs");
    }
    let registry = Arc::new(Mutex::new(initial_registry));

    let backlog = Backlog::new(config.tmp_dir.clone());
    let debouncer = Debouncer::new(config.debounce_delay);
    let runner = Runner::new(config.scripts_path.clone(), config.log_dir.clone());
    let promoter = Promoter::new(config.scripts_path.clone(), config.log_dir.clone());

    let (intake_tx, intake_rx) = mpsc::channel(1);
    let (debacklog_tx, debacklog_rx) = mpsc::channel(1);
    let (debounced_tx, debounced_rx) = mpsc::channel(1);
    let (death_tx, death_rx) = mpsc::channel(1);
    let (promotions_tx, promotions_rx) = mpsc::channel(1);
    let (kill_tx, kill_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let engine = Engine {
        registry: registry.clone(),
        backlog,
        debouncer,
        runner,
        promoter,
        config,
        death_tx,
        debacklog_tx,
        debounced_tx,
    };

    let join = tokio::spawn(engine.run(
        intake_rx,
        debacklog_rx,
        debounced_rx,
        death_rx,
        promotions_rx,
        kill_rx,
        shutdown_rx,
    ));

    let handle = EngineHandle {
        registry,
        intake_tx,
        promotions_tx,
        kill_tx,
        shutdown_tx: Some(shutdown_tx),
    };

    (handle, join)
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    async fn run(
        mut self,
        mut intake_rx: mpsc::Receiver<GitRef>,
        mut debacklog_rx: mpsc::Receiver<GitRef>,
        mut debounced_rx: mpsc::Receiver<RefId>,
        mut death_rx: mpsc::Receiver<RefId>,
        mut promotions_rx: mpsc::Receiver<PromotionRequest>,
        mut kill_rx: mpsc::Receiver<RefId>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.config.stale_job_age / 2);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("engine.started");
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    info!("engine.stopped");
                    break;
                }
                Some(git_ref) = intake_rx.recv() => {
                    self.on_intake(git_ref).await;
                }
                Some(git_ref) = debacklog_rx.recv() => {
                    self.on_debacklog(git_ref).await;
                }
                Some(ref_id) = debounced_rx.recv() => {
                    self.on_debounced(ref_id).await;
                }
                Some(ref_id) = death_rx.recv() => {
                    self.on_death(ref_id).await;
                }
                Some(req) = promotions_rx.recv() => {
                    self.on_promotion(req).await;
                }
                Some(ref_id) = kill_rx.recv() => {
                    self.on_kill_request(ref_id).await;
                }
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
            }
        }
    }

    /// New push: save to backlog and arm the debounce timer, unless a job
    /// for this ref is already running (it will be picked up via
    /// `debacklog` once that job finishes).
    async fn on_intake(&mut self, git_ref: GitRef) {
        let ref_id = git_ref.ref_id();
        if let Err(e) = self.backlog.save(&git_ref) {
            warn!(%ref_id, error = %e, "engine: failed to save backlog");
        }

        let mut registry = self.registry.lock().await;
        registry.insert_pending(git_ref.clone());
        let active = registry.is_active(&ref_id);
        drop(registry);

        if active {
            info!(%ref_id, "engine: job in progress, not debouncing");
            return;
        }
        self.debouncer.arm(ref_id, self.debounced_tx.clone());
    }

    /// A job just finished; revisit the backlog for this ref without
    /// writing a fresh backlog entry.
    async fn on_debacklog(&mut self, git_ref: GitRef) {
        self.debouncer.arm(git_ref.ref_id(), self.debounced_tx.clone());
    }

    /// §4.4 steps 1-8: the debounce timer fired for `ref_id`.
    async fn on_debounced(&mut self, ref_id: RefId) {
        let mut registry = self.registry.lock().await;
        if registry.is_active(&ref_id) {
            info!(%ref_id, "engine: job already in progress");
            return;
        }

        let pending = registry.take_pending(&ref_id);
        drop(registry);

        let git_ref = match pending {
            Some(git_ref) => git_ref,
            None => match self.backlog.claim(&probe_ref(&ref_id)) {
                Ok(Some(git_ref)) => git_ref,
                Ok(None) => {
                    info!(%ref_id, "engine: no backlog");
                    return;
                }
                Err(e) => {
                    warn!(%ref_id, error = %e, "engine: failed to claim backlog");
                    return;
                }
            },
        };

        if let Err(e) = self.backlog.clear(&git_ref) {
            warn!(%ref_id, error = %e, "engine: failed to clear backlog");
        }

        let trusted = gitdeploy_git::is_trusted(&git_ref.repo_id, &self.config.repo_list);
        let callback_url = self.callback_url(&git_ref.url_safe_ref_id());

        if let Some(active_job) = self
            .runner
            .launch(
                git_ref,
                trusted,
                callback_url,
                self.death_tx.clone(),
                self.debacklog_tx.clone(),
            )
            .await
        {
            self.registry.lock().await.insert_active(ref_id, active_job);
        }
    }

    /// §4.6: a subprocess exited, or `on_kill_request` forwarded an
    /// active ref here.
    async fn on_death(&mut self, ref_id: RefId) {
        self.debouncer.cancel(&ref_id);
        self.registry.lock().await.remove(&ref_id).await;
    }

    /// §4.8: an admin kill. Active refs are forwarded to `deathRow` and
    /// handled by the ordinary kill-and-reap path; pending-only refs are
    /// dropped directly since there is no subprocess to kill.
    async fn on_kill_request(&mut self, ref_id: RefId) {
        let mut registry = self.registry.lock().await;
        if registry.is_active(&ref_id) {
            drop(registry);
            self.on_death(ref_id).await;
            return;
        }

        if let Some(git_ref) = registry.take_pending(&ref_id) {
            drop(registry);
            self.debouncer.cancel(&ref_id);
            if let Err(e) = self.backlog.clear(&git_ref) {
                warn!(%ref_id, error = %e, "engine: failed to clear backlog on kill");
            }
            info!(%ref_id, "engine: dropped pending job");
            return;
        }

        warn!(%ref_id, "engine: kill request for unknown ref");
    }

    /// §4.7: an admin promotion request.
    async fn on_promotion(&mut self, req: PromotionRequest) {
        let callback_url = self.callback_url(&req.git_ref.url_safe_ref_id());
        let mut registry = self.registry.lock().await;
        self.promoter
            .promote(
                &mut registry,
                req.git_ref,
                req.promote_to,
                callback_url,
                self.death_tx.clone(),
            )
            .await;
    }

    /// §4.10: periodic sweep of `Recent`.
    async fn on_tick(&mut self) {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.stale_job_age).unwrap_or(chrono::Duration::zero());
        let removed = self.registry.lock().await.expire_recent(cutoff);
        if removed > 0 {
            info!(removed, "engine.expired");
        }
    }

    fn callback_url(&self, url_safe_ref_id: &UrlSafeRefId) -> String {
        format!("http://{}/api/local/jobs/{}", self.config.addr, url_safe_ref_id)
    }
}

/// Build a placeholder `GitRef` carrying only the `RepoID`/`RefName` pair
/// decoded from `ref_id`, sufficient to compute `Backlog`'s file paths
/// when `Pending` has no in-memory value to fall back to.
fn probe_ref(ref_id: &RefId) -> GitRef {
    let (repo_id, ref_name) = ref_id.0.split_once('#').unwrap_or((ref_id.0.as_str(), ""));
    GitRef {
        repo_id: repo_id.to_string(),
        timestamp: chrono::Utc::now(),
        https_url: String::new(),
        ssh_url: String::new(),
        rev: String::new(),
        r#ref: String::new(),
        ref_type: gitdeploy_types::RefType::Unknown,
        ref_name: ref_name.to_string(),
        owner: String::new(),
        repo: String::new(),
    }
}
