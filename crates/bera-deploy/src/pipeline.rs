//! Deploy pipeline: one detached task per deploy run.
//!
//! `start_deploy` marks the application `deploying` and spawns the run.
//! The run emits the script's lines through the event bus, then marks the
//! application `running` and records a `Deploy <branch>` release. Runs are
//! tracked per application so they can be cancelled and so the configured
//! [`DeployPolicy`] can reject or queue overlapping deploys. Every run holds a
//! completion signal that is released when its task ends: queued runs wait
//! on their predecessor's, and `cancel_and_wait` / `shutdown` wait on all of
//! them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bera_core::DeployPolicy;
use bera_release::ReleaseLedger;
use bera_state::{AppId, AppStatus, AppStore, LogEvent, Release};
use bera_stream::EventBus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DeployError;
use crate::script::{DeployScript, LIVE_URL_BASE, StepAction};
use crate::timer::Timer;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub app_id: AppId,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    /// Who asked for the deploy; recorded on the release's activity entry.
    pub actor: String,
}

impl DeployRequest {
    pub fn new(app_id: &str, actor: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            actor: actor.to_string(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    pub fn with_repo_url(mut self, repo_url: &str) -> Self {
        self.repo_url = Some(repo_url.to_string());
        self
    }

    fn branch(&self) -> &str {
        match self.branch.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => b,
            _ => DEFAULT_BRANCH,
        }
    }
}

/// Terminal state of one deploy run.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    Succeeded { release: Release },
    Failed { reason: String },
    Cancelled,
}

/// Handle to a spawned run. Dropping it detaches the run.
#[derive(Debug)]
pub struct DeployTicket {
    pub app_id: AppId,
    pub run_id: u64,
    handle: JoinHandle<DeployOutcome>,
}

impl DeployTicket {
    /// Wait for the run to finish.
    pub async fn outcome(self) -> DeployOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => DeployOutcome::Cancelled,
            Err(e) => DeployOutcome::Failed {
                reason: format!("deploy task panicked: {e}"),
            },
        }
    }
}

/// Closes when the run holding the sender finishes. Nothing is ever sent.
type Done = watch::Receiver<()>;

struct ActiveRun {
    cancel: watch::Sender<bool>,
    done: Done,
}

/// In-flight runs of one application.
#[derive(Default)]
struct AppRuns {
    active: HashMap<u64, ActiveRun>,
    /// Completion of the most recently accepted run.
    tail: Option<Done>,
}

struct Run {
    app_id: AppId,
    branch: String,
    actor: String,
    /// Queue policy: the run accepted just before this one.
    after: Option<Done>,
    cancel: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct DeployPipeline {
    apps: Arc<dyn AppStore>,
    ledger: ReleaseLedger,
    bus: Arc<EventBus>,
    timer: Arc<dyn Timer>,
    script: Arc<DeployScript>,
    policy: DeployPolicy,
    runs: Arc<Mutex<HashMap<AppId, AppRuns>>>,
    next_run: Arc<AtomicU64>,
}

impl DeployPipeline {
    /// A pipeline running `script` with the default (`reject`) policy.
    pub fn new(
        apps: Arc<dyn AppStore>,
        ledger: ReleaseLedger,
        bus: Arc<EventBus>,
        timer: Arc<dyn Timer>,
        script: DeployScript,
    ) -> Self {
        Self {
            apps,
            ledger,
            bus,
            timer,
            script: Arc::new(script),
            policy: DeployPolicy::default(),
            runs: Arc::new(Mutex::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_policy(mut self, policy: DeployPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DeployPolicy {
        self.policy
    }

    /// Accept a deploy: set the application `deploying` and spawn the run.
    ///
    /// Returns once the status write has committed. Must be called from
    /// within a tokio runtime.
    pub fn start_deploy(&self, request: DeployRequest) -> Result<DeployTicket, DeployError> {
        let app_id = request.app_id.clone();
        if self.apps.get_app(&app_id)?.is_none() {
            return Err(DeployError::NotFound(format!("app {app_id}")));
        }

        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(());
        let after = {
            let mut runs = self.lock_runs();
            let busy = runs.get(&app_id).is_some_and(|r| !r.active.is_empty());
            if busy && self.policy == DeployPolicy::Reject {
                warn!(%app_id, "deploy rejected: another deploy is in progress");
                return Err(DeployError::Conflict(format!(
                    "a deploy is already in progress for app {app_id}"
                )));
            }
            self.apps.set_app_status(&app_id, AppStatus::Deploying)?;
            let entry = runs.entry(app_id.clone()).or_default();
            entry.active.insert(
                run_id,
                ActiveRun {
                    cancel: cancel_tx,
                    done: done_rx.clone(),
                },
            );
            // The queue position is fixed here, under the lock, in request order.
            let previous = entry.tail.replace(done_rx);
            if self.policy == DeployPolicy::Queue {
                previous
            } else {
                None
            }
        };

        info!(
            %app_id,
            run_id,
            branch = %request.branch(),
            repo = request.repo_url.as_deref().unwrap_or("-"),
            policy = %self.policy,
            "deploy started"
        );

        let run = Run {
            app_id: app_id.clone(),
            branch: request.branch().to_string(),
            actor: request.actor.clone(),
            after,
            cancel: cancel_rx,
        };
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            let app_id = run.app_id.clone();
            let outcome = pipeline.run(run).await;
            pipeline.finish(&app_id, run_id);
            drop(done_tx);
            outcome
        });

        Ok(DeployTicket {
            app_id,
            run_id,
            handle,
        })
    }

    /// Signal every in-flight run of `app_id` to stop. Returns false if
    /// none was running.
    pub fn cancel(&self, app_id: &str) -> bool {
        !self.signal_cancel(app_id).is_empty()
    }

    /// Cancel every in-flight run of `app_id` and wait until each has
    /// emitted its last line and settled the app's status. Returns false if
    /// none was running.
    pub async fn cancel_and_wait(&self, app_id: &str) -> bool {
        let pending = self.signal_cancel(app_id);
        let cancelled = !pending.is_empty();
        for mut done in pending {
            wait_done(&mut done).await;
        }
        if cancelled {
            debug!(%app_id, "cancelled deploys have settled");
        }
        cancelled
    }

    /// Cancel every in-flight run and wait for all of them to settle.
    pub async fn shutdown(&self) {
        let pending: Vec<Done> = {
            let runs = self.lock_runs();
            runs.iter()
                .flat_map(|(app_id, entry)| {
                    debug!(%app_id, runs = entry.active.len(), "cancelling deploys for shutdown");
                    entry.active.values()
                })
                .map(|run| {
                    let _ = run.cancel.send(true);
                    run.done.clone()
                })
                .collect()
        };
        let count = pending.len();
        for mut done in pending {
            wait_done(&mut done).await;
        }
        info!(runs = count, "deploy pipeline stopped");
    }

    fn signal_cancel(&self, app_id: &str) -> Vec<Done> {
        let runs = self.lock_runs();
        let Some(entry) = runs.get(app_id) else {
            return Vec::new();
        };
        if !entry.active.is_empty() {
            info!(%app_id, runs = entry.active.len(), "deploy cancellation requested");
        }
        entry
            .active
            .values()
            .map(|run| {
                let _ = run.cancel.send(true);
                run.done.clone()
            })
            .collect()
    }

    pub fn is_deploying(&self, app_id: &str) -> bool {
        self.lock_runs()
            .get(app_id)
            .is_some_and(|r| !r.active.is_empty())
    }

    pub fn active_deploys(&self) -> usize {
        self.lock_runs().values().map(|r| r.active.len()).sum()
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<AppId, AppRuns>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, app_id: &str, run_id: u64) {
        let mut runs = self.lock_runs();
        if let Some(entry) = runs.get_mut(app_id) {
            entry.active.remove(&run_id);
            if entry.active.is_empty() {
                runs.remove(app_id);
            }
        }
    }

    async fn run(&self, run: Run) -> DeployOutcome {
        let Run {
            app_id,
            branch,
            actor,
            after,
            mut cancel,
        } = run;

        if let Some(mut previous) = after {
            // Even a cancelled run keeps its place so later runs stay in order.
            wait_done(&mut previous).await;
            if *cancel.borrow() {
                return self.cancelled(&app_id);
            }
            // The previous run may have moved the app to running.
            if let Err(e) = self.apps.set_app_status(&app_id, AppStatus::Deploying) {
                warn!(%app_id, error = %e, "failed to mark queued deploy as deploying");
            }
        }

        let mut unpersisted = 0usize;
        for step in self.script.steps() {
            if *cancel.borrow() {
                return self.cancelled(&app_id);
            }
            let line = match &step.action {
                StepAction::Fail(reason) => return self.failed(&app_id, &branch, &actor, reason),
                StepAction::Log(line) => line.clone(),
                StepAction::ReleaseBanner => self.release_banner(&app_id),
                StepAction::LiveBanner => format!("-----> App is live at {LIVE_URL_BASE}/{app_id}"),
            };
            if !self.emit(&app_id, line) {
                unpersisted += 1;
            }
            tokio::select! {
                _ = self.timer.sleep(step.delay) => {}
                _ = wait_cancel(&mut cancel) => return self.cancelled(&app_id),
            }
        }

        if unpersisted > 0 {
            // Lost log writes only matter if the store itself is gone.
            if let Err(e) = self.apps.get_app(&app_id) {
                let reason = format!("store unavailable: {e}");
                error!(%app_id, unpersisted, %reason, "deploy aborted before release");
                self.emit(&app_id, format!("-----> Deploy failed: {reason}"));
                self.set_idle(&app_id);
                return DeployOutcome::Failed { reason };
            }
            warn!(%app_id, unpersisted, "deploy finished with unpersisted log lines");
        }

        if let Err(e) = self.apps.set_app_status(&app_id, AppStatus::Running) {
            let reason = format!("failed to mark app running: {e}");
            error!(%app_id, %reason, "deploy aborted before release");
            self.emit(&app_id, format!("-----> Deploy failed: {reason}"));
            return DeployOutcome::Failed { reason };
        }

        match self
            .ledger
            .record_release(&app_id, &format!("Deploy {branch}"), &actor)
        {
            Ok(release) => {
                info!(%app_id, version = release.version, %branch, "deploy succeeded");
                DeployOutcome::Succeeded { release }
            }
            Err(e) => {
                let reason = format!("failed to record release: {e}");
                error!(%app_id, %reason, "deploy finished without release");
                self.emit(&app_id, format!("-----> Deploy failed: {reason}"));
                DeployOutcome::Failed { reason }
            }
        }
    }

    fn failed(&self, app_id: &str, branch: &str, actor: &str, reason: &str) -> DeployOutcome {
        warn!(%app_id, %reason, "deploy failed");
        self.emit(app_id, format!("-----> Build failed: {reason}"));
        self.set_idle(app_id);
        if let Err(e) = self.ledger.record_failed_release(
            app_id,
            &format!("Deploy {branch} failed: {reason}"),
            actor,
        ) {
            error!(%app_id, error = %e, "failed to record failed release");
        }
        DeployOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    fn cancelled(&self, app_id: &str) -> DeployOutcome {
        info!(%app_id, "deploy cancelled");
        self.emit(app_id, "-----> Deploy cancelled".to_string());
        self.set_idle(app_id);
        DeployOutcome::Cancelled
    }

    fn set_idle(&self, app_id: &str) {
        if let Err(e) = self.apps.set_app_status(app_id, AppStatus::Idle) {
            warn!(%app_id, error = %e, "failed to reset app status");
        }
    }

    /// Publish one build line. Returns false if it was not persisted.
    fn emit(&self, app_id: &str, line: String) -> bool {
        match self.bus.publish(&LogEvent::build(app_id, line)) {
            Ok(_) => true,
            Err(e) => {
                warn!(%app_id, error = %e, "build log line not persisted");
                false
            }
        }
    }

    fn release_banner(&self, app_id: &str) -> String {
        match self.ledger.release_count(app_id) {
            Ok(count) => format!("       Released v{}", count + 1),
            Err(e) => {
                warn!(%app_id, error = %e, "release count unavailable");
                "       Released".to_string()
            }
        }
    }
}

/// Resolves once the run owning the other end has finished.
async fn wait_done(done: &mut Done) {
    while done.changed().await.is_ok() {}
}

/// Resolves once cancellation is signalled; never if the sender is gone.
async fn wait_cancel(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
