//! Polling driver — one job at a time, oldest first.
//!
//! Each tick:
//! 1. Rewrite the heartbeat (best effort)
//! 2. Re-sync scripts if the resync interval has elapsed
//! 3. Discover queued jobs across all projects
//! 4. Claim the oldest one that can still be claimed and run it to a
//!    terminal state
//!
//! then sleeps for the poll interval. Shutdown is only observed between
//! ticks, so a running script always finishes and its job is finalized.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::WorkerContext;
use crate::error::StoreError;
use crate::jobs::{JobRunner, JobState, JobStore, Outcome, ProcessingHandle};
use crate::scripts::ScriptCache;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was claimed.
    Idle,
    /// A job was claimed and run. `state` is where its descriptor ended up;
    /// `Processing` means the final move failed and needs an operator.
    Ran { job_id: String, state: JobState },
}

/// Single-threaded worker loop.
pub struct WorkerLoop {
    ctx: Arc<WorkerContext>,
    store: JobStore,
    runner: JobRunner,
    scripts: Arc<ScriptCache>,
    last_sync: Option<Instant>,
}

impl WorkerLoop {
    pub fn new(ctx: Arc<WorkerContext>, scripts: Arc<ScriptCache>) -> Self {
        Self {
            store: JobStore::new(ctx.root()),
            runner: JobRunner::new(&ctx, Arc::clone(&scripts)),
            scripts,
            ctx,
            last_sync: None,
        }
    }

    /// Sync scripts from the registry. Failures leave the cache as it was.
    pub async fn sync_scripts(&mut self) {
        match self.scripts.sync().await {
            Ok(report) => debug!(installed = report.installed, "Scripts in sync"),
            Err(e) => warn!(error = %e, "Script sync failed, using cached scripts"),
        }
        self.last_sync = Some(Instant::now());
    }

    async fn maybe_resync(&mut self) {
        let Some(interval) = self.ctx.config().resync_interval else {
            return;
        };
        if self.last_sync.is_none_or(|at| at.elapsed() >= interval) {
            self.sync_scripts().await;
        }
    }

    /// Run one tick.
    pub async fn tick(&mut self) -> TickOutcome {
        if let Err(e) = self.ctx.heartbeat().beat().await {
            warn!(error = %e, "Failed to update heartbeat");
        }
        self.maybe_resync().await;

        let candidates = match self.store.discover().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to scan job queues");
                return TickOutcome::Idle;
            }
        };

        for job in candidates {
            match self.store.begin(&job).await {
                Ok(handle) => {
                    info!(job_id = %job.id, project = %job.project_name(), "Found job");
                    let state = self.process(handle).await;
                    return TickOutcome::Ran {
                        job_id: job.id,
                        state,
                    };
                }
                Err(StoreError::Vanished { .. }) => {
                    debug!(job_id = %job.id, "Job claimed by another worker");
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Could not claim job, skipping");
                }
            }
        }
        TickOutcome::Idle
    }

    async fn process(&self, handle: ProcessingHandle) -> JobState {
        let job_id = handle.id.clone();
        let (finalized, state) = match self.runner.run(&handle).await {
            Outcome::Success { result_dir } => {
                info!(job_id = %job_id, results = %result_dir.display(), "Job completed");
                (self.store.complete(handle).await, JobState::Completed)
            }
            Outcome::Failure { reason } => {
                error!(job_id = %job_id, error = %reason, "Job failed");
                (self.store.fail(handle).await, JobState::Failed)
            }
        };

        match finalized {
            Ok(_) => state,
            Err(e) => {
                error!(
                    job_id = %job_id,
                    target = %state,
                    error = %e,
                    "Failed to finalize job, descriptor left in processing"
                );
                JobState::Processing
            }
        }
    }

    /// Sync once, then tick until `shutdown` flips to true (or its sender
    /// is dropped). Removes the heartbeat on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(root = %self.ctx.root().display(), "Watcher started");
        self.sync_scripts().await;

        let interval = self.ctx.config().poll_interval;
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Stopping watcher");
        self.ctx.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::config::WorkerConfig;
    use crate::context::paths;
    use tempfile::TempDir;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::SyncError;
    use crate::scripts::{RegistrySource, ScriptEntry};

    const OK_SCRIPT: &str = "echo ran \"$@\"\nexit 0\n";

    /// Empty registry that counts how often the module list is requested.
    struct CountingRegistry(Arc<AtomicUsize>);

    #[async_trait]
    impl RegistrySource for CountingRegistry {
        async fn modules(&self) -> Result<Vec<String>, SyncError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn manifest(&self, _module: &str) -> Result<Vec<ScriptEntry>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _module: &str, _file: &str) -> Result<Vec<u8>, SyncError> {
            Ok(Vec::new())
        }
    }

    async fn syncing_worker(
        dir: &TempDir,
        resync_interval: Option<Duration>,
    ) -> (WorkerLoop, Arc<AtomicUsize>) {
        let ctx = WorkerContext::init(WorkerConfig {
            root: dir.path().to_path_buf(),
            registry_url: None,
            resync_interval,
            ..WorkerConfig::default()
        })
        .await
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let scripts = Arc::new(ScriptCache::new(
            &ctx,
            Some(Box::new(CountingRegistry(Arc::clone(&calls)))),
        ));
        (WorkerLoop::new(Arc::new(ctx), scripts), calls)
    }

    async fn worker(dir: &TempDir) -> WorkerLoop {
        let ctx = WorkerContext::init(WorkerConfig {
            root: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(20),
            registry_url: None,
            interpreter: Some("sh".to_string()),
            ..WorkerConfig::default()
        })
        .await
        .unwrap();
        let scripts = Arc::new(ScriptCache::new(&ctx, None));
        std::fs::write(ctx.scripts_dir().join("core_script.py"), OK_SCRIPT).unwrap();
        WorkerLoop::new(Arc::new(ctx), scripts)
    }

    fn enqueue(root: &Path, project: &str, id: &str, age_secs: u64) {
        let dir = root.join(project).join("jobs/queue");
        std::fs::create_dir_all(root.join(project).join("data")).unwrap();
        std::fs::write(root.join(project).join("data/a.wav"), "RIFF").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{id}.json"));
        std::fs::write(&path, r#"{"input_files": ["data/a.wav"]}"#).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[tokio::test]
    async fn idle_tick_writes_heartbeat() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir).await;
        assert_eq!(w.tick().await, TickOutcome::Idle);
        assert!(dir.path().join(paths::HEARTBEAT).exists());
    }

    #[tokio::test]
    async fn tick_runs_oldest_job_only() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir).await;
        enqueue(dir.path(), "project_b", "young", 5);
        enqueue(dir.path(), "project_a", "old", 500);

        assert_eq!(
            w.tick().await,
            TickOutcome::Ran {
                job_id: "old".into(),
                state: JobState::Completed
            }
        );
        assert_eq!(
            JobStore::location(&w.ctx.root().join("project_b"), "young").await,
            Some(JobState::Queued)
        );

        assert_eq!(
            w.tick().await,
            TickOutcome::Ran {
                job_id: "young".into(),
                state: JobState::Completed
            }
        );
        assert_eq!(w.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn blocked_job_does_not_starve_queue() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir).await;
        enqueue(dir.path(), "p", "stuck", 500);
        enqueue(dir.path(), "p", "next", 5);
        // A leftover descriptor with the same id blocks the claim.
        let processing = dir.path().join("p/jobs/processing");
        std::fs::create_dir_all(&processing).unwrap();
        std::fs::write(processing.join("stuck.json"), "{}").unwrap();

        assert_eq!(
            w.tick().await,
            TickOutcome::Ran {
                job_id: "next".into(),
                state: JobState::Completed
            }
        );
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir).await;
        enqueue(dir.path(), "p", "bad", 500);
        let bad = dir.path().join("p/jobs/queue/bad.json");
        std::fs::write(&bad, "{ broken").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&bad)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(500))
            .unwrap();
        enqueue(dir.path(), "p", "good", 5);

        assert_eq!(
            w.tick().await,
            TickOutcome::Ran {
                job_id: "bad".into(),
                state: JobState::Failed
            }
        );
        assert_eq!(
            w.tick().await,
            TickOutcome::Ran {
                job_id: "good".into(),
                state: JobState::Completed
            }
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_clears_heartbeat() {
        let dir = TempDir::new().unwrap();
        let w = worker(&dir).await;
        enqueue(dir.path(), "p", "job1", 5);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(w.run(rx));
        let completed = dir.path().join("p/jobs/completed/job1.json");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !completed.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!dir.path().join(paths::HEARTBEAT).exists());
    }

    #[tokio::test]
    async fn tick_resyncs_once_interval_elapses() {
        let dir = TempDir::new().unwrap();
        let (mut w, calls) = syncing_worker(&dir, Some(Duration::from_millis(200))).await;

        w.sync_scripts().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        w.tick().await;
        w.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "resynced before the interval");

        tokio::time::sleep(Duration::from_millis(300)).await;
        w.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        w.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tick_never_resyncs_without_interval() {
        let dir = TempDir::new().unwrap();
        let (mut w, calls) = syncing_worker(&dir, None).await;

        w.sync_scripts().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        w.tick().await;
        w.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
