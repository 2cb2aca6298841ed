//! Filesystem-backed job store.
//!
//! Each project under the workspace root owns a `jobs/` tree:
//!
//! ```text
//! <root>/<project>/jobs/queue/       descriptors waiting for a worker
//! <root>/<project>/jobs/processing/  claimed by a worker
//! <root>/<project>/jobs/completed/   script exited 0
//! <root>/<project>/jobs/failed/      anything else
//! <root>/<project>/jobs/results/<id> per-job output
//! ```
//!
//! A descriptor only ever moves through [`JobStore::transition`], which is a
//! single `rename`. Whoever wins the rename owns the job.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::context::is_plain_file_name;
use crate::error::{JobError, StoreError};
use crate::jobs::JobState;

pub const JOBS_DIR: &str = "jobs";
pub const RESULTS_DIR: &str = "results";
const DESCRIPTOR_EXT: &str = "json";

/// A descriptor waiting in a project's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// File stem of the descriptor.
    pub id: String,
    /// Project directory owning the job.
    pub project: PathBuf,
    /// Full path of the descriptor in `queue/`.
    pub path: PathBuf,
    /// Arrival time (modification time of the descriptor).
    pub arrived_at: SystemTime,
}

impl QueuedJob {
    pub fn file_name(&self) -> String {
        format!("{}.{DESCRIPTOR_EXT}", self.id)
    }

    /// Project directory name, for logging.
    pub fn project_name(&self) -> String {
        project_name(&self.project)
    }
}

/// A job this worker has claimed. Consumed by the terminal transition.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessingHandle {
    pub id: String,
    pub project: PathBuf,
    /// Full path of the descriptor in `processing/`.
    pub path: PathBuf,
}

impl ProcessingHandle {
    pub fn file_name(&self) -> String {
        format!("{}.{DESCRIPTOR_EXT}", self.id)
    }

    pub fn project_name(&self) -> String {
        project_name(&self.project)
    }
}

/// Job store rooted at the workspace root.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding descriptors in `state` for `project`.
    pub fn state_dir(project: &Path, state: JobState) -> PathBuf {
        project.join(JOBS_DIR).join(state.dir_name())
    }

    /// Deterministic per-job results directory.
    pub fn result_dir(project: &Path, job_id: &str) -> PathBuf {
        project.join(JOBS_DIR).join(RESULTS_DIR).join(job_id)
    }

    /// Every queued descriptor across all projects, oldest first. A project
    /// whose queue cannot be read is logged and left out of this scan.
    pub async fn discover(&self) -> Result<Vec<QueuedJob>, StoreError> {
        let mut jobs = Vec::new();
        let mut projects = fs::read_dir(&self.root).await?;

        while let Some(entry) = projects.next_entry().await? {
            if is_hidden(&entry.file_name()) {
                continue;
            }
            let project = entry.path();
            if !fs::metadata(&project).await.is_ok_and(|m| m.is_dir()) {
                continue;
            }
            let queue_dir = Self::state_dir(&project, JobState::Queued);
            if let Err(e) = scan_queue(&project, &queue_dir, &mut jobs).await {
                warn!(dir = %queue_dir.display(), error = %e, "Failed to read queue directory");
            }
        }

        jobs.sort_by(|a, b| {
            a.arrived_at
                .cmp(&b.arrived_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        debug!(count = jobs.len(), "Discovered queued jobs");
        Ok(jobs)
    }

    /// Create the processing, completed, failed and results directories.
    pub async fn ensure_dirs(project: &Path) -> Result<(), StoreError> {
        for state in [JobState::Processing, JobState::Completed, JobState::Failed] {
            fs::create_dir_all(Self::state_dir(project, state)).await?;
        }
        fs::create_dir_all(project.join(JOBS_DIR).join(RESULTS_DIR)).await?;
        Ok(())
    }

    /// Claim a queued job by moving it into `processing/`.
    pub async fn begin(&self, job: &QueuedJob) -> Result<ProcessingHandle, StoreError> {
        Self::ensure_dirs(&job.project).await?;
        let path = self
            .transition(&job.project, &job.id, JobState::Queued, JobState::Processing)
            .await?;
        info!(job_id = %job.id, project = %job.project_name(), "Job claimed");
        Ok(ProcessingHandle {
            id: job.id.clone(),
            project: job.project.clone(),
            path,
        })
    }

    /// Move a claimed job to `completed/`.
    pub async fn complete(&self, handle: ProcessingHandle) -> Result<PathBuf, StoreError> {
        self.finish(handle, JobState::Completed).await
    }

    /// Move a claimed job to `failed/`.
    pub async fn fail(&self, handle: ProcessingHandle) -> Result<PathBuf, StoreError> {
        self.finish(handle, JobState::Failed).await
    }

    async fn finish(
        &self,
        handle: ProcessingHandle,
        to: JobState,
    ) -> Result<PathBuf, StoreError> {
        let path = self
            .transition(&handle.project, &handle.id, JobState::Processing, to)
            .await?;
        info!(job_id = %handle.id, project = %handle.project_name(), state = %to, "Job finished");
        Ok(path)
    }

    /// Move the descriptor of `job_id` from the `from` directory to the `to`
    /// directory with one rename. Refuses edges the state machine forbids
    /// and never overwrites an existing descriptor.
    pub async fn transition(
        &self,
        project: &Path,
        job_id: &str,
        from: JobState,
        to: JobState,
    ) -> Result<PathBuf, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id: job_id.to_string(),
                from,
                to,
            });
        }
        if !is_plain_file_name(job_id) {
            return Err(StoreError::InvalidPath(PathBuf::from(job_id)));
        }

        let file_name = format!("{job_id}.{DESCRIPTOR_EXT}");
        let src = Self::state_dir(project, from).join(&file_name);
        let dest_dir = Self::state_dir(project, to);
        fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(&file_name);

        if fs::try_exists(&dest).await? {
            return Err(StoreError::Occupied {
                id: job_id.to_string(),
                state: to,
            });
        }

        match fs::rename(&src, &dest).await {
            Ok(()) => {
                debug!(job_id, %from, %to, "Job transitioned");
                Ok(dest)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::Vanished {
                id: job_id.to_string(),
                state: from,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// The state directory currently holding `job_id`, if any.
    pub async fn location(project: &Path, job_id: &str) -> Option<JobState> {
        let file_name = format!("{job_id}.{DESCRIPTOR_EXT}");
        for state in JobState::ALL {
            if fs::try_exists(Self::state_dir(project, state).join(&file_name))
                .await
                .unwrap_or(false)
            {
                return Some(state);
            }
        }
        None
    }

    /// Create the results directory for a job. Existing output is never
    /// overwritten: a populated directory is an error.
    pub async fn prepare_result_dir(project: &Path, job_id: &str) -> Result<PathBuf, JobError> {
        let dir = Self::result_dir(project, job_id);
        if let Ok(mut entries) = fs::read_dir(&dir).await
            && entries.next_entry().await?.is_some()
        {
            return Err(JobError::ResultsExist { path: dir });
        }
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

/// Append the descriptors in one project's queue to `jobs`. A project
/// without a queue directory contributes nothing.
async fn scan_queue(
    project: &Path,
    queue_dir: &Path,
    jobs: &mut Vec<QueuedJob>,
) -> std::io::Result<()> {
    let mut queue = match fs::read_dir(queue_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(file) = queue.next_entry().await? {
        let path = file.path();
        if is_hidden(&file.file_name())
            || path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXT)
        {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "Skipping descriptor with non UTF-8 name");
            continue;
        };
        // The file may be claimed by someone else between listing and stat.
        let Ok(meta) = fs::metadata(&path).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        jobs.push(QueuedJob {
            id,
            project: project.to_path_buf(),
            path,
            arrived_at: meta.modified()?,
        });
    }
    Ok(())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn project_name(project: &Path) -> String {
    project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project.display().to_string())
}
