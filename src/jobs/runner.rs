//! Runs a claimed job's script as a child process.
//!
//! Every analysis script speaks the same CLI:
//!
//! ```text
//! <script> --input-files <abs>... --output-file <results/<id>/detections.csv>
//!          [--lat v] [--lon v] [--min-confidence v] [--static-noise-file p]
//! ```
//!
//! and must exit 0 on success. The runner does not inspect the artifact.
//! Scripts run without a timeout: a hung script blocks the worker.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::PathBase;
use crate::context::WorkerContext;
use crate::error::JobError;
use crate::jobs::descriptor::JobDescriptor;
use crate::jobs::store::{JobStore, ProcessingHandle};
use crate::scripts::ScriptCache;

/// Primary result artifact written by scripts.
pub const ARTIFACT_FILE: &str = "detections.csv";
/// Script stdout, kept on success.
pub const STDOUT_LOG: &str = "stdout.log";
/// Script stderr, kept on failure.
pub const ERROR_LOG: &str = "error.log";

/// How a job ended.
#[derive(Debug)]
pub enum Outcome {
    Success { result_dir: PathBuf },
    Failure { reason: JobError },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A fully built script command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Build the command for `script`. With an interpreter the script path
    /// becomes its first argument.
    pub fn build(
        interpreter: Option<&str>,
        script: &Path,
        inputs: &[PathBuf],
        output: &Path,
        descriptor: &JobDescriptor,
        base: &Path,
    ) -> Self {
        let mut args = Vec::new();
        let program = match interpreter {
            Some(interp) => {
                args.push(script.as_os_str().to_os_string());
                OsString::from(interp)
            }
            None => script.as_os_str().to_os_string(),
        };

        args.push(OsString::from("--input-files"));
        args.extend(inputs.iter().map(|p| p.as_os_str().to_os_string()));
        args.push(OsString::from("--output-file"));
        args.push(output.as_os_str().to_os_string());
        args.extend(descriptor.parameters.cli_args(base));

        Self { program, args }
    }
}

/// Executes jobs against scripts from a [`ScriptCache`].
pub struct JobRunner {
    scripts: Arc<ScriptCache>,
    root: PathBuf,
    interpreter: Option<String>,
    default_script: String,
    path_base: PathBase,
}

impl JobRunner {
    pub fn new(ctx: &WorkerContext, scripts: Arc<ScriptCache>) -> Self {
        let config = ctx.config();
        Self {
            scripts,
            root: ctx.root().to_path_buf(),
            interpreter: config.interpreter.clone(),
            default_script: config.default_script.clone(),
            path_base: config.path_base,
        }
    }

    /// Run a claimed job to an outcome. Never panics on job errors; every
    /// failure is reported through [`Outcome::Failure`].
    pub async fn run(&self, handle: &ProcessingHandle) -> Outcome {
        match self.execute(handle).await {
            Ok(result_dir) => Outcome::Success { result_dir },
            Err(reason) => Outcome::Failure { reason },
        }
    }

    fn base_dir<'a>(&'a self, project: &'a Path) -> &'a Path {
        match self.path_base {
            PathBase::Project => project,
            PathBase::Root => &self.root,
        }
    }

    async fn execute(&self, handle: &ProcessingHandle) -> Result<PathBuf, JobError> {
        let raw = fs::read(&handle.path).await?;
        let descriptor =
            JobDescriptor::from_slice(&raw).map_err(|e| JobError::InvalidDescriptor {
                id: handle.id.clone(),
                reason: e.to_string(),
            })?;

        let ignored = descriptor.parameters.unrecognized_keys();
        if !ignored.is_empty() {
            warn!(job_id = %handle.id, ?ignored, "Ignoring unsupported parameters");
        }

        let base = self.base_dir(&handle.project);
        let inputs = resolve_inputs(&handle.id, base, &descriptor.input_files).await;
        if inputs.is_empty() {
            return Err(JobError::NoValidInputs {
                id: handle.id.clone(),
            });
        }

        let script_name = descriptor.script_name_or(&self.default_script);
        let script = self.scripts.resolve(script_name).await?;

        let result_dir = JobStore::prepare_result_dir(&handle.project, &handle.id).await?;
        let output = result_dir.join(ARTIFACT_FILE);
        let invocation = Invocation::build(
            self.interpreter.as_deref(),
            &script,
            &inputs,
            &output,
            &descriptor,
            base,
        );

        info!(
            job_id = %handle.id,
            script = %script_name,
            inputs = inputs.len(),
            "Running script"
        );
        let result = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| JobError::Spawn {
                script: script_name.to_string(),
                reason: e.to_string(),
            })?;

        if result.status.success() {
            fs::write(result_dir.join(STDOUT_LOG), &result.stdout).await?;
            info!(job_id = %handle.id, "Script succeeded");
            Ok(result_dir)
        } else {
            fs::write(result_dir.join(ERROR_LOG), &result.stderr).await?;
            Err(JobError::ScriptExecutionFailed {
                script: script_name.to_string(),
                code: result.status.code(),
            })
        }
    }
}

/// Absolute paths of the inputs that exist. Missing ones are logged and dropped.
async fn resolve_inputs(job_id: &str, base: &Path, inputs: &[String]) -> Vec<PathBuf> {
    let mut resolved = Vec::with_capacity(inputs.len());
    for rel in inputs {
        match fs::canonicalize(base.join(rel)).await {
            Ok(path) => resolved.push(path),
            Err(_) => warn!(job_id, input = %rel, "Input file missing"),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use tempfile::TempDir;

    /// Shell script that writes its output file, echoes its args, and exits
    /// with `code`.
    fn script_body(code: i32) -> String {
        format!(
            r#"out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output-file" ]; then out="$arg"; fi
  prev="$arg"
done
echo "args: $*"
echo "stderr line" >&2
if [ -n "$out" ]; then echo "label,confidence" > "$out"; fi
exit {code}
"#
        )
    }

    struct Fixture {
        _dir: TempDir,
        ctx: WorkerContext,
        runner: JobRunner,
        project: PathBuf,
    }

    async fn fixture(path_base: PathBase) -> Fixture {
        let dir = TempDir::new().unwrap();
        let ctx = WorkerContext::init(WorkerConfig {
            root: dir.path().to_path_buf(),
            registry_url: None,
            interpreter: Some("sh".to_string()),
            path_base,
            ..WorkerConfig::default()
        })
        .await
        .unwrap();
        let cache = Arc::new(ScriptCache::new(&ctx, None));
        let runner = JobRunner::new(&ctx, cache);
        let project = ctx.root().join("project_a");
        std::fs::create_dir_all(project.join("jobs/processing")).unwrap();
        std::fs::create_dir_all(project.join("data")).unwrap();
        std::fs::write(project.join("data/a.wav"), "RIFF").unwrap();
        Fixture {
            _dir: dir,
            ctx,
            runner,
            project,
        }
    }

    fn claim(project: &Path, id: &str, descriptor: &str) -> ProcessingHandle {
        let path = project.join("jobs/processing").join(format!("{id}.json"));
        std::fs::write(&path, descriptor).unwrap();
        ProcessingHandle {
            id: id.to_string(),
            project: project.to_path_buf(),
            path,
        }
    }

    #[test]
    fn invocation_with_interpreter() {
        let desc = JobDescriptor::from_slice(
            br#"{"parameters": {"lat": 10, "lon": 20, "min_confidence": 0.25}}"#,
        )
        .unwrap();
        let inv = Invocation::build(
            Some("python3"),
            Path::new("/s/core_script.py"),
            &[PathBuf::from("/p/a.wav"), PathBuf::from("/p/b.wav")],
            Path::new("/p/jobs/results/j/detections.csv"),
            &desc,
            Path::new("/p"),
        );
        assert_eq!(inv.program, "python3");
        let args: Vec<_> = inv.args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "/s/core_script.py",
                "--input-files",
                "/p/a.wav",
                "/p/b.wav",
                "--output-file",
                "/p/jobs/results/j/detections.csv",
                "--lat",
                "10",
                "--lon",
                "20",
                "--min-confidence",
                "0.25",
            ]
        );
    }

    #[test]
    fn invocation_without_interpreter_runs_script_directly() {
        let inv = Invocation::build(
            None,
            Path::new("/s/run.sh"),
            &[PathBuf::from("/p/a.wav")],
            Path::new("/out.csv"),
            &JobDescriptor::default(),
            Path::new("/p"),
        );
        assert_eq!(inv.program, "/s/run.sh");
        assert_eq!(inv.args[0], "--input-files");
    }

    #[tokio::test]
    async fn successful_script_writes_stdout_log() {
        let fx = fixture(PathBase::Project).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(0)).unwrap();
        let handle = claim(
            &fx.project,
            "job1",
            r#"{"parameters": {"lat": 1}, "input_files": ["data/a.wav"]}"#,
        );

        let result_dir = match fx.runner.run(&handle).await {
            Outcome::Success { result_dir } => result_dir,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(result_dir, fx.project.join("jobs/results/job1"));
        let stdout = std::fs::read_to_string(result_dir.join(STDOUT_LOG)).unwrap();
        assert!(stdout.contains("--lat 1"));
        assert!(stdout.contains("data/a.wav"));
        assert!(result_dir.join(ARTIFACT_FILE).exists());
        assert!(!result_dir.join(ERROR_LOG).exists());
    }

    #[tokio::test]
    async fn failing_script_writes_error_log() {
        let fx = fixture(PathBase::Project).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(3)).unwrap();
        let handle = claim(&fx.project, "job1", r#"{"input_files": ["data/a.wav"]}"#);

        let outcome = fx.runner.run(&handle).await;
        assert!(matches!(
            outcome,
            Outcome::Failure {
                reason: JobError::ScriptExecutionFailed { code: Some(3), .. }
            }
        ));
        let result_dir = fx.project.join("jobs/results/job1");
        let stderr = std::fs::read_to_string(result_dir.join(ERROR_LOG)).unwrap();
        assert!(stderr.contains("stderr line"));
        assert!(!result_dir.join(STDOUT_LOG).exists());
    }

    #[tokio::test]
    async fn no_valid_inputs_fails_before_spawn() {
        let fx = fixture(PathBase::Project).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(0)).unwrap();
        let handle = claim(&fx.project, "job1", r#"{"input_files": ["data/missing.wav"]}"#);

        let outcome = fx.runner.run(&handle).await;
        assert!(matches!(
            outcome,
            Outcome::Failure {
                reason: JobError::NoValidInputs { .. }
            }
        ));
        assert!(!fx.project.join("jobs/results/job1").exists());
    }

    #[tokio::test]
    async fn missing_inputs_are_dropped() {
        let fx = fixture(PathBase::Project).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(0)).unwrap();
        let handle = claim(
            &fx.project,
            "job1",
            r#"{"input_files": ["data/missing.wav", "data/a.wav"]}"#,
        );

        assert!(fx.runner.run(&handle).await.is_success());
        let stdout =
            std::fs::read_to_string(fx.project.join("jobs/results/job1").join(STDOUT_LOG)).unwrap();
        assert!(!stdout.contains("missing.wav"));
    }

    #[tokio::test]
    async fn missing_script_fails() {
        let fx = fixture(PathBase::Project).await;
        let handle = claim(
            &fx.project,
            "job1",
            r#"{"script_name": "ghost.py", "input_files": ["data/a.wav"]}"#,
        );

        let outcome = fx.runner.run(&handle).await;
        assert!(matches!(
            outcome,
            Outcome::Failure {
                reason: JobError::ScriptNotFound { ref name }
            } if name == "ghost.py"
        ));
        assert!(!fx.project.join("jobs/results/job1").exists());
    }

    #[tokio::test]
    async fn invalid_descriptor_fails() {
        let fx = fixture(PathBase::Project).await;
        let handle = claim(&fx.project, "job1", "{ not json");
        assert!(matches!(
            fx.runner.run(&handle).await,
            Outcome::Failure {
                reason: JobError::InvalidDescriptor { .. }
            }
        ));
    }

    #[tokio::test]
    async fn existing_results_are_not_overwritten() {
        let fx = fixture(PathBase::Project).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(0)).unwrap();
        let results = fx.project.join("jobs/results/job1");
        std::fs::create_dir_all(&results).unwrap();
        std::fs::write(results.join(ARTIFACT_FILE), "previous").unwrap();
        let handle = claim(&fx.project, "job1", r#"{"input_files": ["data/a.wav"]}"#);

        assert!(matches!(
            fx.runner.run(&handle).await,
            Outcome::Failure {
                reason: JobError::ResultsExist { .. }
            }
        ));
        assert_eq!(
            std::fs::read_to_string(results.join(ARTIFACT_FILE)).unwrap(),
            "previous"
        );
    }

    #[tokio::test]
    async fn root_path_base_resolves_against_workspace() {
        let fx = fixture(PathBase::Root).await;
        std::fs::write(fx.ctx.scripts_dir().join("core_script.py"), script_body(0)).unwrap();
        let handle = claim(
            &fx.project,
            "job1",
            r#"{"input_files": ["project_a/data/a.wav"]}"#,
        );
        assert!(fx.runner.run(&handle).await.is_success());
    }
}
