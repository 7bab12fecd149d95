//! JobService: transport-agnostic job lifecycle.
//!
//! The service owns:
//! - The job store (records and job directories)
//! - The upload store
//! - The artifact layout used for every result lookup
//! - The process runner that executes the predictor
//!
//! Lifecycle of one prediction:
//! create dir → write input → persist `running` → run predictor → persist
//! terminal record → respond. The response always describes the outcome; a
//! failed prediction is data, not an error.
//!
//! Predictions started with [`JobService::spawn_prediction`] are tracked and
//! [`JobService::shutdown`] waits for them, so a job never outlives the
//! server in the `running` state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::archive::{ArchiveError, build_archive};
use crate::job::{JobId, JobRecord, now_rfc3339};
use crate::request::PredictionRequest;
use crate::results::{ArtifactKind, ArtifactLayout, JobResults, load_results};
use crate::runner::{
    PredictorInvocation, ProcessOutcome, ProcessRunner, RunnerError, SubprocessRunner,
};
use crate::serializer::{self, SerializeError};
use crate::store::{JobStore, StoreError};
use crate::uploads::UploadStore;
use crate::version::VersionInfo;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

const TIMEOUT_OUTPUT: &str = "The prediction process took too long and was terminated.";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base predictor command; the predict arguments are appended.
    pub predictor: Vec<String>,
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            predictor: vec!["boltz".to_string()],
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    pub fn with_predictor(mut self, predictor: Vec<String>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Orchestration failure before or while running the predictor.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Failure to serve a read of an existing job.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Job not found")]
    JobNotFound,
    #[error("Job info not found")]
    InfoNotFound,
    #[error("File not allowed")]
    FileNotAllowed,
    #[error("File not found")]
    FileNotFound,
    #[error("PDB file not found")]
    StructureNotFound,
    #[error("Failed to create archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Failed to create archive: {0}")]
    ArchiveTask(#[from] tokio::task::JoinError),
}

/// Outcome of `/predict`, returned for every terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub message: String,
    pub output: String,
    pub yaml_content: String,
    pub job_id: String,
    pub job_dir: String,
    pub timestamp: String,
}

impl PredictionResponse {
    fn new(job_id: &JobId, job_dir: &std::path::Path) -> Self {
        Self {
            success: false,
            message: String::new(),
            output: String::new(),
            yaml_content: String::new(),
            job_id: job_id.to_string(),
            job_dir: job_dir.display().to_string(),
            timestamp: now_rfc3339(),
        }
    }

    fn errored(mut self, error: &dyn std::fmt::Display) -> Self {
        self.success = false;
        self.message = format!("An error occurred: {error}. Job ID: {}", self.job_id);
        self.output = String::new();
        self
    }
}

/// Transport-agnostic job service.
pub struct JobService {
    store: JobStore,
    uploads: UploadStore,
    layout: ArtifactLayout,
    runner: Arc<dyn ProcessRunner>,
    config: ServiceConfig,
    version: VersionInfo,
    tasks: TaskTracker,
}

impl JobService {
    pub fn new(store: JobStore, uploads: UploadStore, config: ServiceConfig) -> Self {
        Self {
            store,
            uploads,
            layout: ArtifactLayout::default(),
            runner: Arc::new(SubprocessRunner),
            config,
            version: VersionInfo::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Run a prediction on its own tracked task.
    ///
    /// The task keeps going if the handle is dropped.
    pub fn spawn_prediction(
        self: &Arc<Self>,
        request: PredictionRequest,
    ) -> JoinHandle<PredictionResponse> {
        let service = Arc::clone(self);
        self.tasks.spawn(async move { service.predict(request).await })
    }

    /// Wait for every tracked prediction to reach a terminal state.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            tracing::info!(count = self.tasks.len(), "Waiting for in-flight predictions");
        }
        self.tasks.wait().await;
    }

    /// Run one prediction to a terminal state.
    ///
    /// The `running` record is on disk before the predictor starts and the
    /// terminal record is on disk before this returns.
    pub async fn predict(&self, request: PredictionRequest) -> PredictionResponse {
        let job_id = JobId::generate();
        let response = PredictionResponse::new(&job_id, &self.store.job_dir(&job_id));

        let job_dir = match self.store.create_job_dir(&job_id) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to create job directory");
                return response.errored(&e);
            }
        };

        let invocation = PredictorInvocation::for_request(&self.config.predictor, &request);
        let mut record = JobRecord::running(
            job_id.clone(),
            &request,
            &job_dir,
            &job_dir.join(serializer::INPUT_FILE),
            &self.store.output_dir(&job_id),
            invocation.command_line(),
        );
        let mut response = PredictionResponse {
            timestamp: record.created_at.clone(),
            ..response
        };

        let outcome = match self.start(&record, &request) {
            Ok(yaml) => {
                response.yaml_content = yaml;
                tracing::info!(
                    job_id = %job_id,
                    command = %record.command,
                    "Running predictor"
                );
                self.runner
                    .run(&invocation, &job_dir, self.config.timeout)
                    .await
                    .map_err(JobError::from)
            }
            Err(e) => Err(e),
        };

        let transition = match outcome {
            Ok(ProcessOutcome::Exited {
                code: 0,
                stdout,
                stderr,
            }) => {
                tracing::info!(job_id = %job_id, "Prediction completed");
                response.success = true;
                response.message = format!("Prediction completed successfully! Job ID: {job_id}");
                response.output = stdout.clone();
                record.complete(stdout, stderr)
            }
            Ok(ProcessOutcome::Exited {
                code,
                stdout,
                stderr,
            }) => {
                tracing::warn!(job_id = %job_id, code, "Predictor exited with failure");
                response.message =
                    format!("Prediction failed with return code {code}. Job ID: {job_id}");
                response.output = format!("STDOUT:\n{stdout}\n\nSTDERR:\n{stderr}");
                record.fail(code, stdout, stderr)
            }
            Ok(ProcessOutcome::TimedOut { after }) => {
                let detail = format!("Prediction timed out after {} seconds", after.as_secs());
                tracing::warn!(job_id = %job_id, timeout_secs = after.as_secs(), "Prediction timed out");
                response.message = format!("{detail}. Job ID: {job_id}");
                response.output = TIMEOUT_OUTPUT.to_string();
                record.time_out(detail)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Prediction failed to run");
                response = response.errored(&e);
                record.set_error(e.to_string())
            }
        };
        if let Err(e) = transition {
            tracing::error!(job_id = %job_id, error = %e, "Invalid job state transition");
        }

        if let Err(e) = self.store.put(&record) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to save terminal job record");
            return response.errored(&e);
        }
        response
    }

    /// Write the input, create the output directory and persist `running`.
    fn start(&self, record: &JobRecord, request: &PredictionRequest) -> Result<String, JobError> {
        let job_dir = self.store.job_dir(&record.job_id);
        let yaml = serializer::write_input(&job_dir, request)?;
        self.store.create_output_dir(&record.job_id)?;
        self.store.put(record)?;
        Ok(yaml)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.store.list_all()
    }

    fn existing(&self, id: &str) -> Result<JobId, LookupError> {
        JobId::parse(id)
            .filter(|id| self.store.exists(id))
            .ok_or(LookupError::JobNotFound)
    }

    /// Load a job's record. Unreadable records count as missing.
    pub fn job(&self, id: &str) -> Result<JobRecord, LookupError> {
        let id = self.existing(id)?;
        match self.store.get(&id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(LookupError::InfoNotFound),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to load job record");
                Err(LookupError::InfoNotFound)
            }
        }
    }

    pub fn results(&self, id: &str) -> Result<JobResults, LookupError> {
        let record = self.job(id)?;
        let job_dir = self.store.job_dir(&record.job_id);
        Ok(load_results(&job_dir, record, &self.layout))
    }

    /// Path of an allow-listed artifact by file name.
    pub fn artifact(&self, id: &str, file_name: &str) -> Result<PathBuf, LookupError> {
        let id = self.existing(id)?;
        let kind = ArtifactKind::from_file_name(file_name).ok_or(LookupError::FileNotAllowed)?;
        self.layout
            .locate(&self.store.job_dir(&id), kind)
            .ok_or(LookupError::FileNotFound)
    }

    pub fn structure(&self, id: &str) -> Result<(JobId, PathBuf), LookupError> {
        let id = self.existing(id)?;
        let path = self
            .layout
            .find_structure(&self.store.job_dir(&id))
            .ok_or(LookupError::StructureNotFound)?;
        Ok((id, path))
    }

    /// Build the job's ZIP archive off the async runtime.
    pub async fn archive(&self, id: &str) -> Result<(JobId, Vec<u8>), LookupError> {
        let record = self.job(id)?;
        let job_dir = self.store.job_dir(&record.job_id);
        let layout = self.layout.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            build_archive(&record.job_id, &job_dir, &record, &layout).map(|b| (record.job_id, b))
        })
        .await??;
        Ok(bytes)
    }
}
