//! Job identity and the persisted job record.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::{EntityType, PredictionRequest};

/// Every job directory name starts with this.
pub const JOB_PREFIX: &str = "job_";

/// Longest SMILES string copied into a record summary.
const SUMMARY_SMILES_MAX: usize = 256;

/// Disambiguates ids generated at the same clock reading.
static ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// `job_<YYYYMMDD>_<HHMMSS>_<hash8>`.
///
/// Sorts by creation second. The hash covers the timestamp, the sub-second
/// clock reading and a process-wide sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    fn generate_at(now: DateTime<Utc>) -> Self {
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        let hash_input = format!("{}_{}_{}", timestamp, now.timestamp_subsec_nanos(), seq);
        let digest = hex::encode(Sha256::digest(hash_input.as_bytes()));
        Self(format!("{}{}_{}", JOB_PREFIX, timestamp, &digest[..8]))
    }

    /// Accepts names following the job naming convention only, so a parsed
    /// id is always a single safe path component.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(JOB_PREFIX)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only `running` may move, and only to a terminal state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(self, Self::Running) && target.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Compact projection of one request entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccd: Option<String>,
}

pub fn summarize(request: &PredictionRequest) -> Vec<EntitySummary> {
    request
        .sequences
        .iter()
        .map(|entity| EntitySummary {
            entity_type: entity.entity_type,
            id: entity.id.first().to_string(),
            sequence_length: entity
                .sequence
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| s.chars().count()),
            smiles: entity
                .smiles
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| s.chars().take(SUMMARY_SMILES_MAX).collect()),
            ccd: entity.ccd.clone().filter(|s| !s.is_empty()),
        })
        .collect()
}

/// RFC 3339 in UTC with fixed microsecond precision, so string order matches
/// time order.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Contents of `job_info.json`; the only source of truth for a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub status: JobStatus,
    #[serde(alias = "timestamp")]
    pub created_at: String,
    #[serde(
        default,
        alias = "completion_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntitySummary>,
    #[serde(default)]
    pub has_affinity: bool,
    pub job_dir: String,
    pub yaml_file: String,
    pub output_dir: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// A fresh record in `running` state. Nothing is written until the store
    /// persists it.
    pub fn running(
        job_id: JobId,
        request: &PredictionRequest,
        job_dir: &Path,
        yaml_file: &Path,
        output_dir: &Path,
        command: String,
    ) -> Self {
        Self {
            job_id,
            job_name: request.job_name.clone(),
            status: JobStatus::Running,
            created_at: now_rfc3339(),
            completed_at: None,
            entities: summarize(request),
            has_affinity: request.has_affinity(),
            job_dir: job_dir.display().to_string(),
            yaml_file: yaml_file.display().to_string(),
            output_dir: output_dir.display().to_string(),
            command,
            return_code: None,
            stdout: None,
            stderr: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.completed_at = Some(now_rfc3339());
        Ok(())
    }

    /// Predictor exited with status zero.
    pub fn complete(&mut self, stdout: String, stderr: String) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.return_code = Some(0);
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        Ok(())
    }

    /// Predictor exited with a non-zero status.
    pub fn fail(
        &mut self,
        return_code: i32,
        stdout: String,
        stderr: String,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.return_code = Some(return_code);
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        Ok(())
    }

    pub fn time_out(&mut self, detail: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Timeout)?;
        self.error = Some(detail.into());
        Ok(())
    }

    pub fn set_error(&mut self, detail: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Error)?;
        self.error = Some(detail.into());
        Ok(())
    }
}
