//! Downloadable ZIP bundle of a job's metadata, inputs and results.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::job::{JobId, JobRecord};
use crate::results::{ArtifactKind, ArtifactLayout, load_results};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {name}: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Build the archive in memory.
///
/// Entry names are prefixed with the job id. The record and the formatted
/// results are always present; artifacts and logs only when they exist.
pub fn build_archive(
    job_id: &JobId,
    job_dir: &Path,
    record: &JobRecord,
    layout: &ArtifactLayout,
) -> Result<Vec<u8>, ArchiveError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut write_entry = |name: String, bytes: &[u8]| -> Result<(), ArchiveError> {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes).map_err(|e| ArchiveError::Io { path: name, source: e })
    };

    write_entry(format!("{job_id}_job_info.json"), &to_json("job_info", record)?)?;

    for (kind, name) in [
        (ArtifactKind::InputEcho, format!("{job_id}_boltz_input.yaml")),
        (ArtifactKind::Structure, format!("{job_id}.pdb")),
        (ArtifactKind::Affinity, format!("{job_id}_affinity.json")),
        (ArtifactKind::Confidence, format!("{job_id}_confidence.json")),
    ] {
        if let Some(path) = layout.locate(job_dir, kind) {
            let bytes = fs::read(&path).map_err(|e| ArchiveError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            write_entry(name, &bytes)?;
        }
    }

    let results = load_results(job_dir, record.clone(), layout);
    write_entry(
        format!("{job_id}_formatted_results.json"),
        &to_json("formatted_results", &results)?,
    )?;

    for (suffix, log) in [
        ("stdout", &record.stdout),
        ("stderr", &record.stderr),
        ("error", &record.error),
    ] {
        if let Some(text) = log {
            write_entry(format!("{job_id}_{suffix}.log"), text.as_bytes())?;
        }
    }

    let bytes = zip.finish()?.into_inner();
    tracing::debug!(job_id = %job_id, size = bytes.len(), "Built results archive");
    Ok(bytes)
}

fn to_json<T: serde::Serialize>(name: &str, value: &T) -> Result<Vec<u8>, ArchiveError> {
    serde_json::to_vec_pretty(value).map_err(|e| ArchiveError::Json {
        name: name.to_string(),
        source: e,
    })
}
