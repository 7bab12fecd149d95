//! Result artifact lookup and summary formatting.
//!
//! The predictor's output layout differs between releases, so every artifact
//! is found by probing the candidate paths in [`ArtifactLayout`] in order.
//! Missing artifacts are `None`, never an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::job::JobRecord;
use crate::serializer::INPUT_FILE;
use crate::store::OUTPUT_DIR;

const PREDICTION_SUBDIR: &str = "boltz_output/boltz_results_boltz_input/predictions/boltz_input";
const AFFINITY_FILE: &str = "affinity_boltz_input.json";
const CONFIDENCE_FILE: &str = "confidence_boltz_input_model_0.json";

/// Artifacts a client may ask for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    InputEcho,
    Affinity,
    Confidence,
    Structure,
}

impl ArtifactKind {
    /// Map a requested file name to an artifact. This is the file endpoint's
    /// allow-list: anything else is refused.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            INPUT_FILE => Some(Self::InputEcho),
            AFFINITY_FILE => Some(Self::Affinity),
            CONFIDENCE_FILE => Some(Self::Confidence),
            _ => None,
        }
    }
}

/// Candidate locations of each artifact, relative to the job directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    input_echo: Vec<PathBuf>,
    affinity: Vec<PathBuf>,
    confidence: Vec<PathBuf>,
    structure: Vec<PathBuf>,
    /// Fall back to a recursive `*.pdb` search under the output directory.
    search_structures: bool,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        let in_three = |file: &str| {
            vec![
                Path::new(OUTPUT_DIR).join(file),
                Path::new(PREDICTION_SUBDIR).join(file),
                PathBuf::from(file),
            ]
        };
        Self {
            input_echo: in_three(INPUT_FILE),
            affinity: in_three(AFFINITY_FILE),
            confidence: in_three(CONFIDENCE_FILE),
            structure: vec![
                Path::new(OUTPUT_DIR).join("boltz_input.pdb"),
                Path::new(PREDICTION_SUBDIR).join("boltz_input.pdb"),
                Path::new(PREDICTION_SUBDIR).join("boltz_input_model_0.pdb"),
                Path::new(OUTPUT_DIR).join("boltz_input_model_0.pdb"),
            ],
            search_structures: true,
        }
    }
}

impl ArtifactLayout {
    /// Replace the candidate list for one artifact kind.
    pub fn with_candidates(mut self, kind: ArtifactKind, candidates: Vec<PathBuf>) -> Self {
        *self.candidates_mut(kind) = candidates;
        self
    }

    pub fn with_structure_search(mut self, enabled: bool) -> Self {
        self.search_structures = enabled;
        self
    }

    pub fn candidates(&self, kind: ArtifactKind) -> &[PathBuf] {
        match kind {
            ArtifactKind::InputEcho => &self.input_echo,
            ArtifactKind::Affinity => &self.affinity,
            ArtifactKind::Confidence => &self.confidence,
            ArtifactKind::Structure => &self.structure,
        }
    }

    fn candidates_mut(&mut self, kind: ArtifactKind) -> &mut Vec<PathBuf> {
        match kind {
            ArtifactKind::InputEcho => &mut self.input_echo,
            ArtifactKind::Affinity => &mut self.affinity,
            ArtifactKind::Confidence => &mut self.confidence,
            ArtifactKind::Structure => &mut self.structure,
        }
    }

    /// First existing candidate for `kind`.
    pub fn locate(&self, job_dir: &Path, kind: ArtifactKind) -> Option<PathBuf> {
        let found = self
            .candidates(kind)
            .iter()
            .map(|rel| job_dir.join(rel))
            .find(|path| path.is_file());
        match (found, kind) {
            (Some(path), _) => Some(path),
            (None, ArtifactKind::Structure) if self.search_structures => {
                search_structure(&job_dir.join(OUTPUT_DIR))
            }
            (None, _) => None,
        }
    }

    pub fn find_structure(&self, job_dir: &Path) -> Option<PathBuf> {
        self.locate(job_dir, ArtifactKind::Structure)
    }
}

/// First `*.pdb` under `root` by path order.
fn search_structure(root: &Path) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .find(|path| path.extension().is_some_and(|ext| ext == "pdb"))
}

/// Flat summary of headline metrics plus the untouched payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedResults {
    pub summary: Map<String, Value>,
    pub detailed: Value,
}

fn payload(data: &Value) -> Option<&Map<String, Value>> {
    data.as_object().filter(|obj| !obj.is_empty())
}

/// Lift `affinity`, `affinity_confidence` and `units` into the summary.
pub fn format_affinity(data: &Value) -> Option<FormattedResults> {
    let obj = payload(data)?;
    let mut summary = Map::new();
    for (from, to) in [
        ("affinity", "binding_affinity"),
        ("affinity_confidence", "confidence"),
        ("units", "units"),
    ] {
        if let Some(value) = obj.get(from) {
            summary.insert(to.to_string(), value.clone());
        }
    }
    Some(FormattedResults {
        summary,
        detailed: data.clone(),
    })
}

/// Summarize the `confidence` entry.
///
/// A nested object contributes `overall_confidence` and, when `per_residue`
/// is a non-empty list of numbers, its mean, min and max. Any other value is
/// reported as `confidence_score`.
pub fn format_confidence(data: &Value) -> Option<FormattedResults> {
    let obj = payload(data)?;
    let mut summary = Map::new();
    match obj.get("confidence") {
        Some(Value::Object(conf)) => {
            if let Some(overall) = conf.get("overall") {
                summary.insert("overall_confidence".to_string(), overall.clone());
            }
            if let Some(stats) = conf.get("per_residue").and_then(residue_stats) {
                summary.insert("mean_confidence".to_string(), stats.mean.into());
                summary.insert("min_confidence".to_string(), stats.min.into());
                summary.insert("max_confidence".to_string(), stats.max.into());
            }
        }
        Some(score) => {
            summary.insert("confidence_score".to_string(), score.clone());
        }
        None => {}
    }
    Some(FormattedResults {
        summary,
        detailed: data.clone(),
    })
}

struct ResidueStats {
    mean: f64,
    min: f64,
    max: f64,
}

/// `None` unless `values` is a non-empty array of numbers.
fn residue_stats(values: &Value) -> Option<ResidueStats> {
    let values = values
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()?;
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(ResidueStats {
        mean: sum / values.len() as f64,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Job record plus whatever result summaries could be produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job_info: JobRecord,
    pub affinity_results: Option<FormattedResults>,
    pub confidence_results: Option<FormattedResults>,
}

/// Best-effort load of the affinity and confidence outputs.
pub fn load_results(job_dir: &Path, record: JobRecord, layout: &ArtifactLayout) -> JobResults {
    let read = |kind| {
        layout
            .locate(job_dir, kind)
            .and_then(|path| read_json(&path))
    };
    JobResults {
        affinity_results: read(ArtifactKind::Affinity).as_ref().and_then(format_affinity),
        confidence_results: read(ArtifactKind::Confidence)
            .as_ref()
            .and_then(format_confidence),
        job_info: record,
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read result file");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Malformed result file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn touch(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn allow_list_is_exact() {
        assert_eq!(
            ArtifactKind::from_file_name("boltz_input.yaml"),
            Some(ArtifactKind::InputEcho)
        );
        assert_eq!(
            ArtifactKind::from_file_name("affinity_boltz_input.json"),
            Some(ArtifactKind::Affinity)
        );
        assert_eq!(
            ArtifactKind::from_file_name("confidence_boltz_input_model_0.json"),
            Some(ArtifactKind::Confidence)
        );
        assert_eq!(ArtifactKind::from_file_name("job_info.json"), None);
        assert_eq!(ArtifactKind::from_file_name("../job_info.json"), None);
        assert_eq!(ArtifactKind::from_file_name("boltz_input.pdb"), None);
    }

    #[test]
    fn locate_prefers_earlier_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::default();
        assert_eq!(layout.locate(dir.path(), ArtifactKind::Affinity), None);

        let root = touch(dir.path(), AFFINITY_FILE, "{}");
        assert_eq!(layout.locate(dir.path(), ArtifactKind::Affinity), Some(root));

        let nested = touch(
            dir.path(),
            &format!("{PREDICTION_SUBDIR}/{AFFINITY_FILE}"),
            "{}",
        );
        assert_eq!(layout.locate(dir.path(), ArtifactKind::Affinity), Some(nested));

        let output = touch(dir.path(), &format!("boltz_output/{AFFINITY_FILE}"), "{}");
        assert_eq!(layout.locate(dir.path(), ArtifactKind::Affinity), Some(output));
    }

    #[test]
    fn structure_falls_back_to_search() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::default();
        assert_eq!(layout.find_structure(dir.path()), None);

        touch(dir.path(), "boltz_output/zzz/other.pdb", "ATOM");
        let first = touch(dir.path(), "boltz_output/aaa/model.pdb", "ATOM");
        touch(dir.path(), "boltz_output/aaa/model.cif", "data_");
        assert_eq!(layout.find_structure(dir.path()), Some(first));

        let candidate = touch(
            dir.path(),
            &format!("{PREDICTION_SUBDIR}/boltz_input_model_0.pdb"),
            "ATOM",
        );
        assert_eq!(layout.find_structure(dir.path()), Some(candidate));

        let no_search = ArtifactLayout::default()
            .with_structure_search(false)
            .with_candidates(ArtifactKind::Structure, vec![]);
        assert_eq!(no_search.find_structure(dir.path()), None);
    }

    #[test]
    fn affinity_summary() {
        let data = json!({"affinity": -7.2, "affinity_confidence": 0.81, "units": "kcal/mol", "extra": 1});
        let formatted = format_affinity(&data).unwrap();
        assert_eq!(
            Value::Object(formatted.summary),
            json!({"binding_affinity": -7.2, "confidence": 0.81, "units": "kcal/mol"})
        );
        assert_eq!(formatted.detailed, data);

        assert_eq!(format_affinity(&json!([1, 2])), None);
        assert_eq!(format_affinity(&json!({})), None);
    }

    #[test]
    fn confidence_statistics() {
        let data = json!({"confidence": {"overall": 0.9, "per_residue": [0.2, 0.4, 0.6]}});
        let summary = format_confidence(&data).unwrap().summary;
        assert_eq!(summary["overall_confidence"], json!(0.9));
        assert!((summary["mean_confidence"].as_f64().unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(summary["min_confidence"], json!(0.2));
        assert_eq!(summary["max_confidence"], json!(0.6));
    }

    #[test]
    fn confidence_tolerates_scalars_and_bad_lists() {
        let scalar = format_confidence(&json!({"confidence": 0.77})).unwrap();
        assert_eq!(scalar.summary["confidence_score"], json!(0.77));

        let empty = format_confidence(&json!({"confidence": {"per_residue": []}})).unwrap();
        assert!(empty.summary.is_empty());

        let mixed = format_confidence(&json!({"confidence": {"per_residue": [0.1, "x"]}})).unwrap();
        assert!(mixed.summary.is_empty());

        let other = format_confidence(&json!({"confidence_score": 0.5})).unwrap();
        assert!(other.summary.is_empty());
        assert_eq!(format_confidence(&json!("nope")), None);
    }

    #[test]
    fn load_results_skips_malformed_files() {
        use crate::job::JobId;
        use crate::request::PredictionRequest;

        let dir = tempfile::tempdir().unwrap();
        let request: PredictionRequest = serde_json::from_value(json!({
            "sequences": [{"entity_type": "protein", "id": "A", "sequence": "MV"}]
        }))
        .unwrap();
        let record = JobRecord::running(
            JobId::generate(),
            &request,
            dir.path(),
            &dir.path().join(INPUT_FILE),
            &dir.path().join(OUTPUT_DIR),
            "boltz".to_string(),
        );

        touch(dir.path(), &format!("boltz_output/{AFFINITY_FILE}"), "{ broken");
        touch(
            dir.path(),
            &format!("boltz_output/{CONFIDENCE_FILE}"),
            r#"{"confidence": 0.5}"#,
        );

        let results = load_results(dir.path(), record.clone(), &ArtifactLayout::default());
        assert_eq!(results.job_info, record);
        assert_eq!(results.affinity_results, None);
        assert_eq!(
            results.confidence_results.unwrap().summary["confidence_score"],
            json!(0.5)
        );
    }
}
