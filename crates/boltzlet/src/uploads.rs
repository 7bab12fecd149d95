//! Storage for uploaded alignment and template files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// What a client is uploading; decides the accepted extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Msa,
    Template,
}

impl UploadKind {
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Msa => &["a3m"],
            Self::Template => &["cif", "pdb"],
        }
    }

    fn accepts(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.allowed_extensions().contains(&ext))
    }

    fn rejection(&self) -> &'static str {
        match self {
            Self::Msa => "Only .a3m files are allowed",
            Self::Template => "Only .cif and .pdb files are allowed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Rejected(&'static str),
    #[error("No file provided")]
    MissingFile,
    #[error("failed to store upload at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A stored upload, as reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| UploadError::Io {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` as `<YYYYMMDD_HHMMSS>_<basename>`.
    ///
    /// Directory components of the client-supplied name are dropped.
    pub fn save(
        &self,
        kind: UploadKind,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredUpload, UploadError> {
        let base = base_name(original_name).ok_or(UploadError::MissingFile)?;
        if !kind.accepts(base) {
            return Err(UploadError::Rejected(kind.rejection()));
        }

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{stamp}_{base}");
        let path = self.root.join(&filename);
        fs::write(&path, bytes).map_err(|e| UploadError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!(kind = ?kind, filename = %filename, size = bytes.len(), "Stored upload");
        Ok(StoredUpload {
            filename,
            path: path.display().to_string(),
        })
    }
}

/// Last path component of a client file name, accepting both separators.
fn base_name(name: &str) -> Option<&str> {
    name.rsplit(['/', '\\'])
        .next()
        .filter(|base| !base.is_empty() && *base != "." && *base != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allow_lists() {
        assert!(UploadKind::Msa.accepts("a.a3m"));
        assert!(!UploadKind::Msa.accepts("a.fasta"));
        assert!(!UploadKind::Msa.accepts("a3m"));
        assert!(UploadKind::Template.accepts("t.cif"));
        assert!(UploadKind::Template.accepts("t.pdb"));
        assert!(!UploadKind::Template.accepts("t.a3m"));
    }

    #[test]
    fn save_prefixes_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path().join("uploads")).unwrap();

        let stored = store.save(UploadKind::Msa, "chain_a.a3m", b">A\nMV\n").unwrap();
        let (stamp, rest) = stored.filename.split_at(15);
        assert_eq!(rest, "_chain_a.a3m");
        assert!(stamp.chars().all(|c| c.is_ascii_digit() || c == '_'));
        assert_eq!(fs::read(&stored.path).unwrap(), b">A\nMV\n");
    }

    #[test]
    fn save_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path().join("uploads")).unwrap();

        let stored = store
            .save(UploadKind::Template, "../../etc/evil.cif", b"data_")
            .unwrap();
        assert!(stored.filename.ends_with("_evil.cif"));
        assert_eq!(Path::new(&stored.path).parent().unwrap(), store.root());

        let windows = store
            .save(UploadKind::Template, r"C:\models\tmpl.pdb", b"ATOM")
            .unwrap();
        assert!(windows.filename.ends_with("_tmpl.pdb"));
    }

    #[test]
    fn save_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        let err = store.save(UploadKind::Msa, "x.txt", b"").unwrap_err();
        assert_eq!(err.to_string(), "Only .a3m files are allowed");
        assert!(matches!(
            store.save(UploadKind::Msa, "dir/", b""),
            Err(UploadError::MissingFile)
        ));
    }
}
