// ============================================================
// Layer 6 — Output Manifest
// ============================================================
// After a durable write finishes, a `_manifest.json` is saved
// next to the part files:
//
//   out/
//     part-00000.jsonl
//     part-00001.jsonl
//     _manifest.json   ← file list, row counts, run metadata
//
// The manifest is written last, so its presence means every
// listed part was fully flushed. A crashed run leaves parts
// but no manifest.
//
// Reference: Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::PathBuf};

pub const MANIFEST_FILE: &str = "_manifest.json";

/// One written part file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartFile {
    pub name: String,
    pub rows: usize,
}

/// Summary of a completed write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub files:      Vec<PartFile>,
    pub total_rows: usize,
    /// Free-form run metadata (engine config snapshot, runtime version)
    #[serde(default)]
    pub metadata:   Map<String, Value>,
}

/// Saves and loads the manifest of an output directory.
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn save(&self, summary: &WriteSummary) -> Result<()> {
        let path = self.path();
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write manifest to '{}'", path.display()))?;
        tracing::debug!("Saved manifest to '{}'", path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<WriteSummary> {
        let path = self.path();
        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!(
                    "Cannot read manifest from '{}'. Did the write finish?",
                    path.display()
                )
            })?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_then_load() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());

        let mut summary = WriteSummary {
            files:      vec![PartFile { name: "part-00000.jsonl".into(), rows: 3 }],
            total_rows: 3,
            metadata:   Map::new(),
        };
        summary.metadata.insert("model_source".into(), json!("echo"));

        store.save(&summary).unwrap();
        assert_eq!(store.load().unwrap(), summary);
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ManifestStore::new(dir.path()).load().unwrap_err().to_string();
        assert!(err.contains("Did the write finish?"));
    }
}
