// ============================================================
// Layer 4 — JSON Lines Writer
// ============================================================
// Durable consumer at the end of the pipeline. Executes the
// dataset once and streams every record to disk:
//
//   out/
//     part-00000.jsonl   ← first max_rows_per_file records
//     part-00001.jsonl   ← next batch, and so on
//     _manifest.json     ← written last, lists the parts
//
// There is no single-file output and no ordering promise
// across parts. If the run fails midway, the parts already
// flushed stay on disk and no manifest is written.
//
// Reference: Rust Book §12 (Writing to Files)
//            serde_json::to_writer documentation

use anyhow::{ensure, Context, Result};
use serde_json::{Map, Value};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
};

use crate::data::dataset::Dataset;
use crate::domain::record::Record;
use crate::infra::context::RuntimeContext;
use crate::infra::manifest::{ManifestStore, PartFile, WriteSummary};

pub struct JsonlWriter {
    context:  Arc<RuntimeContext>,
    metadata: Map<String, Value>,
}

impl JsonlWriter {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self { context, metadata: Map::new() }
    }

    /// Attach a metadata entry to the manifest
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Execute `ds` and write every record under `dest`
    pub fn write(&self, ds: &Dataset, dest: impl AsRef<Path>) -> Result<WriteSummary> {
        let dest = dest.as_ref();
        let max_rows = self.context.options().max_rows_per_file;
        ensure!(max_rows > 0, "max_rows_per_file must be greater than 0");

        fs::create_dir_all(dest)
            .with_context(|| format!("Cannot create output directory '{}'", dest.display()))?;

        let mut files: Vec<PartFile> = Vec::new();
        let mut slot: Option<PartWriter> = None;

        for row in ds.iter()? {
            let row = row?;
            let mut part = match slot.take() {
                Some(p) if p.rows < max_rows => p,
                Some(p) => {
                    files.push(p.finish()?);
                    PartWriter::create(dest, files.len())?
                }
                None => PartWriter::create(dest, files.len())?,
            };
            part.write(&row)?;
            slot = Some(part);
        }
        if let Some(p) = slot {
            files.push(p.finish()?);
        }

        let summary = WriteSummary {
            total_rows: files.iter().map(|f| f.rows).sum(),
            files,
            metadata:   self.metadata.clone(),
        };
        ManifestStore::new(dest).save(&summary)?;

        tracing::info!(
            "Wrote {} rows in {} file(s) to '{}'",
            summary.total_rows,
            summary.files.len(),
            dest.display()
        );
        Ok(summary)
    }
}

struct PartWriter {
    name: String,
    out:  BufWriter<File>,
    rows: usize,
}

impl PartWriter {
    fn create(dir: &Path, index: usize) -> Result<Self> {
        let name = format!("part-{index:05}.jsonl");
        let path = dir.join(&name);
        let file = File::create(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        tracing::debug!("Opened part file '{}'", path.display());
        Ok(Self { name, out: BufWriter::new(file), rows: 0 })
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<PartFile> {
        self.out
            .flush()
            .with_context(|| format!("Cannot flush '{}'", self.name))?;
        Ok(PartFile { name: self.name, rows: self.rows })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::Loader;
    use crate::infra::context::ContextOptions;

    fn ctx(max_rows_per_file: usize) -> Arc<RuntimeContext> {
        RuntimeContext::init(ContextOptions { max_rows_per_file, ..Default::default() })
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::from_text(format!("row {i}")).with("id", i)).collect()
    }

    #[test]
    fn test_rolls_over_into_parts() {
        let dir = tempfile::tempdir().unwrap();
        let c   = ctx(2);
        let ds  = Dataset::from_records(c.clone(), records(5));

        let summary = JsonlWriter::new(c).write(&ds, dir.path()).unwrap();
        let names: Vec<&str> = summary.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["part-00000.jsonl", "part-00001.jsonl", "part-00002.jsonl"]);
        assert_eq!(summary.total_rows, 5);
        assert_eq!(summary.files[2].rows, 1);

        let first = fs::read_to_string(dir.path().join("part-00000.jsonl")).unwrap();
        assert_eq!(first.lines().count(), 2);
    }

    #[test]
    fn test_manifest_records_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let c   = ctx(100);
        let ds  = Dataset::from_records(c.clone(), records(3));

        JsonlWriter::new(c)
            .with_metadata("model_source", "echo")
            .write(&ds, dir.path())
            .unwrap();

        let manifest = ManifestStore::new(dir.path()).load().unwrap();
        assert_eq!(manifest.total_rows, 3);
        assert_eq!(manifest.metadata.get("model_source"), Some(&Value::from("echo")));
    }

    #[test]
    fn test_output_reads_back_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let c   = ctx(100);
        let ds  = Dataset::from_records(c.clone(), records(4));
        JsonlWriter::new(c.clone()).write(&ds, dir.path()).unwrap();

        let back = Loader::new(c).read_jsonl(dir.path()).unwrap();
        assert_eq!(back.count().unwrap(), 4);
    }

    #[test]
    fn test_empty_dataset_writes_manifest_only() {
        let dir = tempfile::tempdir().unwrap();
        let c   = ctx(10);
        let ds  = Dataset::from_records(c.clone(), Vec::new());

        let summary = JsonlWriter::new(c).write(&ds, dir.path()).unwrap();
        assert!(summary.files.is_empty());
        assert!(dir.path().join("_manifest.json").exists());
    }
}
