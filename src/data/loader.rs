// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Turns a source locator into a lazy Dataset.
//
// Supported formats:
//   Text  → one record per non-empty line: {"text": <line>}
//   Jsonl → one JSON object per non-empty line
//
// The locator may be a single file or a directory. A directory
// is read file by file in sorted name order; hidden files and
// files starting with '_' (e.g. `_manifest.json`) are skipped.
//
// Only the file listing happens eagerly, so a missing path
// fails straight away. The files themselves are opened when
// the dataset is executed, one at a time, and read line by
// line with a BufReader, so a dataset much larger than
// memory streams fine.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (Reading a File)
//            std::io::BufRead documentation

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::data::dataset::{Dataset, RowIter};
use crate::data::schema::Schema;
use crate::domain::record::Record;
use crate::infra::context::RuntimeContext;

/// On-disk layout of the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    Jsonl,
}

/// Reads datasets from the local filesystem.
pub struct Loader {
    context: Arc<RuntimeContext>,
}

impl Loader {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self { context }
    }

    pub fn read_text(&self, path: impl AsRef<Path>) -> Result<Dataset> {
        self.read(path, Format::Text)
    }

    pub fn read_jsonl(&self, path: impl AsRef<Path>) -> Result<Dataset> {
        self.read(path, Format::Jsonl)
    }

    pub fn read(&self, path: impl AsRef<Path>, format: Format) -> Result<Dataset> {
        let path  = path.as_ref();
        let files = resolve_files(path)?;

        if files.is_empty() {
            tracing::warn!("'{}' contains no readable files; dataset is empty", path.display());
        }

        let schema = match format {
            Format::Text  => Some(Schema::text()),
            Format::Jsonl => peek_jsonl_schema(&files),
        };

        tracing::info!(
            "Reading {} file(s) from '{}' as {:?}",
            files.len(),
            path.display(),
            format
        );

        let files = Arc::new(files);
        Ok(Dataset::from_plan(Arc::clone(&self.context), schema, move || {
            let rows: RowIter = Box::new(LineRecords::new(files.to_vec(), format));
            Ok(rows)
        }))
    }
}

/// Expand a locator into the list of files to read
fn resolve_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("input path '{}' does not exist", path.display());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("Cannot read directory '{}'", path.display()))?
    {
        let p = entry?.path();
        let skip = p
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.') || n.starts_with('_'));
        if p.is_file() && !skip {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

/// Schema of the first JSONL record, if it can be read
fn peek_jsonl_schema(files: &[PathBuf]) -> Option<Schema> {
    let first = files.first()?;
    let file  = File::open(first).ok()?;
    for line in BufReader::new(file).lines() {
        let line = line.ok()?;
        if line.trim().is_empty() {
            continue;
        }
        return match parse_line(&line, Format::Jsonl) {
            Ok(r)  => Some(Schema::infer(&r)),
            Err(e) => {
                tracing::debug!("Could not infer schema from '{}': {e:#}", first.display());
                None
            }
        };
    }
    None
}

fn parse_line(line: &str, format: Format) -> Result<Record> {
    match format {
        Format::Text  => Ok(Record::from_text(line)),
        Format::Jsonl => {
            let value: serde_json::Value = serde_json::from_str(line)?;
            Record::try_from(value)
        }
    }
}

struct OpenFile {
    path:    PathBuf,
    lines:   Lines<BufReader<File>>,
    line_no: usize,
}

/// Streams records out of a list of files, one line at a time.
/// Stops after the first error.
struct LineRecords {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<OpenFile>,
    format:  Format,
    failed:  bool,
}

impl LineRecords {
    fn new(files: Vec<PathBuf>, format: Format) -> Self {
        Self { pending: files.into_iter(), current: None, format, failed: false }
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<Record>> {
        self.failed  = true;
        self.current = None;
        Some(Err(err))
    }
}

impl Iterator for LineRecords {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if self.current.is_none() {
                let path = self.pending.next()?;
                match File::open(&path) {
                    Ok(f) => {
                        tracing::debug!("Opened '{}'", path.display());
                        self.current = Some(OpenFile {
                            path,
                            lines: BufReader::new(f).lines(),
                            line_no: 0,
                        });
                    }
                    Err(e) => {
                        let err = anyhow::Error::new(e)
                            .context(format!("Cannot open '{}'", path.display()));
                        return self.fail(err);
                    }
                }
            }

            let file = self.current.as_mut()?;
            let next = file.lines.next();
            file.line_no += 1;

            match next {
                None => {
                    self.current = None;
                }
                Some(Err(e)) => {
                    let location = format!("{}:{}", file.path.display(), file.line_no);
                    let err = anyhow::Error::new(e).context(format!("Cannot read {location}"));
                    return self.fail(err);
                }
                Some(Ok(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_line(line, self.format) {
                        Ok(record) => return Some(Ok(record)),
                        Err(e) => {
                            let location = format!("{}:{}", file.path.display(), file.line_no);
                            return self.fail(e.context(format!("Malformed record at {location}")));
                        }
                    }
                }
            }
        }
    }
}
