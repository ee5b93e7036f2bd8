// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per inference batch.
//
// Metrics recorded per batch:
//   - batch:            running batch number (1, 2, 3, ...)
//   - rows:             records in the batch
//   - input_tokens:     prompt tokens summed over the batch
//   - generated_tokens: generated tokens summed over the batch
//   - elapsed_ms:       wall time the engine spent on the batch
//
// Output file: <metrics_dir>/batch_metrics.csv
//
// Example CSV output:
//   batch,rows,input_tokens,generated_tokens,elapsed_ms
//   1,64,1408,7040,812.400
//   2,64,1391,6988,797.113
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Mutex,
};
use serde::{Deserialize, Serialize};

use crate::domain::result::InferenceResult;

/// One row of metrics data for a single batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub batch:            usize,
    pub rows:             usize,
    pub input_tokens:     usize,
    pub generated_tokens: usize,
    pub elapsed_ms:       f64,
}

impl BatchMetrics {
    /// Summarise the results of one batch
    pub fn from_results(batch: usize, results: &[InferenceResult], elapsed_ms: f64) -> Self {
        Self {
            batch,
            rows:             results.len(),
            input_tokens:     results.iter().map(|r| r.num_input_tokens).sum(),
            generated_tokens: results.iter().map(|r| r.num_generated_tokens).sum(),
            elapsed_ms,
        }
    }

    /// Generated tokens per second, 0 when no time was measured
    pub fn tokens_per_sec(&self) -> f64 {
        if self.elapsed_ms <= 0.0 {
            return 0.0;
        }
        self.generated_tokens as f64 / (self.elapsed_ms / 1000.0)
    }
}

/// Appends batch metrics to a CSV file.
#[derive(Debug)]
pub struct MetricsLogger {
    csv_path: PathBuf,
    // Serialises appends from concurrent pipelines sharing a logger
    lock:     Mutex<()>,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create metrics dir '{}'", dir.display()))?;

        let csv_path = dir.join("batch_metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "batch,rows,input_tokens,generated_tokens,elapsed_ms")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path, lock: Mutex::new(()) })
    }

    /// Append one batch as a new row
    pub fn log(&self, m: &BatchMetrics) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("metrics lock poisoned"))?;

        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{},{},{:.3}",
            m.batch,
            m.rows,
            m.input_tokens,
            m.generated_tokens,
            m.elapsed_ms,
        )?;

        tracing::debug!(
            "Batch {}: {} rows, {:.1} tok/s",
            m.batch,
            m.rows,
            m.tokens_per_sec(),
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
