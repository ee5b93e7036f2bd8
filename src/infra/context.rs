// ============================================================
// Layer 6 — Runtime Context
// ============================================================
// Holds the settings that apply to a whole run, as an explicit
// value rather than process-wide globals:
//
//   enable_progress_bars → log rows processed after every wave
//   max_rows_per_file    → roll-over threshold for the writer
//
// Lifecycle:
//
//   let ctx = RuntimeContext::init(ContextOptions::default());
//   let ds  = Loader::new(ctx.clone()).read_text("prompts.txt")?;
//   ...
//   ctx.shutdown();
//
// Datasets keep an Arc to the context they were loaded with,
// so the consumer at the end of the pipeline sees the same
// settings as the loader at the start.
//
// Reference: Rust Book §15 (Rc<T> / Arc<T>), §16 (Shared-State Concurrency)

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

/// Run-wide options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub enable_progress_bars: bool,
    pub max_rows_per_file:    usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            max_rows_per_file:    10_000,
        }
    }
}

#[derive(Debug)]
pub struct RuntimeContext {
    options:        ContextOptions,
    started:        Instant,
    rows_processed: AtomicU64,
}

impl RuntimeContext {
    /// Acquire a context for one run
    pub fn init(options: ContextOptions) -> Arc<Self> {
        tracing::debug!(
            "Runtime context initialised (progress={}, max_rows_per_file={})",
            options.enable_progress_bars,
            options.max_rows_per_file,
        );
        Arc::new(Self {
            options,
            started:        Instant::now(),
            rows_processed: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Add to the run-wide processed-row counter, returning the new total
    pub fn record_processed(&self, rows: usize) -> u64 {
        self.rows_processed.fetch_add(rows as u64, Ordering::Relaxed) + rows as u64
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    /// Release the context at the end of a run.
    /// Datasets still alive elsewhere keep their own reference.
    pub fn shutdown(self: Arc<Self>) {
        let others = Arc::strong_count(&self) - 1;
        if others > 0 {
            tracing::debug!("Runtime context shut down with {others} dataset handle(s) still alive");
        }
        tracing::info!(
            "Run finished: {} rows processed in {:.2}s",
            self.rows_processed(),
            self.started.elapsed().as_secs_f64(),
        );
    }
}
