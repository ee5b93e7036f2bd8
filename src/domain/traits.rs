// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams of the pipeline:
//
//   InferenceEngine → anything that turns a batch of requests
//                     into a batch of results
//                     (EchoEngine, OpenAiCompatEngine, test stubs)
//
//   PreprocessFn    → Record → InferenceRequest
//   PostprocessFn   → (Record, InferenceResult) → Record
//
// The callbacks are shared across worker threads, so they are
// `Arc<dyn Fn + Send + Sync>`: no `&mut` state, callable any
// number of times, in any order, on any thread.
//
// Reference: Rust Book §10 (Traits), §13 (Closures), §16 (Send and Sync)

use std::sync::Arc;

use anyhow::Result;

use crate::domain::{record::Record, request::InferenceRequest, result::InferenceResult};

// ─── InferenceEngine ──────────────────────────────────────────────────────────
/// One model replica.
///
/// Implementations:
///   - EchoEngine         → deterministic local stub
///   - OpenAiCompatEngine → external OpenAI-compatible HTTP server
pub trait InferenceEngine: Send + Sync {
    /// Identifier of the loaded model
    fn model_id(&self) -> &str;

    /// Run one batch. Must return exactly one result per request,
    /// in request order.
    fn generate(&self, requests: &[InferenceRequest]) -> Result<Vec<InferenceResult>>;
}

/// Record → structured request
pub type PreprocessFn = Arc<dyn Fn(&Record) -> Result<InferenceRequest> + Send + Sync>;

/// Record with engine columns merged in + the raw result → output record
pub type PostprocessFn = Arc<dyn Fn(Record, InferenceResult) -> Result<Record> + Send + Sync>;
