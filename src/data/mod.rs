// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between files on disk and the inference stage,
// and between the inference stage and files on disk again.
//
//   prompts.txt / *.jsonl
//       │
//       ▼
//   Loader            → lists files, builds a lazy Dataset
//       │
//       ▼
//   Dataset           → plan; runs only on count/take/write
//       │
//       ▼
//   RecordBatcher     → groups rows for the engine
//       │
//       ▼
//   (ml::Processor)   → preprocess, generate, postprocess
//       │
//       ▼
//   JsonlWriter       → part files + manifest
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Reads text and JSONL files into lazy datasets
pub mod loader;

/// The lazy Dataset plan and its consuming operations
pub mod dataset;

/// Best-effort column descriptions
pub mod schema;

/// Groups a row stream into engine batches
pub mod batcher;

/// Writes datasets out as JSON Lines part files
pub mod writer;
