// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several other layers:
//
//   context.rs         — Run-wide settings passed explicitly to
//                        the loader and carried to the writer.
//
//   version.rs         — Minimum runtime version precondition,
//                        checked before any I/O.
//
//   tokenizer_store.rs — Token counting for usage metadata,
//                        via a Hugging Face tokenizer.json or
//                        plain whitespace splitting.
//
//   metrics.rs         — Per-batch metrics CSV.
//
//   manifest.rs        — `_manifest.json` describing the part
//                        files of a durable write.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Run-wide context (progress, file roll-over)
pub mod context;

/// Runtime version parsing and the minimum-version check
pub mod version;

/// Tokenizer loading and token counting
pub mod tokenizer_store;

/// Batch metrics CSV logger
pub mod metrics;

/// Output directory manifest
pub mod manifest;
