// ============================================================
// Layer 5 — Inference Engine Layer
// ============================================================
// Everything that knows about models lives here. Other layers
// only see the InferenceEngine trait and the Processor.
//
// What's in this layer:
//
//   config.rs    — EngineConfig: model source, pass-through
//                  engine kwargs, concurrency, batch size
//
//   engine.rs    — Backend selection and the two backends:
//                  • EchoEngine (deterministic, local)
//                  • OpenAiCompatEngine (HTTP chat completions,
//                    e.g. a vLLM server)
//
//   processor.rs — Builds engine replicas and wraps a Dataset
//                  with preprocess → generate → postprocess
//
// Reference: Rust Book §17 (Trait Objects)
//            Rust Book §16 (Fearless Concurrency)

/// Declarative engine configuration
pub mod config;

/// Engine backends and the default factory
pub mod engine;

/// The batch inference stage
pub mod processor;
