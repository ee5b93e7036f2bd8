// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what flows
// through a batch inference run.
//
// Rules for this layer:
//   - NO file or network I/O
//   - NO engine-specific code
//   - Only data types and the traits other layers implement
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A dataset row
pub mod record;

// Chat messages and sampling parameters
pub mod request;

// Generated text plus usage metadata
pub mod result;

// Engine trait and callback types
pub mod traits;
