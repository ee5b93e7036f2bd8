// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer wires the other layers together for one goal
// (inspecting an input, or running batch inference over it).
//
// Rules for this layer:
//   - No model or HTTP code here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - No direct file access (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The preprocess / postprocess pair for chat prompts
pub mod callbacks;

// The batch inference workflow
pub mod inference_use_case;

// Schema and size of an input, no engine
pub mod inspect_use_case;
