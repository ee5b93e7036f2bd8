// ============================================================
// Layer 3 — Inference Result Domain Type
// ============================================================
// What an engine hands back for one request. Besides the
// generated text it carries usage metadata, which is merged
// into the record as extra columns before postprocess runs:
//
//   generated_text, prompt, num_input_tokens,
//   num_generated_tokens, time_taken_llm
//
// Reference: Rust Book §5 (Structs)

use serde::{Deserialize, Serialize};

use crate::domain::record::Record;

pub const GENERATED_TEXT_FIELD: &str = "generated_text";
pub const PROMPT_FIELD: &str = "prompt";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub generated_text: String,

    /// The prompt as the engine saw it
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub num_input_tokens: usize,

    #[serde(default)]
    pub num_generated_tokens: usize,

    /// Seconds spent in the engine for the batch this request rode in
    #[serde(default)]
    pub time_taken_llm: f64,
}

impl InferenceResult {
    pub fn new(generated_text: impl Into<String>) -> Self {
        Self { generated_text: generated_text.into(), ..Self::default() }
    }

    /// The engine output columns, ready to be merged into a record
    pub fn to_columns(&self) -> Record {
        Record::new()
            .with(GENERATED_TEXT_FIELD,   self.generated_text.clone())
            .with(PROMPT_FIELD,           self.prompt.clone())
            .with("num_input_tokens",     self.num_input_tokens)
            .with("num_generated_tokens", self.num_generated_tokens)
            .with("time_taken_llm",       self.time_taken_llm)
    }
}
