// ============================================================
// Layer 2 — Prompt Callbacks
// ============================================================
// The two functions that turn the generic processor into the
// haiku bot:
//
//   preprocess   { text: "cats" }
//                  → [system: <system prompt>, user: "cats"]
//                    + { temperature: 0.3, max_tokens: 250 }
//
//   postprocess  { text, generated_text, prompt, ... }
//                  → same record + { answer: generated_text }
//
// Both are pure functions of their inputs. The processor may
// call them from several threads at once, in any order.
//
// Reference: Rust Book §13 (Closures: Anonymous Functions that
//            Capture Their Environment)

use anyhow::Result;

use crate::domain::record::{Record, TEXT_FIELD};
use crate::domain::request::{ChatMessage, InferenceRequest, SamplingParams};
use crate::domain::result::InferenceResult;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a bot that responds with haikus.";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 250;

/// Column the postprocess step adds
pub const ANSWER_FIELD: &str = "answer";

/// How a record becomes a chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTemplate {
    pub system_prompt: String,
    pub input_field:   String,
    pub sampling:      SamplingParams,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            input_field:   TEXT_FIELD.to_string(),
            sampling:      SamplingParams::new()
                .temperature(DEFAULT_TEMPERATURE)
                .max_tokens(DEFAULT_MAX_TOKENS),
        }
    }
}

impl ChatTemplate {
    /// Build the request for one record. Fails if the input
    /// field is missing or not a string.
    pub fn request_for(&self, row: &Record) -> Result<InferenceRequest> {
        let user = row.require_str(&self.input_field)?;
        let req = InferenceRequest::new(
            vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user(user),
            ],
            self.sampling.clone(),
        );
        req.validate()?;
        Ok(req)
    }
}

/// Preprocess callback owning its template
pub fn chat_preprocess(template: ChatTemplate) -> impl Fn(&Record) -> Result<InferenceRequest> + Send + Sync + 'static {
    move |row| template.request_for(row)
}

/// Postprocess callback: keep every column, add `answer`
pub fn answer_postprocess(row: Record, result: InferenceResult) -> Result<Record> {
    Ok(row.with(ANSWER_FIELD, result.generated_text))
}
