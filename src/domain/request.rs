// ============================================================
// Layer 3 — Inference Request Domain Types
// ============================================================
// What the preprocess callback produces for every record:
//
//   InferenceRequest
//     ├── messages:        ordered chat turns (role + content)
//     └── sampling_params: generation controls
//
// Example (the haiku bot):
//   messages = [
//     { role: system, content: "You are a bot that responds with haikus." },
//     { role: user,   content: "Tell me about cats" },
//   ]
//   sampling_params = { temperature: 0.3, max_tokens: 250 }
//
// Sampling keys the engine does not know about are kept in
// `extra` and forwarded untouched.
//
// Reference: Rust Book §6 (Enums), §5 (Structs)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System    => "system",
            Role::User      => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role:    Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Generation-time controls.
///
/// Only `temperature` and `max_tokens` are checked locally;
/// everything else rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Backend-defined keys, passed through without interpretation
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SamplingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            ensure!(t.is_finite() && t >= 0.0, "temperature must be a non-negative number, got {t}");
        }
        if let Some(n) = self.max_tokens {
            ensure!(n > 0, "max_tokens must be greater than 0");
        }
        if let Some(p) = self.top_p {
            ensure!(p > 0.0 && p <= 1.0, "top_p must be in (0, 1], got {p}");
        }
        Ok(())
    }
}

/// A structured request for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub messages:        Vec<ChatMessage>,
    #[serde(default)]
    pub sampling_params: SamplingParams,
}

impl InferenceRequest {
    pub fn new(messages: Vec<ChatMessage>, sampling_params: SamplingParams) -> Self {
        Self { messages, sampling_params }
    }

    /// A request must carry at least one message and sane sampling params
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.messages.is_empty(), "inference request has no messages");
        self.sampling_params.validate()
    }

    /// Content of the last user turn, if any
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Flatten the conversation into a single prompt string,
    /// ending with an open assistant turn:
    ///
    ///   system: You are a bot that responds with haikus.
    ///   user: Tell me about cats
    ///   assistant:
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        for m in &self.messages {
            out.push_str(m.role.as_str());
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out.push_str("assistant:");
        out
    }
}
