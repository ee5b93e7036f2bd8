// ============================================================
// Layer 5 — Engine Configuration
// ============================================================
// Declarative description of the inference engine:
//
//   model_source   which model to load ("echo", a HF repo id, ...)
//   engine_kwargs  backend flags, passed through uninterpreted
//                  e.g. enable_chunked_prefill, max_num_batched_tokens,
//                       max_model_len, base_url, timeout_secs
//   concurrency    number of parallel engine replicas
//   batch_size     records grouped into one engine call
//
// Built once, validated once, never mutated afterwards. Fields
// are private, so the only way to a different config is to
// build a new one. Cloning is cheap enough to hand a copy to
// every processor.
//
// Example:
//   let config = EngineConfig::builder("unsloth/Llama-3.1-8B-Instruct")
//       .engine_kwarg("max_model_len", 16384)
//       .concurrency(1)
//       .batch_size(64)
//       .build()?;
//
// Reference: Rust Book §5 (Structs), §17 (Builder-style APIs)

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    model_source:  String,
    #[serde(default)]
    engine_kwargs: Map<String, Value>,
    #[serde(default = "default_concurrency")]
    concurrency:   usize,
    #[serde(default = "default_batch_size")]
    batch_size:    usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl EngineConfig {
    pub fn builder(model_source: impl Into<String>) -> EngineConfigBuilder {
        EngineConfigBuilder {
            model_source:  model_source.into(),
            engine_kwargs: Map::new(),
            concurrency:   DEFAULT_CONCURRENCY,
            batch_size:    DEFAULT_BATCH_SIZE,
        }
    }

    /// Load a config from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read engine config '{}'", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Invalid engine config in '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Type and positivity checks only. Whether the model fits
    /// the requested context, whether a kwarg is supported, etc.
    /// is for the engine to decide.
    fn validate(&self) -> Result<()> {
        ensure!(!self.model_source.trim().is_empty(), "model_source must not be empty");
        ensure!(self.concurrency > 0, "concurrency must be greater than 0");
        ensure!(self.batch_size > 0, "batch_size must be greater than 0");
        Ok(())
    }

    pub fn model_source(&self) -> &str {
        &self.model_source
    }

    pub fn engine_kwargs(&self) -> &Map<String, Value> {
        &self.engine_kwargs
    }

    pub fn engine_kwarg(&self, key: &str) -> Option<&Value> {
        self.engine_kwargs.get(key)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// JSON snapshot for manifests and logs
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Mutable staging area for an EngineConfig.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    model_source:  String,
    engine_kwargs: Map<String, Value>,
    concurrency:   usize,
    batch_size:    usize,
}

impl EngineConfigBuilder {
    pub fn engine_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.engine_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn engine_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.engine_kwargs.extend(kwargs);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let config = EngineConfig {
            model_source:  self.model_source,
            engine_kwargs: self.engine_kwargs,
            concurrency:   self.concurrency,
            batch_size:    self.batch_size,
        };
        config.validate()?;
        Ok(config)
    }
}
