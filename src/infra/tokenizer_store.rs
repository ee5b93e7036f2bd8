// ============================================================
// Layer 6 — Tokenizer Store / Token Counter
// ============================================================
// Engines report how many tokens went in and came out of each
// request. Two ways to count:
//
//   Hugging Face tokenizer → when `engine_kwargs.tokenizer`
//                            points at a tokenizer.json
//   Whitespace             → everything else
//
// Reference: tokenizers crate documentation

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use tokenizers::Tokenizer;

/// engine_kwargs key naming a tokenizer.json file
pub const TOKENIZER_KWARG: &str = "tokenizer";

pub enum TokenCounter {
    Whitespace,
    Hf(Box<Tokenizer>),
}

impl TokenCounter {
    /// Load a tokenizer previously saved as JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tok = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;
        tracing::info!("Loaded tokenizer from '{}'", path.display());
        Ok(Self::Hf(Box::new(tok)))
    }

    /// Pick a counter from engine kwargs
    pub fn from_kwargs(kwargs: &Map<String, Value>) -> Result<Self> {
        match kwargs.get(TOKENIZER_KWARG) {
            None => Ok(Self::Whitespace),
            Some(Value::String(path)) => Self::load(path),
            Some(other) => anyhow::bail!(
                "engine kwarg '{TOKENIZER_KWARG}' must be a path string, got {other}"
            ),
        }
    }

    pub fn count(&self, text: &str) -> Result<usize> {
        match self {
            Self::Whitespace => Ok(text.split_whitespace().count()),
            Self::Hf(tok) => {
                let enc = tok
                    .encode(text, false)
                    .map_err(|e| anyhow::anyhow!("tokenise: {e}"))
                    .context("counting tokens")?;
                Ok(enc.get_ids().len())
            }
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whitespace => f.write_str("TokenCounter::Whitespace"),
            Self::Hf(_)      => f.write_str("TokenCounter::Hf"),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal word-level tokenizer in Hugging Face JSON format
    fn write_word_level(dir: &Path) -> std::path::PathBuf {
        let tokenizer_json = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": "[UNK]", "single_word": false, "lstrip": false,
                 "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": { "[UNK]": 0, "tell": 1, "me": 2, "about": 3, "cats": 4 },
                "unk_token": "[UNK]"
            }
        });
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, serde_json::to_string(&tokenizer_json).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_whitespace_counting() {
        let c = TokenCounter::Whitespace;
        assert_eq!(c.count("Tell me  about\tcats").unwrap(), 4);
        assert_eq!(c.count("").unwrap(), 0);
    }

    #[test]
    fn test_hf_tokenizer_from_kwargs() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_word_level(dir.path());

        let mut kwargs = Map::new();
        kwargs.insert(TOKENIZER_KWARG.into(), json!(path.to_string_lossy()));

        let c = TokenCounter::from_kwargs(&kwargs).unwrap();
        assert!(matches!(c, TokenCounter::Hf(_)));
        assert_eq!(c.count("tell me about cats").unwrap(), 4);
    }

    #[test]
    fn test_missing_kwarg_means_whitespace() {
        let c = TokenCounter::from_kwargs(&Map::new()).unwrap();
        assert!(matches!(c, TokenCounter::Whitespace));
    }

    #[test]
    fn test_bad_tokenizer_path_errors() {
        let mut kwargs = Map::new();
        kwargs.insert(TOKENIZER_KWARG.into(), json!("/nonexistent/tokenizer.json"));
        assert!(TokenCounter::from_kwargs(&kwargs).is_err());
        kwargs.insert(TOKENIZER_KWARG.into(), json!(3));
        assert!(TokenCounter::from_kwargs(&kwargs).is_err());
    }
}
