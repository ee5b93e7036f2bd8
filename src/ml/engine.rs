// ============================================================
// Layer 5 — Inference Engines
// ============================================================
// Backends that implement the InferenceEngine trait.
//
//   EchoEngine          model_source = "echo"
//                       Deterministic stub. Fills a template with
//                       the last user message:
//                         "<echo: {prompt}>"  →  "<echo: Tell me about cats>"
//
//   OpenAiCompatEngine  engine_kwargs.base_url = "http://host:8000"
//                       Calls an external OpenAI-compatible
//                       /v1/chat/completions server (vLLM, etc.)
//                       The requests of one batch are in flight
//                       together, up to max_parallel_requests.
//
// Engine kwargs read here:
//   echo_template, base_url, api_key_env, timeout_secs,
//   max_parallel_requests, tokenizer
// Every other kwarg is backend-defined and left alone.
//
// Reference: Rust Book §17 (Trait Objects)
//            reqwest::blocking documentation

use anyhow::{anyhow, bail, ensure, Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::request::InferenceRequest;
use crate::domain::result::InferenceResult;
use crate::domain::traits::InferenceEngine;
use crate::infra::tokenizer_store::{TokenCounter, TOKENIZER_KWARG};
use crate::ml::config::EngineConfig;

pub const ECHO_MODEL: &str = "echo";
pub const DEFAULT_ECHO_TEMPLATE: &str = "<echo: {prompt}>";

pub const ECHO_TEMPLATE_KWARG: &str = "echo_template";
pub const BASE_URL_KWARG: &str = "base_url";
pub const API_KEY_ENV_KWARG: &str = "api_key_env";
pub const TIMEOUT_KWARG: &str = "timeout_secs";
pub const PARALLEL_REQUESTS_KWARG: &str = "max_parallel_requests";

const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_PARALLEL_REQUESTS: u64 = 16;

/// Builds one engine replica from a config
pub type EngineFactory =
    Arc<dyn Fn(&EngineConfig) -> Result<Arc<dyn InferenceEngine>> + Send + Sync>;

/// Default factory: pick a backend from the config
pub fn load(config: &EngineConfig) -> Result<Arc<dyn InferenceEngine>> {
    if config.engine_kwarg(BASE_URL_KWARG).is_some() {
        log_passthrough(
            config,
            &[BASE_URL_KWARG, API_KEY_ENV_KWARG, TIMEOUT_KWARG, PARALLEL_REQUESTS_KWARG, TOKENIZER_KWARG],
        );
        return Ok(Arc::new(OpenAiCompatEngine::from_config(config)?));
    }
    if config.model_source() == ECHO_MODEL {
        log_passthrough(config, &[ECHO_TEMPLATE_KWARG, TOKENIZER_KWARG]);
        return Ok(Arc::new(EchoEngine::from_config(config)?));
    }
    bail!(
        "no backend for model '{}': use model '{ECHO_MODEL}' or set engine kwarg \
         '{BASE_URL_KWARG}' to an OpenAI-compatible server",
        config.model_source()
    )
}

/// Kwargs this process does not interpret are the backend's business
fn log_passthrough(config: &EngineConfig, consumed: &[&str]) {
    for key in config.engine_kwargs().keys() {
        if !consumed.contains(&key.as_str()) {
            tracing::debug!("engine kwarg '{key}' passed through without local interpretation");
        }
    }
}

fn kwarg_str<'a>(config: &'a EngineConfig, key: &str) -> Result<Option<&'a str>> {
    match config.engine_kwarg(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(anyhow!("engine kwarg '{key}' must be a string, got {other}")),
    }
}

// ─── EchoEngine ───────────────────────────────────────────────────────────────

pub struct EchoEngine {
    template: String,
    counter:  TokenCounter,
}

impl EchoEngine {
    /// `template` may contain `{prompt}`, replaced by the last user message
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into(), counter: TokenCounter::Whitespace }
    }

    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let template = kwarg_str(config, ECHO_TEMPLATE_KWARG)?.unwrap_or(DEFAULT_ECHO_TEMPLATE);
        let counter  = TokenCounter::from_kwargs(config.engine_kwargs())?;
        Ok(Self::new(template).with_counter(counter))
    }

    fn respond(&self, req: &InferenceRequest) -> Result<InferenceResult> {
        req.validate()?;
        let input = req.last_user_content().unwrap_or_default();
        let mut text = self.template.replace("{prompt}", input);
        if let Some(max) = req.sampling_params.max_tokens {
            text = truncate_words(&text, max as usize);
        }
        let prompt = req.render_prompt();
        Ok(InferenceResult {
            num_input_tokens:     self.counter.count(&prompt)?,
            num_generated_tokens: self.counter.count(&text)?,
            generated_text:       text,
            prompt,
            time_taken_llm:       0.0,
        })
    }
}

impl InferenceEngine for EchoEngine {
    fn model_id(&self) -> &str {
        ECHO_MODEL
    }

    fn generate(&self, requests: &[InferenceRequest]) -> Result<Vec<InferenceResult>> {
        let start = Instant::now();
        let mut results = requests
            .iter()
            .map(|r| self.respond(r))
            .collect::<Result<Vec<_>>>()?;
        let elapsed = start.elapsed().as_secs_f64();
        for r in &mut results {
            r.time_taken_llm = elapsed;
        }
        Ok(results)
    }
}

/// Keep at most `max` whitespace-separated words
fn truncate_words(text: &str, max: usize) -> String {
    if text.split_whitespace().count() <= max {
        return text.to_string();
    }
    text.split_whitespace().take(max).collect::<Vec<_>>().join(" ")
}

// ─── OpenAiCompatEngine ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage:   Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens:     usize,
    completion_tokens: usize,
}

pub struct OpenAiCompatEngine {
    model_id: String,
    endpoint: String,
    api_key:  Option<String>,
    client:   reqwest::blocking::Client,
    counter:  TokenCounter,
    // Sends the requests of one batch concurrently
    pool:     rayon::ThreadPool,
}

impl OpenAiCompatEngine {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let base_url = kwarg_str(config, BASE_URL_KWARG)?
            .ok_or_else(|| anyhow!("engine kwarg '{BASE_URL_KWARG}' is required"))?;
        ensure!(!base_url.trim().is_empty(), "engine kwarg '{BASE_URL_KWARG}' must not be empty");

        let timeout_secs = positive_kwarg(config, TIMEOUT_KWARG, DEFAULT_TIMEOUT_SECS)?;
        let parallel = positive_kwarg(config, PARALLEL_REQUESTS_KWARG, DEFAULT_PARALLEL_REQUESTS)?;

        let api_key = match kwarg_str(config, API_KEY_ENV_KWARG)? {
            None => None,
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("environment variable '{var}' is not set"))?,
            ),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Cannot build HTTP client")?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel as usize)
            .thread_name(|i| format!("http-{i}"))
            .build()
            .context("Cannot start HTTP request pool")?;

        let endpoint = chat_endpoint(base_url);
        tracing::info!(
            "Using OpenAI-compatible backend at '{}' for model '{}'",
            endpoint,
            config.model_source()
        );

        Ok(Self {
            model_id: config.model_source().to_string(),
            endpoint,
            api_key,
            client,
            counter: TokenCounter::from_kwargs(config.engine_kwargs())?,
            pool,
        })
    }

    fn request_body(&self, req: &InferenceRequest) -> Result<Value> {
        let mut body = Map::new();
        body.insert("model".into(), Value::from(self.model_id.clone()));
        body.insert("messages".into(), serde_json::to_value(&req.messages)?);
        if let Value::Object(params) = serde_json::to_value(&req.sampling_params)? {
            body.extend(params);
        }
        Ok(Value::Object(body))
    }

    fn complete(&self, req: &InferenceRequest) -> Result<InferenceResult> {
        req.validate()?;
        let mut call = self.client.post(&self.endpoint).json(&self.request_body(req)?);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let started = Instant::now();
        let resp: ChatCompletion = call
            .send()
            .with_context(|| format!("POST {} failed", self.endpoint))?
            .error_for_status()?
            .json()
            .context("Malformed chat completion response")?;
        let elapsed = started.elapsed().as_secs_f64();

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion response has no choices"))?;
        let prompt = req.render_prompt();

        let (num_input_tokens, num_generated_tokens) = match resp.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None    => (self.counter.count(&prompt)?, self.counter.count(&text)?),
        };

        Ok(InferenceResult {
            generated_text: text,
            prompt,
            num_input_tokens,
            num_generated_tokens,
            time_taken_llm: elapsed,
        })
    }
}

impl InferenceEngine for OpenAiCompatEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, requests: &[InferenceRequest]) -> Result<Vec<InferenceResult>> {
        // Indexed collect keeps request order
        self.pool
            .install(|| requests.par_iter().map(|r| self.complete(r)).collect())
    }
}

fn positive_kwarg(config: &EngineConfig, key: &str, default: u64) -> Result<u64> {
    match config.engine_kwarg(key) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow!("engine kwarg '{key}' must be a positive integer, got {v}")),
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::{ChatMessage, SamplingParams};
    use serde_json::json;

    fn request(text: &str, max_tokens: u32) -> InferenceRequest {
        InferenceRequest::new(
            vec![ChatMessage::system("be brief"), ChatMessage::user(text)],
            SamplingParams::new().temperature(0.3).max_tokens(max_tokens),
        )
    }

    #[test]
    fn test_echo_fills_template_per_request() {
        let engine = EchoEngine::new("<haiku about: {prompt}>");
        let out = engine
            .generate(&[request("Tell me about cats", 250), request("Tell me about dogs", 250)])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].generated_text, "<haiku about: Tell me about cats>");
        assert_eq!(out[1].generated_text, "<haiku about: Tell me about dogs>");
        // "<haiku", "about:", "Tell", "me", "about", "cats>"
        assert_eq!(out[0].num_generated_tokens, 6);
        assert_eq!(
            out[0].num_generated_tokens,
            TokenCounter::Whitespace.count(&out[0].generated_text).unwrap()
        );
        assert!(out[0].prompt.contains("user: Tell me about cats"));
    }

    #[test]
    fn test_echo_honours_max_tokens() {
        let engine = EchoEngine::new("{prompt}");
        let out = engine.generate(&[request("one two three four", 2)]).unwrap();
        assert_eq!(out[0].generated_text, "one two");
    }

    #[test]
    fn test_echo_rejects_invalid_request() {
        let engine = EchoEngine::new("{prompt}");
        let bad = InferenceRequest::new(Vec::new(), SamplingParams::default());
        assert!(engine.generate(&[bad]).is_err());
    }

    #[test]
    fn test_load_picks_backend() {
        let echo = EngineConfig::builder("echo")
            .engine_kwarg("echo_template", "[{prompt}]")
            .engine_kwarg("max_model_len", 16384)
            .build()
            .unwrap();
        let engine = load(&echo).unwrap();
        assert_eq!(engine.model_id(), "echo");
        let out = engine.generate(&[request("x", 10)]).unwrap();
        assert_eq!(out[0].generated_text, "[x]");

        let http = EngineConfig::builder("my-model")
            .engine_kwarg("base_url", "http://127.0.0.1:9/")
            .engine_kwarg("timeout_secs", 1)
            .build()
            .unwrap();
        assert_eq!(load(&http).unwrap().model_id(), "my-model");

        let unknown = EngineConfig::builder("some/model").build().unwrap();
        assert!(load(&unknown).is_err());
    }

    #[test]
    fn test_bad_kwarg_types_rejected() {
        let c = EngineConfig::builder("echo").engine_kwarg("echo_template", 5).build().unwrap();
        assert!(EchoEngine::from_config(&c).is_err());

        let c = EngineConfig::builder("m")
            .engine_kwarg("base_url", "http://localhost:8000")
            .engine_kwarg("timeout_secs", "soon")
            .build()
            .unwrap();
        assert!(OpenAiCompatEngine::from_config(&c).is_err());
    }

    #[test]
    fn test_chat_endpoint() {
        assert_eq!(chat_endpoint("http://h:8000"), "http://h:8000/v1/chat/completions");
        assert_eq!(chat_endpoint("http://h:8000/v1/"), "http://h:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_body_flattens_sampling_params() {
        let c = EngineConfig::builder("m")
            .engine_kwarg("base_url", "http://localhost:8000")
            .build()
            .unwrap();
        let engine = OpenAiCompatEngine::from_config(&c).unwrap();
        let body = engine.request_body(&request("hi", 16)).unwrap();
        assert_eq!(body["model"], json!("m"));
        assert_eq!(body["max_tokens"], json!(16));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
    }

    /// Minimal chat-completions server: answers with the last
    /// message's content and tracks how many requests overlap.
    fn spawn_echo_server(delay_ms: u64) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener  = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr      = listener.local_addr().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak      = Arc::new(AtomicUsize::new(0));
        let peak_out  = Arc::clone(&peak);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let in_flight = Arc::clone(&in_flight);
                let peak      = Arc::clone(&peak);
                std::thread::spawn(move || {
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut writer = stream;
                    loop {
                        let mut content_length = 0usize;
                        let mut line = String::new();
                        if reader.read_line(&mut line).unwrap_or(0) == 0 {
                            return;
                        }
                        loop {
                            line.clear();
                            reader.read_line(&mut line).unwrap();
                            let header = line.trim_end();
                            if header.is_empty() {
                                break;
                            }
                            if let Some((k, v)) = header.split_once(':') {
                                if k.eq_ignore_ascii_case("content-length") {
                                    content_length = v.trim().parse().unwrap();
                                }
                            }
                        }
                        let mut body = vec![0u8; content_length];
                        reader.read_exact(&mut body).unwrap();
                        let req: Value = serde_json::from_slice(&body).unwrap();

                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(delay_ms));
                        in_flight.fetch_sub(1, Ordering::SeqCst);

                        let messages = req["messages"].as_array().unwrap();
                        let content  = messages.last().unwrap()["content"].clone();
                        let reply = json!({
                            "choices": [{"message": {"content": content}}],
                            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
                        })
                        .to_string();
                        write!(
                            writer,
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                            reply.len(),
                            reply
                        )
                        .unwrap();
                        writer.flush().unwrap();
                    }
                });
            }
        });
        (format!("http://{addr}"), peak_out)
    }

    #[test]
    fn test_batch_requests_are_sent_concurrently_and_keep_order() {
        let (base_url, peak) = spawn_echo_server(200);
        let c = EngineConfig::builder("m")
            .engine_kwarg("base_url", base_url)
            .engine_kwarg("max_parallel_requests", 4)
            .build()
            .unwrap();
        let engine = OpenAiCompatEngine::from_config(&c).unwrap();

        let prompts = ["a", "b", "c", "d"];
        let requests: Vec<_> = prompts.iter().map(|p| request(p, 8)).collect();
        let out = engine.generate(&requests).unwrap();

        let texts: Vec<&str> = out.iter().map(|r| r.generated_text.as_str()).collect();
        assert_eq!(texts, prompts);
        assert_eq!(out[0].num_input_tokens, 3);
        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_parallel_requests_must_be_positive() {
        let c = EngineConfig::builder("m")
            .engine_kwarg("base_url", "http://localhost:8000")
            .engine_kwarg("max_parallel_requests", 0)
            .build()
            .unwrap();
        assert!(OpenAiCompatEngine::from_config(&c).is_err());
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        let c = EngineConfig::builder("m")
            .engine_kwarg("base_url", "http://127.0.0.1:9")
            .engine_kwarg("timeout_secs", 1)
            .build()
            .unwrap();
        let engine = OpenAiCompatEngine::from_config(&c).unwrap();
        assert!(engine.generate(&[request("hi", 4)]).is_err());
    }
}
