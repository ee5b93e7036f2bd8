// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `inspect` and `run`
// and all their configurable flags.
//
// clap's derive macros generate:
//   - help text (--help)
//   - error messages for missing or conflicting args
//   - type conversion (string → usize, f32, PathBuf, ...)
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::{bail, Result};
use clap::{Args, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::application::callbacks::{
    ChatTemplate, DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
};
use crate::application::inference_use_case::{OutputMode, RunConfig, DEFAULT_PEEK_ROWS};
use crate::application::inspect_use_case::InspectConfig;
use crate::data::loader::Format;
use crate::domain::record::TEXT_FIELD;
use crate::domain::request::SamplingParams;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the schema and row count of an input
    Inspect(InspectArgs),

    /// Run batch inference over an input
    Run(RunArgs),
}

/// Input file layout
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatArg {
    /// One prompt per line, stored in the `text` column
    #[default]
    Text,
    /// One JSON object per line
    Jsonl,
}

impl From<FormatArg> for Format {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text  => Format::Text,
            FormatArg::Jsonl => Format::Jsonl,
        }
    }
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// File or directory to read
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,
}

impl From<InspectArgs> for InspectConfig {
    fn from(a: InspectArgs) -> Self {
        InspectConfig { input: a.input, format: a.format.into() }
    }
}

/// All arguments for the `run` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// File or directory of prompts
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,

    /// Model to load: "echo", or a model id served at --engine-kwarg base_url=...
    #[arg(long, required_unless_present = "engine_config")]
    pub model: Option<String>,

    /// Engine flag passed through to the backend, e.g. max_model_len=16384.
    /// Values are parsed as JSON when possible, otherwise kept as strings.
    #[arg(long = "engine-kwarg", value_name = "KEY=VALUE", value_parser = parse_kwarg)]
    pub engine_kwargs: Vec<(String, Value)>,

    /// JSON file holding a full engine config; flags override it
    #[arg(long)]
    pub engine_config: Option<PathBuf>,

    /// Number of parallel engine replicas [default: 1]
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Records per engine call [default: 64]
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Column holding the user message
    #[arg(long, default_value = TEXT_FIELD)]
    pub input_field: String,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// Print the first N results instead of writing them
    #[arg(long, conflicts_with = "output")]
    pub take: Option<usize>,

    /// Write every result as JSONL part files under this directory
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Maximum rows per output part file
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub rows_per_file: u64,

    /// Append per-batch metrics to <DIR>/batch_metrics.csv
    #[arg(long, value_name = "DIR")]
    pub metrics_dir: Option<PathBuf>,

    /// Do not count the input before running (saves a full pass)
    #[arg(long)]
    pub skip_count: bool,

    /// Do not log progress after each wave of batches
    #[arg(long)]
    pub no_progress: bool,
}

/// Parse one `KEY=VALUE` engine kwarg
pub fn parse_kwarg(s: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = s.split_once('=') else {
        bail!("expected KEY=VALUE, got '{s}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{s}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Convert CLI RunArgs into the application-layer RunConfig.
/// The application layer never sees clap types.
impl From<RunArgs> for RunConfig {
    fn from(a: RunArgs) -> Self {
        let output = match a.output {
            Some(dir) => OutputMode::Write(dir),
            None      => OutputMode::Peek(a.take.unwrap_or(DEFAULT_PEEK_ROWS)),
        };
        let template = ChatTemplate {
            system_prompt: a.system_prompt,
            input_field:   a.input_field,
            sampling:      SamplingParams::new()
                .temperature(a.temperature)
                .max_tokens(a.max_tokens),
        };

        RunConfig {
            input:              a.input,
            format:             a.format.into(),
            model_source:       a.model,
            engine_config_file: a.engine_config,
            engine_kwargs:      a.engine_kwargs.into_iter().collect::<Map<String, Value>>(),
            concurrency:        a.concurrency,
            batch_size:         a.batch_size,
            template,
            output,
            rows_per_file:      a.rows_per_file as usize,
            metrics_dir:        a.metrics_dir,
            skip_count:         a.skip_count,
            progress:           !a.no_progress,
        }
    }
}
