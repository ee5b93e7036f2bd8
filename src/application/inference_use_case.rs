// ============================================================
// Layer 2 — Batch Inference Use Case
// ============================================================
// The whole run, start to finish:
//
//   1. Check the runtime version (fails before any I/O)
//   2. Resolve the EngineConfig (file and/or flags)
//   3. Acquire the RuntimeContext
//   4. Load the input lazily, report schema and size
//   5. Build the processor (loads engine replicas)
//   6. Consume: peek the first N results, or write them all
//   7. Shut the context down, whether the run failed or not
//
// Nothing is printed here. The outcome goes back to Layer 1.

use anyhow::{ensure, Context, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::application::callbacks::{answer_postprocess, chat_preprocess, ChatTemplate};
use crate::data::dataset::Dataset;
use crate::data::loader::{Format, Loader};
use crate::data::schema::Schema;
use crate::data::writer::JsonlWriter;
use crate::domain::record::Record;
use crate::infra::context::{ContextOptions, RuntimeContext};
use crate::infra::manifest::WriteSummary;
use crate::infra::metrics::MetricsLogger;
use crate::infra::version::{self, Version};
use crate::ml::config::EngineConfig;
use crate::ml::engine::EngineFactory;
use crate::ml::processor::ProcessorBuilder;

/// Rows shown by a peek when no count is given
pub const DEFAULT_PEEK_ROWS: usize = 10;

/// What to do with the processed dataset
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// Materialise only the first N rows
    Peek(usize),
    /// Write every row as JSONL part files under this directory
    Write(PathBuf),
}

/// Everything one run needs. Built by Layer 1 from CLI args.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input:              PathBuf,
    pub format:             Format,
    /// Required unless `engine_config_file` names one
    pub model_source:       Option<String>,
    pub engine_config_file: Option<PathBuf>,
    /// Added on top of the file's kwargs, replacing equal keys
    pub engine_kwargs:      Map<String, Value>,
    pub concurrency:        Option<usize>,
    pub batch_size:         Option<usize>,
    pub template:           ChatTemplate,
    pub output:             OutputMode,
    pub rows_per_file:      usize,
    pub metrics_dir:        Option<PathBuf>,
    pub skip_count:         bool,
    pub progress:           bool,
}

impl RunConfig {
    pub fn new(input: impl Into<PathBuf>, model_source: impl Into<String>) -> Self {
        Self {
            input:              input.into(),
            format:             Format::Text,
            model_source:       Some(model_source.into()),
            engine_config_file: None,
            engine_kwargs:      Map::new(),
            concurrency:        None,
            batch_size:         None,
            template:           ChatTemplate::default(),
            output:             OutputMode::Peek(DEFAULT_PEEK_ROWS),
            rows_per_file:      ContextOptions::default().max_rows_per_file,
            metrics_dir:        None,
            skip_count:         false,
            progress:           true,
        }
    }
}

#[derive(Debug)]
pub enum RunOutput {
    Peeked(Vec<Record>),
    Written(WriteSummary),
}

#[derive(Debug)]
pub struct RunOutcome {
    pub schema: Option<Schema>,
    /// `None` when counting was skipped
    pub size:   Option<usize>,
    pub output: RunOutput,
}

pub struct InferenceUseCase {
    config:         RunConfig,
    engine_factory: Option<EngineFactory>,
}

impl InferenceUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config, engine_factory: None }
    }

    /// Serve the run with a custom engine factory
    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    /// Merge the config file (if any) with the command-line overrides
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let base = match &self.config.engine_config_file {
            Some(path) => Some(EngineConfig::from_json_file(path)?),
            None       => None,
        };

        let model_source = self
            .config
            .model_source
            .clone()
            .or_else(|| base.as_ref().map(|c| c.model_source().to_string()))
            .context("no model given: pass --model or an engine config file")?;

        let mut builder = EngineConfig::builder(model_source);
        if let Some(base) = &base {
            builder = builder
                .engine_kwargs(base.engine_kwargs().clone())
                .concurrency(base.concurrency())
                .batch_size(base.batch_size());
        }
        builder = builder.engine_kwargs(self.config.engine_kwargs.clone());
        if let Some(n) = self.config.concurrency {
            builder = builder.concurrency(n);
        }
        if let Some(n) = self.config.batch_size {
            builder = builder.batch_size(n);
        }
        builder.build()
    }

    pub fn execute(&self) -> Result<RunOutcome> {
        ensure!(self.config.rows_per_file > 0, "rows_per_file must be greater than 0");
        let runtime = version::check_runtime()?;
        let engine_config = self.engine_config()?;

        let context = RuntimeContext::init(ContextOptions {
            enable_progress_bars: self.config.progress,
            max_rows_per_file:    self.config.rows_per_file,
        });
        let outcome = self.run_pipeline(&context, engine_config, runtime);
        context.shutdown();
        outcome
    }

    fn run_pipeline(
        &self,
        context: &Arc<RuntimeContext>,
        engine_config: EngineConfig,
        runtime: Version,
    ) -> Result<RunOutcome> {
        let ds = Loader::new(Arc::clone(context))
            .read(&self.config.input, self.config.format)
            .with_context(|| format!("Cannot load input '{}'", self.config.input.display()))?;

        let schema = ds.schema().cloned();
        let size = if self.config.skip_count {
            None
        } else {
            Some(ds.count()?)
        };
        if let Some(n) = size {
            tracing::info!("Loaded {n} prompt(s) from '{}'", self.config.input.display());
        }

        let mut builder = ProcessorBuilder::new(engine_config.clone())
            .runtime_version(runtime)
            .preprocess(chat_preprocess(self.config.template.clone()))
            .postprocess(answer_postprocess);
        if let Some(factory) = &self.engine_factory {
            let factory = Arc::clone(factory);
            builder = builder.engine_factory(move |c: &EngineConfig| factory(c));
        }
        if let Some(dir) = &self.config.metrics_dir {
            builder = builder.metrics(Arc::new(MetricsLogger::new(dir)?));
        }
        let processor = builder.build()?;
        let out: Dataset = processor.apply(ds);

        let output = match &self.config.output {
            OutputMode::Peek(n) => RunOutput::Peeked(out.take(*n)?),
            OutputMode::Write(dir) => {
                let summary = JsonlWriter::new(Arc::clone(context))
                    .with_metadata("engine_config", engine_config.to_json())
                    .with_metadata("runtime_version", runtime.to_string())
                    .with_metadata("system_prompt", self.config.template.system_prompt.clone())
                    .write(&out, dir)?;
                RunOutput::Written(summary)
            }
        };

        Ok(RunOutcome { schema, size, output })
    }
}
