// ============================================================
// Layer 5 — Inference Processor
// ============================================================
// Composes an EngineConfig with two callbacks into a stage that
// maps a lazy Dataset to a lazy Dataset:
//
//   row ──preprocess──▶ InferenceRequest
//                            │
//                      engine replica (batch of batch_size)
//                            │
//   row + engine columns + InferenceResult ──postprocess──▶ output row
//
// Execution model, per pull from downstream:
//   1. Pull up to `concurrency` batches of `batch_size` rows
//      from upstream (one "wave").
//   2. Run the batches in parallel on a rayon pool with
//      `concurrency` threads, batch i served by replica i.
//   3. Buffer the outputs and hand them out one by one.
//
// So a take(10) only ever runs the waves needed for 10 rows.
// Callbacks run on pool threads, several at once, and must not
// rely on shared mutable state or on row order.
//
// Building a processor checks the runtime version first,
// before any engine is loaded.
//
// Reference: Rust Book §13 (Closures), §16 (Fearless Concurrency)
//            rayon::ThreadPool documentation

use anyhow::{anyhow, ensure, Context, Result};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::data::batcher::{Batches, RecordBatcher};
use crate::data::dataset::{Dataset, RowIter};
use crate::domain::record::Record;
use crate::domain::request::{InferenceRequest, SamplingParams};
use crate::domain::result::InferenceResult;
use crate::domain::traits::{InferenceEngine, PostprocessFn, PreprocessFn};
use crate::infra::context::RuntimeContext;
use crate::infra::metrics::{BatchMetrics, MetricsLogger};
use crate::infra::version::{self, Version};
use crate::ml::config::EngineConfig;
use crate::ml::engine::{self, EngineFactory};

/// Default preprocess: the record already carries `messages`
/// (and optionally `sampling_params`) in request shape.
pub fn request_from_record(record: &Record) -> Result<InferenceRequest> {
    let messages = record
        .get("messages")
        .cloned()
        .ok_or_else(|| anyhow!("record has no 'messages' field and no preprocess function was given"))?;
    let messages = serde_json::from_value(messages)
        .context("field 'messages' is not a list of {role, content} objects")?;

    let sampling_params: SamplingParams = match record.get("sampling_params") {
        Some(v) => serde_json::from_value(v.clone()).context("field 'sampling_params' is malformed")?,
        None    => SamplingParams::default(),
    };
    Ok(InferenceRequest::new(messages, sampling_params))
}

// ─── ProcessorBuilder ─────────────────────────────────────────────────────────

pub struct ProcessorBuilder {
    config:              EngineConfig,
    preprocess:          Option<PreprocessFn>,
    postprocess:         Option<PostprocessFn>,
    engine_factory:      EngineFactory,
    runtime_version:     Option<Version>,
    min_runtime_version: Option<Version>,
    metrics:             Option<Arc<MetricsLogger>>,
}

impl ProcessorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        let engine_factory: EngineFactory = Arc::new(engine::load);
        Self {
            config,
            preprocess: None,
            postprocess: None,
            engine_factory,
            runtime_version: None,
            min_runtime_version: None,
            metrics: None,
        }
    }

    pub fn preprocess<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> Result<InferenceRequest> + Send + Sync + 'static,
    {
        self.preprocess = Some(Arc::new(f));
        self
    }

    pub fn postprocess<F>(mut self, f: F) -> Self
    where
        F: Fn(Record, InferenceResult) -> Result<Record> + Send + Sync + 'static,
    {
        self.postprocess = Some(Arc::new(f));
        self
    }

    /// Replace the default backend selection (used for stub engines)
    pub fn engine_factory<F>(mut self, f: F) -> Self
    where
        F: Fn(&EngineConfig) -> Result<Arc<dyn InferenceEngine>> + Send + Sync + 'static,
    {
        self.engine_factory = Arc::new(f);
        self
    }

    /// Override the version reported by the runtime
    pub fn runtime_version(mut self, v: Version) -> Self {
        self.runtime_version = Some(v);
        self
    }

    /// Override the minimum accepted runtime version
    pub fn min_runtime_version(mut self, v: Version) -> Self {
        self.min_runtime_version = Some(v);
        self
    }

    pub fn metrics(mut self, logger: Arc<MetricsLogger>) -> Self {
        self.metrics = Some(logger);
        self
    }

    pub fn build(self) -> Result<Processor> {
        // Precondition first: nothing is loaded if this fails
        let actual = match self.runtime_version {
            Some(v) => v,
            None    => Version::runtime()?,
        };
        let min = match self.min_runtime_version {
            Some(v) => v,
            None    => Version::min_supported()?,
        };
        version::ensure_at_least(actual, min)?;

        let preprocess  = self.preprocess.unwrap_or_else(|| Arc::new(request_from_record));
        let postprocess = self.postprocess.unwrap_or_else(|| {
            Arc::new(|row: Record, _: InferenceResult| -> Result<Record> { Ok(row) })
        });

        let concurrency = self.config.concurrency();
        let replicas = (0..concurrency)
            .map(|i| {
                (self.engine_factory)(&self.config)
                    .with_context(|| format!("Cannot load engine replica {i}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("replica-{i}"))
            .build()
            .context("Cannot start replica worker pool")?;

        tracing::info!(
            "Processor ready: model='{}', replicas={}, batch_size={}",
            self.config.model_source(),
            concurrency,
            self.config.batch_size(),
        );

        Ok(Processor {
            inner: Arc::new(ProcessorInner {
                config: self.config,
                preprocess,
                postprocess,
                replicas,
                pool,
                metrics: self.metrics,
                batches_run: AtomicUsize::new(0),
            }),
        })
    }
}

/// Build a processor from a config and the two callbacks
pub fn build_llm_processor<F, G>(config: EngineConfig, preprocess: F, postprocess: G) -> Result<Processor>
where
    F: Fn(&Record) -> Result<InferenceRequest> + Send + Sync + 'static,
    G: Fn(Record, InferenceResult) -> Result<Record> + Send + Sync + 'static,
{
    ProcessorBuilder::new(config)
        .preprocess(preprocess)
        .postprocess(postprocess)
        .build()
}

// ─── Processor ────────────────────────────────────────────────────────────────

struct ProcessorInner {
    config:      EngineConfig,
    preprocess:  PreprocessFn,
    postprocess: PostprocessFn,
    replicas:    Vec<Arc<dyn InferenceEngine>>,
    pool:        rayon::ThreadPool,
    metrics:     Option<Arc<MetricsLogger>>,
    batches_run: AtomicUsize,
}

struct BatchOutput {
    records: Vec<Record>,
    metrics: BatchMetrics,
}

impl ProcessorInner {
    fn run_batch(&self, replica: &dyn InferenceEngine, batch: Vec<Record>) -> Result<BatchOutput> {
        let requests = batch
            .iter()
            .map(|row| (self.preprocess)(row))
            .collect::<Result<Vec<_>>>()
            .context("preprocess failed")?;

        let started = Instant::now();
        let results = replica
            .generate(&requests)
            .with_context(|| format!("engine '{}' failed on a batch of {}", replica.model_id(), requests.len()))?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        ensure!(
            results.len() == requests.len(),
            "engine '{}' returned {} results for {} requests",
            replica.model_id(),
            results.len(),
            requests.len()
        );

        let metrics = BatchMetrics::from_results(0, &results, elapsed_ms);
        let records = batch
            .into_iter()
            .zip(results)
            .map(|(mut row, result)| {
                row.merge(result.to_columns());
                (self.postprocess)(row, result)
            })
            .collect::<Result<Vec<_>>>()
            .context("postprocess failed")?;

        Ok(BatchOutput { records, metrics })
    }
}

/// A built inference stage. Cheap to clone; clones share replicas.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<ProcessorInner>,
}

impl Processor {
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Wrap `ds` with this inference stage. Nothing runs until
    /// the returned dataset is consumed.
    pub fn apply(&self, ds: Dataset) -> Dataset {
        let inner   = Arc::clone(&self.inner);
        let context = Arc::clone(ds.context());
        ds.map_rows(None, move |rows| {
            let batches = RecordBatcher::new(inner.config.batch_size())?.batches(rows);
            let stream: RowIter = Box::new(InferenceStream {
                inner:   Arc::clone(&inner),
                context: Arc::clone(&context),
                batches,
                ready:   VecDeque::new(),
                done:    false,
            });
            Ok(stream)
        })
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("config", &self.inner.config)
            .field("replicas", &self.inner.replicas.len())
            .finish()
    }
}

/// One execution of a processed dataset
struct InferenceStream {
    inner:   Arc<ProcessorInner>,
    context: Arc<RuntimeContext>,
    batches: Batches,
    ready:   VecDeque<Record>,
    done:    bool,
}

impl InferenceStream {
    /// Run one wave; returns how many batches it contained
    fn run_wave(&mut self) -> Result<usize> {
        let width = self.inner.replicas.len();
        let mut wave = Vec::with_capacity(width);
        for batch in self.batches.by_ref().take(width) {
            wave.push(batch?);
        }
        if wave.is_empty() {
            return Ok(0);
        }
        let n_batches = wave.len();

        let inner = &self.inner;
        let outputs: Vec<Result<BatchOutput>> = inner.pool.install(|| {
            wave.into_par_iter()
                .enumerate()
                .map(|(i, batch)| inner.run_batch(inner.replicas[i].as_ref(), batch))
                .collect()
        });

        let mut rows = 0usize;
        for out in outputs {
            let out = out?;
            let batch_no = inner.batches_run.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(logger) = &inner.metrics {
                logger.log(&BatchMetrics { batch: batch_no, ..out.metrics })?;
            }
            rows += out.records.len();
            self.ready.extend(out.records);
        }

        let total = self.context.record_processed(rows);
        if self.context.options().enable_progress_bars {
            tracing::info!("Processed {total} rows ({n_batches} batch(es) in last wave)");
        }
        Ok(n_batches)
    }
}

impl Iterator for InferenceStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(r) = self.ready.pop_front() {
                return Some(Ok(r));
            }
            if self.done {
                return None;
            }
            match self.run_wave() {
                Ok(0) => self.done = true,
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    self.ready.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::ChatMessage;
    use crate::infra::context::ContextOptions;
    use crate::ml::engine::EchoEngine;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    fn ctx() -> Arc<RuntimeContext> {
        RuntimeContext::init(ContextOptions { enable_progress_bars: false, ..Default::default() })
    }

    fn config(concurrency: usize, batch_size: usize) -> EngineConfig {
        EngineConfig::builder("stub")
            .concurrency(concurrency)
            .batch_size(batch_size)
            .build()
            .unwrap()
    }

    fn user_only(row: &Record) -> Result<InferenceRequest> {
        Ok(InferenceRequest::new(
            vec![ChatMessage::user(row.require_str("text")?)],
            SamplingParams::new().max_tokens(100),
        ))
    }

    fn echo_builder(cfg: EngineConfig, template: &'static str) -> ProcessorBuilder {
        ProcessorBuilder::new(cfg)
            .preprocess(user_only)
            .engine_factory(move |_| Ok(Arc::new(EchoEngine::new(template)) as Arc<dyn InferenceEngine>))
    }

    fn texts(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::from_text(format!("t{i}"))).collect()
    }

    #[test]
    fn test_build_llm_processor_uses_default_backend() {
        let cfg = EngineConfig::builder("echo")
            .engine_kwarg("echo_template", "[{prompt}]")
            .batch_size(2)
            .build()
            .unwrap();
        let p = build_llm_processor(cfg, user_only, |row, result| {
            Ok(row.with("answer", result.generated_text))
        })
        .unwrap();

        let out = p.apply(Dataset::from_records(ctx(), texts(3))).take(10).unwrap();
        assert_eq!(out.len(), 3);
        for r in &out {
            let text = r.get_str("text").unwrap();
            assert_eq!(r.get_str("answer").unwrap(), format!("[{text}]"));
        }
    }

    #[test]
    fn test_outputs_carry_engine_columns() {
        let p  = echo_builder(config(2, 3), "<{prompt}>").build().unwrap();
        let ds = p.apply(Dataset::from_records(ctx(), texts(7)));

        let out = ds.take(100).unwrap();
        assert_eq!(out.len(), 7);
        for r in &out {
            let text = r.get_str("text").unwrap();
            assert_eq!(r.get_str("generated_text").unwrap(), format!("<{text}>"));
            assert!(r.contains_key("num_input_tokens"));
            assert!(r.contains_key("prompt"));
        }
    }

    #[test]
    fn test_lower_runtime_version_fails_before_engine_load() {
        let loaded = Arc::new(AtomicBool::new(false));
        let flag   = Arc::clone(&loaded);

        let result = ProcessorBuilder::new(config(1, 64))
            .preprocess(user_only)
            .engine_factory(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(Arc::new(EchoEngine::new("{prompt}")) as Arc<dyn InferenceEngine>)
            })
            .runtime_version(Version::new(2, 43, 0))
            .min_runtime_version(Version::new(2, 44, 1))
            .build();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("at least 2.44.1"));
        assert!(!loaded.load(Ordering::SeqCst));
    }

    #[test]
    fn test_one_replica_per_unit_of_concurrency() {
        let loads = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&loads);
        ProcessorBuilder::new(config(3, 8))
            .engine_factory(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(EchoEngine::new("{prompt}")) as Arc<dyn InferenceEngine>)
            })
            .build()
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_independent_builds_share_no_state() {
        let cfg = config(1, 64);

        let a = echo_builder(cfg.clone(), "{prompt}")
            .postprocess(|row, _| Ok(row.with("tag", "a")))
            .build()
            .unwrap();
        let b = echo_builder(cfg.clone(), "{prompt}")
            .postprocess(|row, _| Ok(row.with("tag", "b").with("only_b", true)))
            .build()
            .unwrap();

        let src   = Dataset::from_records(ctx(), texts(3));
        let out_a = a.apply(src.clone()).take(10).unwrap();
        let out_b = b.apply(src).take(10).unwrap();

        assert!(out_a.iter().all(|r| r.get_str("tag") == Some("a") && !r.contains_key("only_b")));
        assert!(out_b.iter().all(|r| r.get_str("tag") == Some("b")));
        assert_eq!(a.config(), &cfg);
        assert_eq!(b.config(), &cfg);
    }

    #[test]
    fn test_peek_on_unbounded_source_stops_early() {
        let pulled  = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let source = Dataset::from_plan(ctx(), None, move || {
            let counter = Arc::clone(&counter);
            let rows: RowIter = Box::new((0..).map(move |i| -> Result<Record> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Record::from_text(format!("p{i}")))
            }));
            Ok(rows)
        });

        let p   = echo_builder(config(2, 4), "{prompt}").build().unwrap();
        let out = p.apply(source).take(10).unwrap();

        assert_eq!(out.len(), 10);
        // Two waves of 2 x 4 rows
        assert_eq!(pulled.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_default_preprocess_reads_messages_field() {
        let row = Record::try_from(serde_json::json!({
            "id": 1,
            "messages": [{"role": "user", "content": "hello there"}],
            "sampling_params": {"max_tokens": 1}
        }))
        .unwrap();

        let p = ProcessorBuilder::new(config(1, 4))
            .engine_factory(|_| Ok(Arc::new(EchoEngine::new("{prompt}")) as Arc<dyn InferenceEngine>))
            .build()
            .unwrap();
        let out = p.apply(Dataset::from_records(ctx(), vec![row])).take(1).unwrap();
        assert_eq!(out[0].get_str("generated_text"), Some("hello"));
    }

    #[test]
    fn test_preprocess_error_aborts_stream() {
        let p  = echo_builder(config(1, 2), "{prompt}").build().unwrap();
        let ds = p.apply(Dataset::from_records(ctx(), vec![Record::new().with("id", 1)]));

        let mut rows = ds.iter().unwrap();
        let err = rows.next().unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("preprocess failed"));
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_short_engine_output_is_rejected() {
        struct Lossy;
        impl InferenceEngine for Lossy {
            fn model_id(&self) -> &str { "lossy" }
            fn generate(&self, requests: &[InferenceRequest]) -> Result<Vec<InferenceResult>> {
                Ok(requests.iter().skip(1).map(|_| InferenceResult::new("x")).collect())
            }
        }

        let p = ProcessorBuilder::new(config(1, 4))
            .preprocess(user_only)
            .engine_factory(|_| Ok(Arc::new(Lossy) as Arc<dyn InferenceEngine>))
            .build()
            .unwrap();
        assert!(p.apply(Dataset::from_records(ctx(), texts(2))).count().is_err());
    }

    #[test]
    fn test_metrics_logged_per_batch() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = Arc::new(MetricsLogger::new(dir.path()).unwrap());
        let p = echo_builder(config(2, 2), "{prompt}")
            .metrics(Arc::clone(&logger))
            .build()
            .unwrap();

        assert_eq!(p.apply(Dataset::from_records(ctx(), texts(5))).count().unwrap(), 5);

        let csv = std::fs::read_to_string(logger.csv_path()).unwrap();
        let batches: HashSet<&str> = csv
            .lines()
            .skip(1)
            .filter_map(|l| l.split(',').next())
            .collect();
        assert_eq!(batches, HashSet::from(["1", "2", "3"]));
    }
}
