// ============================================================
// Layer 4 — Lazy Dataset
// ============================================================
// A Dataset is a *plan*, not a collection. Nothing is read or
// computed until a consuming operation runs it:
//
//   count()       → runs the plan, counts rows
//   take(n)       → runs the plan, stops after n rows
//   iter()        → runs the plan, hands back the row iterator
//   write_jsonl() → runs the plan, streams every row to disk
//
// Every run is a fresh single pass over the source. Stages such
// as the inference processor wrap the upstream plan with
// `map_rows`, so a `take(10)` at the end only pulls as many
// upstream rows as are needed to produce 10 outputs.
//
// A dataset built from a one-shot iterator can run exactly
// once; running it again is an error (there is nothing left to
// count).
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Rust Book §16 (Send and Sync)

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::data::schema::Schema;
use crate::data::writer::JsonlWriter;
use crate::domain::record::Record;
use crate::infra::context::RuntimeContext;
use crate::infra::manifest::WriteSummary;

/// A single execution of a dataset plan
pub type RowIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

type Plan = Arc<dyn Fn() -> Result<RowIter> + Send + Sync>;

#[derive(Clone)]
pub struct Dataset {
    plan:    Plan,
    schema:  Option<Schema>,
    context: Arc<RuntimeContext>,
}

impl Dataset {
    /// Build a dataset from a function that starts one execution
    pub fn from_plan<F>(context: Arc<RuntimeContext>, schema: Option<Schema>, plan: F) -> Self
    where
        F: Fn() -> Result<RowIter> + Send + Sync + 'static,
    {
        Self { plan: Arc::new(plan), schema, context }
    }

    /// In-memory records; can be executed any number of times
    pub fn from_records(context: Arc<RuntimeContext>, records: Vec<Record>) -> Self {
        let schema  = records.first().map(Schema::infer);
        let records = Arc::new(records);
        Self::from_plan(context, schema, move || {
            let records = Arc::clone(&records);
            let rows: RowIter = Box::new((0..records.len()).map(move |i| Ok(records[i].clone())));
            Ok(rows)
        })
    }

    /// Wrap an iterator that can only be walked once
    pub fn from_one_shot<I>(context: Arc<RuntimeContext>, rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send + 'static,
    {
        let rows: RowIter = Box::new(rows.into_iter().map(Ok::<Record, anyhow::Error>));
        let slot = Mutex::new(Some(rows));
        Self::from_plan(context, None, move || {
            slot.lock()
                .map_err(|_| anyhow!("dataset source lock poisoned"))?
                .take()
                .ok_or_else(|| anyhow!("dataset source was a one-shot iterator and has already been consumed"))
        })
    }

    /// Wrap this plan with a row-stream transformation
    pub fn map_rows<F>(&self, schema: Option<Schema>, stage: F) -> Dataset
    where
        F: Fn(RowIter) -> Result<RowIter> + Send + Sync + 'static,
    {
        let upstream = Arc::clone(&self.plan);
        Dataset {
            plan:    Arc::new(move || stage(upstream()?)),
            schema,
            context: Arc::clone(&self.context),
        }
    }

    /// Best-effort column description; `None` when unknown without running the plan
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Start a new execution
    pub fn iter(&self) -> Result<RowIter> {
        (self.plan)()
    }

    /// Run the whole plan and count rows. Blocks until done.
    pub fn count(&self) -> Result<usize> {
        let rows = self.iter().context("count unavailable")?;
        let mut n = 0usize;
        for row in rows {
            row?;
            n += 1;
        }
        Ok(n)
    }

    /// Materialise at most `limit` rows
    pub fn take(&self, limit: usize) -> Result<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.iter()?.take(limit).collect()
    }

    /// Run the whole plan and persist every row as JSONL part files
    pub fn write_jsonl(&self, dest: impl AsRef<Path>) -> Result<WriteSummary> {
        JsonlWriter::new(Arc::clone(&self.context)).write(self, dest)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
