// ============================================================
// Layer 2 — Inspect Use Case
// ============================================================
// Look at an input before spending GPU time on it: load it
// lazily, report the schema, count the rows. No engine is
// loaded.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::data::loader::{Format, Loader};
use crate::data::schema::Schema;
use crate::infra::context::{ContextOptions, RuntimeContext};

#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub input:  PathBuf,
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InspectReport {
    pub schema: Option<Schema>,
    pub count:  usize,
}

pub struct InspectUseCase {
    config: InspectConfig,
}

impl InspectUseCase {
    pub fn new(config: InspectConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<InspectReport> {
        let context = RuntimeContext::init(ContextOptions::default());
        let report = Loader::new(context.clone())
            .read(&self.config.input, self.config.format)
            .and_then(|ds| {
                Ok(InspectReport {
                    schema: ds.schema().cloned(),
                    count:  ds.count()?,
                })
            })
            .with_context(|| format!("Cannot inspect '{}'", self.config.input.display()));
        context.shutdown();
        report
    }
}
