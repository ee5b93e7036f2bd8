// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All work is delegated to Layer 2 (application); this layer
// only routes and prints.
//
// Two commands are supported:
//   1. `inspect` — schema and row count of an input
//   2. `run`     — batch inference, then peek or write
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, RunArgs};

use crate::application::inference_use_case::{InferenceUseCase, RunOutcome, RunOutput};
use crate::application::inspect_use_case::InspectUseCase;
use crate::data::schema::Schema;
use crate::domain::result::{GENERATED_TEXT_FIELD, PROMPT_FIELD};

/// The main CLI struct. clap reads the fields and generates
/// argument parsing code via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "batch-llm",
    version,
    about = "Run a chat model over every record of a dataset, in batches."
)]
pub struct Cli {
    /// Only log warnings and errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// The subcommand to run (inspect or run)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log directive for this crate
    pub fn log_directive(&self) -> &'static str {
        if self.quiet { "batch_llm=warn" } else { "batch_llm=info" }
    }

    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Inspect(args) => run_inspect(args),
            Commands::Run(args)     => run_inference(args),
        }
    }
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let report = InspectUseCase::new(args.into()).execute()?;
    print_schema(report.schema.as_ref());
    println!("Size of dataset: {} prompts", report.count);
    Ok(())
}

fn run_inference(args: RunArgs) -> Result<()> {
    tracing::info!("Starting batch inference over: {}", args.input.display());

    // Convert CLI args → application config
    let outcome = InferenceUseCase::new(args.into()).execute()?;
    print_outcome(&outcome);
    Ok(())
}

fn print_schema(schema: Option<&Schema>) {
    match schema {
        Some(s) => println!("{s}"),
        None    => println!("Schema: unknown until the data is read"),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    print_schema(outcome.schema.as_ref());
    if let Some(n) = outcome.size {
        println!("Size of dataset: {n} prompts");
    }

    match &outcome.output {
        RunOutput::Peeked(rows) => {
            for row in rows {
                println!("Prompt: {}", row.get_str(PROMPT_FIELD).unwrap_or_default());
                println!("Generated text: {}", row.get_str(GENERATED_TEXT_FIELD).unwrap_or_default());
                println!();
            }
        }
        RunOutput::Written(summary) => {
            println!(
                "Wrote {} rows to {} file(s).",
                summary.total_rows,
                summary.files.len()
            );
        }
    }
}
