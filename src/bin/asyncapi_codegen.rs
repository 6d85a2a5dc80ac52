//! Generator CLI.
//!
//! Reads an AsyncAPI 2.x document, normalizes it and writes the generated
//! Rust source. Exit codes: 0 success, 1 generation error (invalid
//! specification, file format or schema conflict), 2 I/O error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use asyncapi_codegen::asyncapi::Specification;
use asyncapi_codegen::codegen::{self, Generator};
use asyncapi_codegen::error::Error;

#[derive(Debug, Parser)]
#[command(
    name = "asyncapi-codegen",
    about = "Generate Rust clients from an AsyncAPI 2.x specification",
    version
)]
struct Args {
    /// Path to the AsyncAPI document (.yaml, .yml or .json).
    #[arg(short, long)]
    input: PathBuf,

    /// Destination file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Module name embedded in the generated source.
    #[arg(short, long, default_value = "asyncapi")]
    package: String,

    /// Comma-separated subset of application,user,types.
    #[arg(short, long, default_value = "user,application,types")]
    generate: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::Io(_)) => {
            error!(error = %e, "I/O failure");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Generation failed");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let mut specification = Specification::from_path(&args.input)?;
    specification.process()?;

    let roles = codegen::parse_roles(&args.generate)?;
    let generator = Generator::new(specification, &args.package, roles);
    let output = generator.generate()?;

    match &args.output {
        Some(path) => std::fs::write(path, output)?,
        None => print!("{output}"),
    }
    Ok(())
}
