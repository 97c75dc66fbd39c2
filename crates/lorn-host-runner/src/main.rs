use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use lorn_host_runner::{run_module, RunnerConfig, RunnerReport};

#[derive(Parser)]
#[command(name = "lorn-host-runner")]
#[command(about = "Runs a compiled lorn guest module against the host runtime.", long_about = None)]
struct Cli {
    /// Compiled guest module (.wasm).
    #[arg(long)]
    module: PathBuf,

    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_memory_bytes: usize,

    /// Stream guest output to stdout instead of capturing it into the report.
    #[arg(long)]
    stream_output: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let module_bytes = std::fs::read(&cli.module)
        .with_context(|| format!("read module: {}", cli.module.display()))?;

    let config = RunnerConfig {
        max_memory_bytes: cli.max_memory_bytes,
        capture_output: !cli.stream_output,
    };
    let result = run_module(&config, &module_bytes)?;

    let report = RunnerReport::from_result(&result);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(ExitCode::from(report.process_exit_code()))
}
