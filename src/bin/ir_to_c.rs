use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

/// Assemble a JSON-encoded IR program and emit the C translation unit.
#[derive(Parser)]
#[command(name = "ir_to_c", about = "Assemble an IR program and emit C")]
struct Cli {
    /// Input program (JSON)
    input: PathBuf,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let program: regir::Program = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;

    info!("assembling '{}'", program.link_name);
    let ir = regir::assemble(&program)
        .with_context(|| format!("failed to assemble '{}'", program.link_name))?;
    info!(
        "verified {} instructions, {} registers",
        ir.instructions.len(),
        ir.register_count
    );

    let c = regir::to_c(&ir);
    match &cli.output {
        Some(path) => {
            fs::write(path, c).with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => print!("{}", c),
    }

    Ok(())
}
