use std::env;
use std::fs;

use aegis_frontier::{optimize, RunInput};
use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

const RUN_FILE_VARIABLE: &str = "AEGIS_FRONTIER_RUN_FILE";

fn main() -> Result<()> {
    dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let run_file = match env::args().nth(1) {
        Some(path) => path,
        None => env::var(RUN_FILE_VARIABLE).with_context(|| {
            format!("pass a run file as the first argument or set {RUN_FILE_VARIABLE}")
        })?,
    };

    let content = fs::read_to_string(&run_file)
        .with_context(|| format!("could not read run file {run_file}"))?;
    let input: RunInput = serde_json::from_str(&content)
        .with_context(|| format!("could not parse run file {run_file}"))?;
    info!(
        "Loaded {} price series from {}",
        input.prices.len(),
        run_file
    );

    let report = optimize(&input).with_context(|| format!("optimization of {run_file} failed"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
