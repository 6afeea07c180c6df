use anyhow::Result;
use cred_bench::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
