use anyhow::Result;
use choop_rs_core::cli::Args;
use clap::Parser;

fn main() -> Result<()> {
    let args = Args::parse();
    choop_rs_core::run_cli(&args)
}
