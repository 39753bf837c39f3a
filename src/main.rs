use anyhow::Result;
use clap::Parser;

use yara_triage::cli::Cli;

// Orchestration is cooperative on one thread; matching runs on its own worker pool
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}
