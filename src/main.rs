mod cli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	cli::setup_tracing();
	cli::run(cli::Cli::parse()).await
}
