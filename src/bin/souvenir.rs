//! Shim binary that calls into the `souvenir_gateway` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;
use souvenir_gateway::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    souvenir_gateway::inner_main(Cli::parse()).await
}
