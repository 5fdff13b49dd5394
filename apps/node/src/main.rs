use eyre::Result;

mod chain;
mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
