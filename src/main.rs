use clap::Parser;
use pmp_key_manager::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli::keys::run(cli).await
}
