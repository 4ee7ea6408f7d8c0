use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = cli::RootCmd::parse();
    acops::logging::init(cmd.log_level.as_deref(), "info");
    cli::run(cmd).await
}
