use anyhow::Result;
use clap::{CommandFactory, Parser};
use mqhttp_server::server::params::{Cli, Command};
use mqhttp_server::{server, BridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Some(Command::Start(params)) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    server::init_tracing();
    let config = BridgeConfig::from_params(params)?;
    server::start(config).await
}
