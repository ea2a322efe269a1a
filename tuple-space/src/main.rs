use std::{io::IsTerminal, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tuple_space::{
    cli::{Cli, Command, ServerArgs},
    client, demo,
    server::Server,
    stats::StatsReporter,
    store::TupleStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => client::run(args).await?,
        Command::Demo(args) => demo::run(args).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let store = Arc::new(TupleStore::new());
    let server = Server::bind(args.listen, Arc::clone(&store)).await?;
    let addr = server.local_addr()?;
    info!("tuple space listening on {}", addr);

    let reporter = StatsReporter::new(store, args.stats.interval(), args.stats.format).spawn();
    let result = server.run_until_ctrl_c().await;
    reporter.abort();
    result
}
