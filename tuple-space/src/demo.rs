//! Runs a server and a fleet of script-driven clients in one process.

use std::sync::Arc;

use anyhow::Result;
use tokio::{io::AsyncWriteExt, sync::oneshot, task::JoinSet};
use tracing::{info, warn};

use crate::{
    cli::DemoArgs,
    client::replay_file,
    server::Server,
    stats::{self, StatsReporter},
    store::TupleStore,
};

/// Replays `client_1.txt ..= client_<n>.txt` concurrently, one connection per
/// script, then emits a final statistics snapshot and stops the server.
pub async fn run(args: DemoArgs) -> Result<()> {
    let store = Arc::new(TupleStore::new());
    let server = Server::bind(args.listen, Arc::clone(&store)).await?;
    let addr = server.local_addr()?;
    info!("tuple space listening on {}", addr);

    let reporter =
        StatsReporter::new(Arc::clone(&store), args.stats.interval(), args.stats.format).spawn();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    let mut clients = JoinSet::new();
    for client in 1..=args.clients {
        let path = args.script_path(client);
        let addr = addr.to_string();
        clients.spawn(async move {
            let mut output = Vec::new();
            let result = replay_file(&addr, &path, &mut output).await;
            (client, result, output)
        });
    }

    // Each client's lines are printed as one block once it finishes.
    let mut stdout = tokio::io::stdout();
    while let Some(joined) = clients.join_next().await {
        match joined {
            Ok((client, result, output)) => {
                stdout.write_all(&output).await?;
                stdout.flush().await?;
                match result {
                    Ok(answered) => info!(client, answered, "demo client finished"),
                    Err(error) => warn!(client, error = ?error, "demo client failed"),
                }
            }
            Err(error) => warn!(?error, "demo client task did not complete"),
        }
    }

    let _ = shutdown_tx.send(());
    server_task.await??;
    reporter.abort();

    stats::emit(&store.snapshot(), args.stats.format).await?;
    Ok(())
}
