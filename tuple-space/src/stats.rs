use std::{io, sync::Arc, time::Duration};

use clap::ValueEnum;
use tokio::{
    io::AsyncWriteExt,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::store::{StatsSnapshot, TupleStore};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StatsFormat {
    /// One structured log event per tick.
    #[default]
    Text,
    /// One JSON object per line on stdout.
    Json,
}

/// Periodically snapshots the store and emits the figures. Never mutates it.
pub struct StatsReporter {
    store: Arc<TupleStore>,
    period: Duration,
    format: StatsFormat,
}

impl StatsReporter {
    pub fn new(store: Arc<TupleStore>, period: Duration, format: StatsFormat) -> Self {
        Self {
            store,
            // tokio intervals panic on a zero period.
            period: period.max(Duration::from_millis(1)),
            format,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Emits a snapshot at the end of every period, forever.
    pub async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let snapshot = self.store.snapshot();
            if let Err(error) = emit(&snapshot, self.format).await {
                warn!(?error, "failed to emit statistics");
            }
        }
    }
}

pub async fn emit(snapshot: &StatsSnapshot, format: StatsFormat) -> io::Result<()> {
    match format {
        StatsFormat::Text => {
            log_snapshot(snapshot);
            Ok(())
        }
        StatsFormat::Json => {
            let mut line = serde_json::to_vec(snapshot).map_err(io::Error::other)?;
            line.push(b'\n');
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&line).await?;
            stdout.flush().await
        }
    }
}

pub fn log_snapshot(snapshot: &StatsSnapshot) {
    let counters = &snapshot.counters;
    info!(
        tuples = snapshot.tuples,
        avg_tuple_size = snapshot.avg_tuple_size,
        avg_key_size = snapshot.avg_key_size,
        avg_value_size = snapshot.avg_value_size,
        clients = counters.clients,
        operations = counters.operations,
        reads = counters.reads,
        gets = counters.gets,
        puts = counters.puts,
        errors = counters.errors,
        "tuple space statistics"
    );
}
