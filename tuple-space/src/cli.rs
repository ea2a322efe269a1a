use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::stats::{DEFAULT_PERIOD, StatsFormat};

pub const DEFAULT_PORT: u16 = 50000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the tuple space over TCP.
    Server(ServerArgs),
    /// Replay a request script against a running server.
    Client(ClientArgs),
    /// Start a server in-process and replay `client_<n>.txt` scripts against it concurrently.
    Demo(DemoArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:50000")]
    pub listen: SocketAddr,

    #[command(flatten)]
    pub stats: StatsArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Seconds between statistics reports.
    #[arg(
        long = "stats-interval",
        default_value_t = DEFAULT_PERIOD.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_secs: u64,

    /// How statistics are emitted.
    #[arg(long = "stats-format", value_enum, default_value_t = StatsFormat::Text)]
    pub format: StatsFormat,
}

impl StatsArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host running the tuple space server.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port the server listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Script with one `PUT key value`, `READ key` or `GET key` per line.
    pub requests: PathBuf,
}

impl ClientArgs {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Socket address the embedded server binds to.
    #[arg(long, default_value = "127.0.0.1:50000")]
    pub listen: SocketAddr,

    /// Number of concurrent clients to run.
    #[arg(long, default_value_t = 10)]
    pub clients: usize,

    /// Directory holding `client_1.txt` through `client_<n>.txt`.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    #[command(flatten)]
    pub stats: StatsArgs,
}

impl DemoArgs {
    pub fn script_path(&self, client: usize) -> PathBuf {
        self.dir.join(format!("client_{client}.txt"))
    }
}
