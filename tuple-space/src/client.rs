use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{FrameReader, Request, Response, write_frame},
    script,
};

/// One connection to a tuple space server. Requests are strictly sequential:
/// each call waits for its response before returning.
pub struct Client {
    reader: FrameReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(BufReader::new(reader)),
            writer,
        })
    }

    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        let frame = request.encode()?;
        self.send_frame(&frame).await
    }

    /// Sends an already framed line, valid or not, and decodes the reply.
    pub async fn send_frame(&mut self, frame: &str) -> Result<Response> {
        write_frame(&mut self.writer, frame).await?;
        match self.reader.next_frame().await? {
            Some(reply) => Ok(Response::decode(&reply?)?),
            None => bail!("server closed the connection"),
        }
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    replay_file(&args.server_addr(), &args.requests, &mut stdout).await?;
    Ok(())
}

/// Loads the script at `path`, replays it against `addr` and writes one
/// outcome line per request to `out`. Returns the number of requests answered.
pub async fn replay_file<W>(addr: &str, path: &Path, out: &mut W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let requests = script::load(path).await?;
    let mut client = Client::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!("connected to {addr}");

    let answered = replay(&mut client, &requests, out).await?;
    client.shutdown().await;
    Ok(answered)
}

pub async fn replay<W>(client: &mut Client, requests: &[Request], out: &mut W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut answered = 0;
    for request in requests {
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%request, %error, "skipping request that does not fit in a frame");
                continue;
            }
        };

        let response = client.send_frame(&frame).await?;
        let line = format!("{request}: {}\n", response.payload());
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        answered += 1;
    }
    Ok(answered)
}
