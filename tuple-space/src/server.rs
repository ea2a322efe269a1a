use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{FrameError, FrameReader, Request, Response, to_io_error, write_frame},
    store::TupleStore,
};

pub struct Server {
    listener: TcpListener,
    store: Arc<TupleStore>,
}

impl Server {
    pub fn new(listener: TcpListener, store: Arc<TupleStore>) -> Self {
        Self { listener, store }
    }

    pub async fn bind(addr: SocketAddr, store: Arc<TupleStore>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::new(listener, store))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. Connections that are
    /// already being served keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, store } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("tuple space no longer accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &store);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    store: &Arc<TupleStore>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, store),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, store: &Arc<TupleStore>) {
    let client = store.register_client();
    let store = Arc::clone(store);
    tokio::spawn(async move {
        info!(peer = %peer, client, "client connected");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        match serve_connection(&mut reader, &mut writer, &store).await {
            Ok(served) => info!(peer = %peer, client, served, "client disconnected"),
            Err(err) => warn!(peer = %peer, client, error = ?err, "client connection closed with error"),
        }
    });
}

/// Serves requests until the peer closes the stream, returning how many
/// frames were answered.
///
/// Each iteration awaits a frame, decodes it, executes it against the store
/// and writes the response back. Malformed frames, including lines that are
/// not UTF-8 or are too long, are answered with an ERR response and the loop
/// carries on; only I/O failures end it early.
pub async fn serve_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    store: &TupleStore,
) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameReader::new(reader);
    let mut served = 0;
    while let Some(frame) = frames.next_frame().await? {
        let response = match frame {
            Ok(frame) => handle_frame(&frame, store),
            Err(error) => reject(&error),
        };
        write_response(writer, &response).await?;
        served += 1;
    }
    Ok(served)
}

pub fn handle_frame(frame: &str, store: &TupleStore) -> Response {
    match Request::decode(frame) {
        Ok(request) => {
            debug!(%request, "executing request");
            execute(request, store)
        }
        Err(error) => reject(&error),
    }
}

fn reject(error: &FrameError) -> Response {
    debug!(%error, "rejecting malformed frame");
    error.reply()
}

pub fn execute(request: Request, store: &TupleStore) -> Response {
    let outcome = match request {
        Request::Read { key } => store
            .read(&key)
            .map(|value| format!("({key}, {value}) read")),
        Request::Get { key } => store
            .get(&key)
            .map(|value| format!("({key}, {value}) removed")),
        Request::Put { key, value } => {
            let message = format!("({key}, {value}) added");
            store.put(key, value).map(|()| message)
        }
    };

    match outcome {
        Ok(message) => Response::ok(message),
        Err(error) => Response::err(error.to_string()),
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // A not-found reply for a near-limit key can outgrow the length code.
    let frame = match response.encode() {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%error, "response does not fit in a frame");
            Response::err("response too large")
                .encode()
                .map_err(to_io_error)?
        }
    };
    write_frame(writer, &frame).await
}
