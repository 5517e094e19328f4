//! Control socket (§4.H): a persistent Unix-domain connection carrying
//! length-prefixed JSON `Command`/`Response` pairs.
//!
//! The teacher's `socket`/`socket::root` modules frame each request as
//! write-then-shutdown over a fresh connection. That doesn't fit `status`
//! polling, which wants one connection to carry many request/response pairs,
//! so this tightens the framing to an explicit 4-byte big-endian length
//! prefix and keeps the connection open across requests.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

/// Frames larger than this are rejected outright rather than trusted to
/// allocate — nothing in the command/response vocabulary is anywhere close.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    Validate { path: camino::Utf8PathBuf },
    Reload,
    Upgrade { path: camino::Utf8PathBuf, sha256: String },
    Status,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Status {
        state: String,
        schema_version: Option<String>,
        zones: usize,
        interfaces: usize,
    },
    Error {
        exit_code: i32,
        message: String,
    },
    Busy,
}

/// One inbound request paired with the channel its caller is waiting on —
/// the same shape as the teacher's `SocketCmd`/`oneshot::Sender<Response>`.
pub struct ControlRequest {
    pub command: Command,
    pub respond_to: oneshot::Sender<Response>,
}

/// Binds `socket_path`, sets `0600` permissions immediately after bind (§6),
/// and accepts connections forever, handing each parsed [`Command`] to
/// `queue` paired with a response channel. Never returns except on a bind
/// or accept error.
pub async fn serve(socket_path: &Path, queue: mpsc::Sender<ControlRequest>) -> Result<(), Error> {
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }
    let listener = UnixListener::bind(socket_path)?;
    tokio::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)).await?;

    loop {
        let (stream, _addr) = listener.accept().await?;
        let queue = queue.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, queue).await {
                tracing::debug!(error = ?err, "control connection closed");
            }
        });
    }
}

async fn handle_connection(mut stream: UnixStream, queue: mpsc::Sender<ControlRequest>) -> Result<(), Error> {
    loop {
        let command: Command = match read_frame(&mut stream).await? {
            Some(command) => command,
            None => return Ok(()),
        };

        let (respond_to, response_rx) = oneshot::channel();
        match queue.try_send(ControlRequest { command, respond_to }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                write_frame(&mut stream, &Response::Busy).await?;
                continue;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
        }

        let response = response_rx.await.unwrap_or_else(|_| Response::Error {
            exit_code: 1,
            message: "supervisor shut down before responding".to_string(),
        });
        write_frame(&mut stream, &response).await?;
    }
}

/// Connects to `socket_path`, sends one `command`, and returns its response —
/// the client half used by the CLI (`flywall status`, `flywall reload`, ...).
pub async fn send_request(socket_path: &Path, command: &Command) -> Result<Response, Error> {
    let mut stream = UnixStream::connect(socket_path).await?;
    write_frame(&mut stream, command).await?;
    read_frame(&mut stream).await?.ok_or_else(|| {
        Error::IO(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "control connection closed before a response arrived",
        ))
    })
}

async fn read_frame<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> Result<Option<T>, Error> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::IO(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::IO(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "control frame exceeds the maximum length",
        )));
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    let value = serde_json::from_slice(&buf)
        .map_err(|e| Error::IO(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    Ok(Some(value))
}

async fn write_frame<T: serde::Serialize>(stream: &mut UnixStream, value: &T) -> Result<(), Error> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| Error::IO(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_over_a_socket_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        write_frame(&mut a, &Command::Status).await.unwrap();
        let got: Command = read_frame(&mut b).await.unwrap().unwrap();
        assert!(matches!(got, Command::Status));
    }

    #[tokio::test]
    async fn closed_peer_reads_as_none() {
        let (a, mut b) = UnixStream::pair().unwrap();
        drop(a);
        let got: Option<Command> = read_frame(&mut b).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn serve_returns_busy_when_the_queue_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("ctl.sock");
        let (tx, _rx) = mpsc::channel::<ControlRequest>(1);

        // Occupy the queue's only slot so the next `try_send` sees `Full`.
        let (filler_tx, _filler_rx) = oneshot::channel();
        tx.try_send(ControlRequest {
            command: Command::Status,
            respond_to: filler_tx,
        })
        .unwrap();

        let serve_path = socket_path.clone();
        tokio::spawn(async move {
            let _ = serve(&serve_path, tx).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let response = send_request(&socket_path, &Command::Status).await.unwrap();
        assert!(matches!(response, Response::Busy));
    }

    #[tokio::test]
    async fn serve_sets_socket_permissions_to_0600() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("ctl.sock");
        let (tx, mut rx) = mpsc::channel::<ControlRequest>(8);

        let serve_path = socket_path.clone();
        tokio::spawn(async move {
            let _ = serve(&serve_path, tx).await;
        });
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let _ = req.respond_to.send(Response::Ok);
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let meta = std::fs::metadata(&socket_path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn a_single_connection_carries_more_than_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("ctl.sock");
        let (tx, mut rx) = mpsc::channel::<ControlRequest>(8);

        let serve_path = socket_path.clone();
        tokio::spawn(async move {
            let _ = serve(&serve_path, tx).await;
        });
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let _ = req.respond_to.send(Response::Ok);
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        write_frame(&mut stream, &Command::Status).await.unwrap();
        let first: Response = read_frame(&mut stream).await.unwrap().unwrap();
        write_frame(&mut stream, &Command::Status).await.unwrap();
        let second: Response = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(first, Response::Ok));
        assert!(matches!(second, Response::Ok));
    }
}
