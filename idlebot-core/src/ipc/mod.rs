// File: idlebot-core/src/ipc/mod.rs
//
// Framing for the master <-> worker pipe: one JSON message per line.

use std::marker::PhantomData;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::Error;

/// Longest accepted line. Owned-games lists are the largest messages.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub struct IpcReader<T, R> {
    frames: FramedRead<R, LinesCodec>,
    _message: PhantomData<fn() -> T>,
}

impl<T, R> IpcReader<T, R>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            frames: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            _message: PhantomData,
        }
    }

    /// Next message, or `None` once the peer closed its end.
    ///
    /// Lines that are oversized or do not decode are logged and skipped; only
    /// IO failures end the stream with an error.
    pub async fn next(&mut self) -> Result<Option<T>, Error> {
        loop {
            let line = match self.frames.next().await {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("[IPC] dropped a frame longer than {} bytes", MAX_FRAME_LEN);
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(Error::Ipc(e.to_string())),
            };

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!("[IPC] skipping undecodable message: {}", e),
            }
        }
    }
}

pub struct IpcWriter<T, W> {
    frames: FramedWrite<W, LinesCodec>,
    _message: PhantomData<fn(T)>,
}

impl<T, W> IpcWriter<T, W>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            frames: FramedWrite::new(writer, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            _message: PhantomData,
        }
    }

    pub async fn send(&mut self, msg: &T) -> Result<(), Error> {
        let line = serde_json::to_string(msg)?;
        self.frames.send(line).await.map_err(|e| Error::Ipc(e.to_string()))
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        SinkExt::<String>::close(&mut self.frames)
            .await
            .map_err(|e| Error::Ipc(e.to_string()))
    }
}

/// Writes everything queued on `rx` until the queue closes or the pipe breaks.
pub async fn pump<T, W>(writer: W, mut rx: mpsc::UnboundedReceiver<T>, peer: String) -> Result<(), Error>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut out = IpcWriter::<T, W>::new(writer);
    while let Some(msg) = rx.recv().await {
        if let Err(e) = out.send(&msg).await {
            warn!("[IPC] write to {} failed: {}", peer, e);
            return Err(e);
        }
    }
    debug!("[IPC] outbound queue for {} closed", peer);
    if let Err(e) = out.close().await {
        debug!("[IPC] closing pipe to {}: {}", peer, e);
    }
    Ok(())
}
