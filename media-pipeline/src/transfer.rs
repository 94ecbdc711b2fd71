//! Streaming transfer engine
//!
//! One inbound byte stream is written to object storage and to a local temp
//! file at the same time. The storage upload drives the read; every chunk it
//! reads is copied into an in-process pipe that a second branch drains into
//! the local file. Neither side buffers the whole payload.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use mediavault_types::Cid;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::storage::{ObjectReader, ObjectStorage};

/// Capacity of the pipe between the two branches
const PIPE_CAPACITY: usize = 256 * 1024;

/// Reader that copies everything it yields into a pipe.
///
/// If the pipe's reading end goes away the copy stops and reading continues
/// undisturbed.
struct TeeReader {
    inner: ObjectReader,
    pipe: Option<DuplexStream>,
    pending: Vec<u8>,
    written: usize,
}

impl TeeReader {
    fn new(inner: ObjectReader, pipe: DuplexStream) -> Self {
        Self {
            inner,
            pipe: Some(pipe),
            pending: Vec::new(),
            written: 0,
        }
    }

    /// Push buffered bytes into the pipe
    fn poll_drain_pending(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        while let Some(pipe) = self.pipe.as_mut() {
            if self.written >= self.pending.len() {
                break;
            }
            match Pin::new(pipe).poll_write(cx, &self.pending[self.written..]) {
                Poll::Ready(Ok(n)) if n > 0 => self.written += n,
                Poll::Ready(_) => {
                    // Local branch is gone
                    self.pipe = None;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        self.pending.clear();
        self.written = 0;
        Poll::Ready(())
    }
}

impl AsyncRead for TeeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // The pipe provides backpressure: no new reads until it has taken
        // everything read so far
        ready!(this.poll_drain_pending(cx));

        let before = buf.filled().len();
        ready!(this.inner.as_mut().poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];

        if fresh.is_empty() {
            if let Some(pipe) = this.pipe.as_mut() {
                ready!(Pin::new(pipe).poll_shutdown(cx)).ok();
                this.pipe = None;
            }
            return Poll::Ready(Ok(()));
        }

        if this.pipe.is_some() {
            this.pending.extend_from_slice(fresh);
            // Whatever does not fit now is flushed on the next read
            let _ = this.poll_drain_pending(cx);
        }

        Poll::Ready(Ok(()))
    }
}

async fn drain_to_file(mut pipe: DuplexStream, local_path: &Path) -> io::Result<u64> {
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(local_path).await?;
    let copied = tokio::io::copy(&mut pipe, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(copied)
}

/// Copy `source` to `remote_key` and `local_path` concurrently.
///
/// Both branches always run to completion before this returns. The result is
/// the stored object's CID only if both succeeded; otherwise the error carries
/// whichever branches failed.
pub async fn transfer(
    storage: &dyn ObjectStorage,
    source: ObjectReader,
    remote_key: &str,
    local_path: &Path,
) -> Result<Cid, TransferError> {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let tee = TeeReader::new(source, writer);

    let (remote, local) = tokio::join!(
        storage.push_path(remote_key, Box::pin(tee)),
        drain_to_file(reader, local_path),
    );

    match (remote, local) {
        (Ok(cid), Ok(bytes)) => {
            debug!(remote_key, local = %local_path.display(), bytes, cid = %cid, "Transfer complete");
            Ok(cid)
        }
        (remote, local) => {
            let error = TransferError {
                remote: remote.err(),
                local: local.err(),
            };
            warn!(remote_key, local = %local_path.display(), error = %error, "Transfer failed");
            Err(error)
        }
    }
}
