use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use russh_sftp::client::fs::File as RemoteFile;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::channel::SshConnector;
use crate::error::{Error, Result};
use crate::pool::ChannelGuard;

type Guard = ChannelGuard<SshConnector>;

/// Close the remote handle, perform delete-on-close, release the channel.
///
/// The close error is primary; a delete failure is attached as cleanup
/// context.
async fn close_stream(
    file: Option<RemoteFile>,
    guard: Option<Guard>,
    path: &str,
    delete_on_close: bool,
) -> Result<()> {
    let mut error: Option<Error> = None;
    if let Some(mut file) = file {
        if let Err(e) = file.shutdown().await {
            error = Error::aggregate(error, e.into());
        }
    }
    if delete_on_close {
        if let Some(guard) = guard.as_ref() {
            if let Err(e) = guard.delete(path, false).await {
                error = Error::aggregate(error, e);
            }
        }
    }
    drop(guard);
    match error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// Best-effort cleanup for streams dropped without an explicit close.
///
/// The channel itself is always released: by the spawned task, or without a
/// runtime, by dropping the guard right here.
fn drop_stream(
    file: Option<RemoteFile>,
    guard: Option<Guard>,
    path: String,
    delete_on_close: bool,
) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = close_stream(file, guard, &path, delete_on_close).await {
                    warn!(path = %path, error = %e, "cleanup of dropped stream failed");
                }
            });
        }
        Err(_) => drop(guard),
    }
}

/// A remote file opened for reading.
///
/// Holds its pool channel until closed, so the channel cannot be recycled
/// while bytes are still in flight. [`SftpReader::close`] is explicit and
/// idempotent; it also performs the delete for
/// [`OpenOptionFlag::DeleteOnClose`](crate::OpenOptionFlag::DeleteOnClose).
/// Dropping without closing still releases the channel and completes the
/// delete on a best-effort background task.
pub struct SftpReader {
    file: Option<RemoteFile>,
    guard: Option<Guard>,
    path: String,
    delete_on_close: bool,
    closed: bool,
}

impl SftpReader {
    pub(crate) fn new(guard: Guard, file: RemoteFile, path: String, delete_on_close: bool) -> Self {
        debug!(channel = guard.id(), path = %path, "created input stream");
        SftpReader {
            file: Some(file),
            guard: Some(guard),
            path,
            delete_on_close,
            closed: false,
        }
    }

    /// The absolute remote path this stream reads from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the stream, deleting the file first if requested at open.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = close_stream(
            self.file.take(),
            self.guard.take(),
            &self.path,
            self.delete_on_close,
        )
        .await;
        debug!(path = %self.path, "closed input stream");
        result
    }
}

impl AsyncRead for SftpReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for SftpReader {
    fn drop(&mut self) {
        if !self.closed {
            drop_stream(
                self.file.take(),
                self.guard.take(),
                std::mem::take(&mut self.path),
                self.delete_on_close,
            );
        }
    }
}

/// A remote file opened for writing.
///
/// Same channel-holding discipline as [`SftpReader`]. `AsyncWrite::shutdown`
/// flushes and closes the remote handle; [`SftpWriter::close`] additionally
/// performs delete-on-close and releases the channel.
pub struct SftpWriter {
    file: Option<RemoteFile>,
    guard: Option<Guard>,
    path: String,
    delete_on_close: bool,
    closed: bool,
}

impl SftpWriter {
    pub(crate) fn new(guard: Guard, file: RemoteFile, path: String, delete_on_close: bool) -> Self {
        debug!(channel = guard.id(), path = %path, "created output stream");
        SftpWriter {
            file: Some(file),
            guard: Some(guard),
            path,
            delete_on_close,
            closed: false,
        }
    }

    /// The absolute remote path this stream writes to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the stream, deleting the file first if requested at open.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = close_stream(
            self.file.take(),
            self.guard.take(),
            &self.path,
            self.delete_on_close,
        )
        .await;
        debug!(path = %self.path, "closed output stream");
        result
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed")
}

impl AsyncWrite for SftpWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for SftpWriter {
    fn drop(&mut self) {
        if !self.closed {
            drop_stream(
                self.file.take(),
                self.guard.take(),
                std::mem::take(&mut self.path),
                self.delete_on_close,
            );
        }
    }
}

/// A seekable byte channel over a remote file.
///
/// Built on the same stream primitives; random access is limited by the
/// transport. Reads and writes are gated on the access the channel was
/// opened with.
pub struct SftpFile {
    file: Option<RemoteFile>,
    guard: Option<Guard>,
    path: String,
    readable: bool,
    writable: bool,
    delete_on_close: bool,
    closed: bool,
}

impl SftpFile {
    #[allow(clippy::fn_params_excessive_bools)]
    pub(crate) fn new(
        guard: Guard,
        file: RemoteFile,
        path: String,
        readable: bool,
        writable: bool,
        delete_on_close: bool,
    ) -> Self {
        debug!(channel = guard.id(), path = %path, "created byte channel");
        SftpFile {
            file: Some(file),
            guard: Some(guard),
            path,
            readable,
            writable,
            delete_on_close,
            closed: false,
        }
    }

    /// The absolute remote path of this channel.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn check_readable(&self) -> io::Result<()> {
        if !self.readable {
            return Err(io::Error::other("this file is not opened for reading"));
        }
        Ok(())
    }

    fn check_writable(&self) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::other("this file is not opened for writing"));
        }
        Ok(())
    }

    fn file_mut(&mut self) -> Result<&mut RemoteFile> {
        self.file.as_mut().ok_or_else(|| Error::Io(closed_pipe()))
    }

    /// Current size of the remote file.
    pub async fn size(&self) -> Result<u64> {
        let guard = self.guard.as_ref().ok_or_else(|| Error::Io(closed_pipe()))?;
        let attrs = guard.stat(&self.path, true).await?;
        Ok(attrs.size.unwrap_or(0))
    }

    /// Move the read/write position.
    pub async fn seek(&mut self, position: io::SeekFrom) -> Result<u64> {
        let position = match position {
            io::SeekFrom::End(offset) => {
                let size = self.size().await?;
                let target = size
                    .checked_add_signed(offset)
                    .ok_or_else(|| Error::IllegalArgument("seek before start of file".into()))?;
                io::SeekFrom::Start(target)
            }
            other => other,
        };
        Ok(self.file_mut()?.seek(position).await?)
    }

    /// Current position.
    pub async fn position(&mut self) -> Result<u64> {
        Ok(self.file_mut()?.seek(io::SeekFrom::Current(0)).await?)
    }

    /// Truncate (or extend) the remote file to `size`.
    pub async fn set_len(&self, size: u64) -> Result<()> {
        self.check_writable().map_err(Error::from)?;
        let guard = self.guard.as_ref().ok_or_else(|| Error::Io(closed_pipe()))?;
        guard.set_size(&self.path, size).await
    }

    /// Close the channel, deleting the file first if requested at open.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = close_stream(
            self.file.take(),
            self.guard.take(),
            &self.path,
            self.delete_on_close,
        )
        .await;
        debug!(path = %self.path, "closed byte channel");
        result
    }
}

impl AsyncRead for SftpFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_readable() {
            return Poll::Ready(Err(e));
        }
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }
}

impl AsyncWrite for SftpFile {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_writable() {
            return Poll::Ready(Err(e));
        }
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for SftpFile {
    fn drop(&mut self) {
        if !self.closed {
            drop_stream(
                self.file.take(),
                self.guard.take(),
                std::mem::take(&mut self.path),
                self.delete_on_close,
            );
        }
    }
}
