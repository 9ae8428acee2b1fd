//! A virtual filesystem over SFTP.
//!
//! Exposes a remote host's files as a path-addressable filesystem: open,
//! read, write, list, rename, delete, stat, symlinks, permissions and
//! timestamps, each realized as SFTP requests over a bounded pool of
//! long-lived SSH channels.
//!
//! The SSH transport and SFTP wire protocol are delegated to [russh] and
//! [russh-sftp]; this crate contributes the three hard parts on top:
//!
//! - the **channel pool**: a bounded FIFO of connected channels shared by
//!   concurrent callers, with liveness probing, bounded acquisition waits
//!   and safe replacement of broken channels;
//! - the **filesystem façade**: translation of filesystem verbs and
//!   open-option sets into SFTP primitives with correct create/truncate/
//!   append/delete-on-close, copy/move, symlink and attribute semantics;
//! - the **provider registry**: a process-wide map from normalized authority
//!   (`sftp://user@host:port`) to the one open filesystem for it.
//!
//! ## Usage
//!
//! ```no_run
//! use sftp_fs::{OpenOptionFlag, SftpEnvironment, SftpFileSystemProvider};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SftpFileSystemProvider::new();
//! let env = SftpEnvironment::new()
//!     .with_password("secret")
//!     .with_client_connection_count(3);
//! let fs = provider.new_file_system("sftp://user@example.com", env).await?;
//!
//! let path = fs.path("reports/2024.csv");
//! let mut reader = fs.new_input_stream(&path, &[OpenOptionFlag::Read]).await?;
//! let mut contents = String::new();
//! reader.read_to_string(&mut contents).await?;
//! reader.close().await?;
//!
//! fs.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Streams returned by the façade hold their pool channel until they are
//! closed, so a channel is never recycled while its bytes are still in
//! flight. Close streams explicitly; dropping one still releases the
//! channel, but delete-on-close then happens on a best-effort background
//! task.
//!
//! [russh]: https://crates.io/crates/russh
//! [russh-sftp]: https://crates.io/crates/russh-sftp

#![warn(missing_docs, rustdoc::broken_intra_doc_links, rust_2018_idioms, unreachable_pub)]
#![forbid(unsafe_code)]

mod attrs;
mod channel;
mod env;
mod error;
mod file;
mod fs;
mod options;
mod path;
mod pool;
mod provider;
mod uri;

pub use attrs::{
    AccessMode, AttributeValue, BasicFileAttributeView, FileAttributeView, FileKind,
    FileOwnerAttributeView, PosixFileAttributeView, PosixFileAttributes,
};
pub use env::{HostKeyPolicy, IdentityFile, SftpEnvironment};
pub use error::{
    is_not_found, status_code, CleanupError, DefaultExceptionFactory, Error, ExceptionFactory,
    FileOperation, Result, SftpClientError,
};
pub use file::{SftpFile, SftpReader, SftpWriter};
pub use fs::{DirectoryStream, SftpFileStore, SftpFileSystem};
pub use options::{CopyOption, CopyOptions, OpenOptionFlag, OpenOptions};
pub use path::SftpPath;
pub use provider::{Registry, SftpFileSystemProvider, SCHEME};
pub use uri::AuthorityKey;
