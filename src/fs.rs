use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::attrs::{
    self, AccessMode, AttributeValue, AttributeWrite, BasicFileAttributeView, FileAttributeView,
    FileKind, FileOwnerAttributeView, PosixFileAttributeView, PosixFileAttributes,
};
use crate::channel::SshConnector;
use crate::env::SftpEnvironment;
use crate::error::{Error, Result};
use crate::file::{SftpFile, SftpReader, SftpWriter};
use crate::options::{CopyOption, CopyOptions, OpenOptionFlag, OpenOptions};
use crate::path::SftpPath;
use crate::pool::{ChannelGuard, Pool, PoolConfig};
use crate::provider::Registry;
use crate::uri::AuthorityKey;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

pub(crate) type ChannelPool = Pool<SshConnector>;
type Guard = ChannelGuard<SshConnector>;

/// One open filesystem on a remote SFTP host.
///
/// Owns the channel pool and the session default directory. Created through
/// [`SftpFileSystemProvider::new_file_system`](crate::SftpFileSystemProvider::new_file_system);
/// closed with [`SftpFileSystem::close`], after which every operation fails
/// with [`Error::ClosedFileSystem`].
pub struct SftpFileSystem {
    registry: Weak<Registry>,
    key: AuthorityKey,
    authority_uri: String,
    pool: ChannelPool,
    default_dir: String,
    closed: AtomicBool,
    this: Weak<SftpFileSystem>,
}

impl std::fmt::Debug for SftpFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFileSystem")
            .field("authority", &self.authority_uri)
            .field("default_dir", &self.default_dir)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SftpFileSystem {
    pub(crate) async fn connect(
        registry: Weak<Registry>,
        key: AuthorityKey,
        authority_uri: String,
        env: SftpEnvironment,
    ) -> Result<Arc<Self>> {
        let config = PoolConfig {
            capacity: env.client_connection_count(),
            wait_timeout: env.client_connection_wait_timeout(),
        };
        let connector = SshConnector::new(key.host().to_owned(), key.port(), env);
        let pool = Pool::connect(connector, config).await?;

        let guard = pool.get().await?;
        let default_dir = guard.default_dir().to_owned();
        guard.release();
        debug!(authority = %authority_uri, default_dir = %default_dir, "opened file system");

        Ok(Arc::new_cyclic(|this| SftpFileSystem {
            registry,
            key,
            authority_uri,
            pool,
            default_dir,
            closed: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    fn arc(&self) -> Arc<SftpFileSystem> {
        self.this.upgrade().expect("filesystem still referenced")
    }

    /// The directory relative paths resolve against, captured at connect
    /// time.
    pub fn default_directory(&self) -> &str {
        &self.default_dir
    }

    /// The authority-only URI of this filesystem, without the password.
    pub fn authority_uri(&self) -> &str {
        &self.authority_uri
    }

    /// Whether [`SftpFileSystem::close`] has not been called yet.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ClosedFileSystem)
        }
    }

    fn check_path(&self, path: &SftpPath) -> Result<()> {
        if Arc::ptr_eq(path.file_system(), &self.arc()) {
            Ok(())
        } else {
            Err(Error::ProviderMismatch)
        }
    }

    async fn channel(&self) -> Result<Guard> {
        self.ensure_open()?;
        self.pool.get().await
    }

    /// Create a path bound to this filesystem.
    pub fn path(&self, path: &str) -> SftpPath {
        SftpPath::new(self.arc(), path)
    }

    /// Close this filesystem: unregister it, then drain and disconnect the
    /// pool. Idempotent; operations started afterwards fail with
    /// [`Error::ClosedFileSystem`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(authority = %self.authority_uri, "closing file system");
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.key);
        }
        self.pool.close().await
    }

    /// Send a keep-alive on every idle pooled channel.
    pub async fn keep_alive(&self) -> Result<()> {
        self.ensure_open()?;
        self.pool.keep_alive().await
    }

    /// Open a file for reading.
    pub async fn new_input_stream(
        &self,
        path: &SftpPath,
        options: &[OpenOptionFlag],
    ) -> Result<SftpReader> {
        self.check_path(path)?;
        let opts = OpenOptions::for_read(options)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let file = guard.open_read(&remote).await?;
        Ok(SftpReader::new(guard, file, remote, opts.delete_on_close))
    }

    /// Open a file for writing, honoring create/truncate/append semantics.
    pub async fn new_output_stream(
        &self,
        path: &SftpPath,
        options: &[OpenOptionFlag],
    ) -> Result<SftpWriter> {
        self.check_path(path)?;
        let opts = OpenOptions::for_write(options)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let flags = write_precheck(&guard, &remote, &opts).await?;
        let mut file = guard.open_write(&remote, flags).await?;
        if opts.append {
            let size = guard
                .stat(&remote, true)
                .await
                .map(|attrs| attrs.size.unwrap_or(0))
                .unwrap_or(0);
            file.seek(std::io::SeekFrom::Start(size)).await?;
        }
        Ok(SftpWriter::new(guard, file, remote, opts.delete_on_close))
    }

    /// Open a seekable byte channel. Write intent in the options selects
    /// write-mode validation and pre-checks, otherwise the file is opened
    /// read-only.
    pub async fn new_byte_channel(
        &self,
        path: &SftpPath,
        options: &[OpenOptionFlag],
    ) -> Result<SftpFile> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        if OpenOptions::has_write_intent(options) {
            let opts = OpenOptions::for_write(options)?;
            let guard = self.channel().await?;
            let flags = write_precheck(&guard, &remote, &opts).await?;
            let mut file = guard.open_write(&remote, flags).await?;
            if opts.append {
                let size = guard
                    .stat(&remote, true)
                    .await
                    .map(|attrs| attrs.size.unwrap_or(0))
                    .unwrap_or(0);
                file.seek(std::io::SeekFrom::Start(size)).await?;
            }
            Ok(SftpFile::new(
                guard,
                file,
                remote,
                false,
                true,
                opts.delete_on_close,
            ))
        } else {
            let opts = OpenOptions::for_read(options)?;
            let guard = self.channel().await?;
            let file = guard.open_read(&remote).await?;
            Ok(SftpFile::new(
                guard,
                file,
                remote,
                true,
                false,
                opts.delete_on_close,
            ))
        }
    }

    /// List a directory. `.` and `..` are filtered out.
    pub async fn read_dir(&self, path: &SftpPath) -> Result<DirectoryStream> {
        self.read_dir_filtered(path, |_| true).await
    }

    /// List a directory, applying `filter` lazily to the produced paths.
    pub async fn read_dir_filtered<F>(&self, path: &SftpPath, filter: F) -> Result<DirectoryStream>
    where
        F: Fn(&SftpPath) -> bool + Send + 'static,
    {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let attrs = guard.stat(&remote, true).await?;
        if kind_of(&attrs) != FileKind::Directory {
            return Err(Error::NotDirectory { path: remote });
        }
        let entries = guard.read_dir(&remote).await?;
        guard.release();
        Ok(DirectoryStream {
            base: path.clone(),
            entries: entries.into_iter(),
            filter: Box::new(filter),
        })
    }

    /// Create a directory. An existing entry fails with
    /// [`Error::FileAlreadyExists`].
    pub async fn create_directory(&self, path: &SftpPath) -> Result<()> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        guard.mkdir(&remote).await
    }

    /// Delete a file or an empty directory. A missing path fails with
    /// [`Error::NoSuchFile`], a populated directory with
    /// [`Error::DirectoryNotEmpty`].
    pub async fn delete(&self, path: &SftpPath) -> Result<()> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let attrs = guard.stat(&remote, false).await?;
        let is_directory = kind_of(&attrs) == FileKind::Directory;
        guard.delete(&remote, is_directory).await
    }

    /// Read the target of a symbolic link.
    pub async fn read_symbolic_link(&self, path: &SftpPath) -> Result<SftpPath> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let target = guard.read_link(&remote).await?;
        Ok(self.path(&target))
    }

    /// Create a symbolic link at `link` pointing to `target`. The target is
    /// stored verbatim, so relative targets stay relative.
    pub async fn create_symbolic_link(&self, link: &SftpPath, target: &SftpPath) -> Result<()> {
        self.check_path(link)?;
        let remote = link.absolute_str();
        let guard = self.channel().await?;
        guard.symlink(&remote, target.as_str()).await
    }

    /// Move `source` to `target`.
    ///
    /// Without [`CopyOption::ReplaceExisting`] an existing target fails with
    /// [`Error::FileAlreadyExists`]; with it, the target (a file or an empty
    /// directory) is removed first. Atomicity cannot be guaranteed across
    /// the network, so [`CopyOption::AtomicMove`] is refused.
    pub async fn move_to(
        &self,
        source: &SftpPath,
        target: &SftpPath,
        options: &[CopyOption],
    ) -> Result<()> {
        self.check_path(source)?;
        self.check_path(target)?;
        let opts = CopyOptions::parse(options);
        let src = source.absolute_str();
        let tgt = target.absolute_str();
        if opts.atomic_move {
            return Err(Error::AtomicMoveNotSupported { from: src, to: tgt });
        }

        let guard = self.channel().await?;
        remove_existing_target(&guard, &tgt, &opts).await?;
        guard.rename(&src, &tgt).await
    }

    /// Copy `source` to `target` on this filesystem, streaming the content
    /// through one channel. [`CopyOption::CopyAttributes`] carries over
    /// timestamp, ownership and permissions afterwards, as far as the server
    /// allows.
    pub async fn copy(
        &self,
        source: &SftpPath,
        target: &SftpPath,
        options: &[CopyOption],
    ) -> Result<()> {
        self.check_path(source)?;
        if !Arc::ptr_eq(target.file_system(), &self.arc()) {
            return Err(Error::UnsupportedOperation {
                operation: "copy across file systems",
            });
        }
        let opts = CopyOptions::parse(options);
        let src = source.absolute_str();
        let tgt = target.absolute_str();

        let guard = self.channel().await?;
        let src_attrs = guard.stat(&src, opts.follow_links).await?;
        remove_existing_target(&guard, &tgt, &opts).await?;

        if kind_of(&src_attrs) == FileKind::Directory {
            guard.mkdir(&tgt).await?;
        } else {
            let mut input = guard.open_read(&src).await?;
            let mut output = guard
                .open_write(&tgt, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE)
                .await?;
            let mut buffer = BytesMut::with_capacity(COPY_BUFFER_SIZE);
            loop {
                buffer.clear();
                let n = input.read_buf(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                output.write_all(&buffer).await?;
            }
            output.shutdown().await?;
            input.shutdown().await?;
        }

        if opts.copy_attributes {
            if let Some(mtime) = src_attrs.mtime {
                let time = SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(mtime));
                guard.set_mtime(&tgt, time).await?;
            }
            if let (Some(uid), Some(gid)) = (src_attrs.uid, src_attrs.gid) {
                guard.set_ids(&tgt, uid, gid).await?;
            }
            if let Some(mode) = src_attrs.permissions {
                guard.chmod(&tgt, mode & 0o7777).await?;
            }
        }
        Ok(())
    }

    /// Read the POSIX attribute record.
    pub async fn read_attributes(
        &self,
        path: &SftpPath,
        follow_links: bool,
    ) -> Result<PosixFileAttributes> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        let attrs = guard.stat(&remote, follow_links).await?;
        Ok(attrs::from_wire(&remote, &attrs))
    }

    /// Read named attributes per a selector such as
    /// `"basic:size,lastModifiedTime"` or `"posix:*"`.
    pub async fn read_attributes_map(
        &self,
        path: &SftpPath,
        selector: &str,
        follow_links: bool,
    ) -> Result<std::collections::HashMap<String, AttributeValue>> {
        let attrs = self.read_attributes(path, follow_links).await?;
        attrs::read_named(&attrs, selector)
    }

    /// Write a single named attribute, e.g. `"posix:permissions"`.
    pub async fn set_attribute(
        &self,
        path: &SftpPath,
        name: &str,
        value: AttributeValue,
        follow_links: bool,
    ) -> Result<()> {
        let write = attrs::parse_set(name, &value)?;
        self.apply_write(path, write, follow_links).await
    }

    /// Change the permission bits (9-bit POSIX mask).
    pub async fn set_permissions(
        &self,
        path: &SftpPath,
        mode: u32,
        follow_links: bool,
    ) -> Result<()> {
        self.apply_write(path, AttributeWrite::Permissions(mode & 0o777), follow_links)
            .await
    }

    /// Change the owning uid.
    pub async fn set_owner(&self, path: &SftpPath, uid: u32, follow_links: bool) -> Result<()> {
        self.apply_write(path, AttributeWrite::Owner(uid), follow_links)
            .await
    }

    /// Change the owning gid.
    pub async fn set_group(&self, path: &SftpPath, gid: u32, follow_links: bool) -> Result<()> {
        self.apply_write(path, AttributeWrite::Group(gid), follow_links)
            .await
    }

    /// Change the last-modified time (seconds granularity).
    pub async fn set_last_modified_time(
        &self,
        path: &SftpPath,
        time: SystemTime,
        follow_links: bool,
    ) -> Result<()> {
        self.apply_write(path, AttributeWrite::LastModifiedTime(time), follow_links)
            .await
    }

    async fn apply_write(
        &self,
        path: &SftpPath,
        write: AttributeWrite,
        follow_links: bool,
    ) -> Result<()> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        // Attribute writes verify the target first under the requested link
        // handling.
        guard.stat(&remote, follow_links).await?;
        match write {
            AttributeWrite::Permissions(mode) => guard.chmod(&remote, mode).await,
            AttributeWrite::Owner(uid) => guard.chown(&remote, uid).await,
            AttributeWrite::Group(gid) => guard.chgrp(&remote, gid).await,
            AttributeWrite::LastModifiedTime(time) => guard.set_mtime(&remote, time).await,
        }
    }

    /// Request an attribute view by name; unsupported names yield `None`.
    pub fn file_attribute_view(
        &self,
        path: &SftpPath,
        name: &str,
        follow_links: bool,
    ) -> Option<FileAttributeView> {
        let fs = self.this.clone();
        match name {
            "basic" => Some(FileAttributeView::Basic(BasicFileAttributeView {
                fs,
                path: path.clone(),
                follow_links,
            })),
            "owner" => Some(FileAttributeView::Owner(FileOwnerAttributeView {
                fs,
                path: path.clone(),
                follow_links,
            })),
            "posix" => Some(FileAttributeView::Posix(PosixFileAttributeView {
                fs,
                path: path.clone(),
                follow_links,
            })),
            _ => None,
        }
    }

    /// Verify the requested access classes against the permission bits.
    pub async fn check_access(&self, path: &SftpPath, modes: &[AccessMode]) -> Result<()> {
        let attrs = self.read_attributes(path, true).await?;
        for mode in modes {
            let class = match mode {
                AccessMode::Read => 0o444,
                AccessMode::Write => 0o222,
                AccessMode::Execute => 0o111,
            };
            if attrs.permissions & class == 0 {
                return Err(Error::AccessDenied {
                    path: path.absolute_str(),
                });
            }
        }
        Ok(())
    }

    /// Whether the path exists. Only "no such file" is treated as absence;
    /// other failures propagate.
    pub async fn exists(&self, path: &SftpPath, follow_links: bool) -> Result<bool> {
        match self.read_attributes(path, follow_links).await {
            Ok(_) => Ok(true),
            Err(Error::NoSuchFile { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the file name starts with a dot.
    pub fn is_hidden(&self, path: &SftpPath) -> bool {
        path.to_absolute()
            .file_name()
            .is_some_and(|name| name.starts_with('.'))
    }

    /// Whether both paths address the same remote file.
    ///
    /// Paths on different filesystems are never the same file. Otherwise the
    /// synthesized file keys (canonicalized absolute paths) are compared
    /// after following links.
    pub async fn is_same_file(&self, a: &SftpPath, b: &SftpPath) -> Result<bool> {
        self.check_path(a)?;
        if !Arc::ptr_eq(a.file_system(), b.file_system()) {
            return Ok(false);
        }
        let left = a.absolute_str();
        let right = b.absolute_str();
        if left == right {
            return Ok(true);
        }
        let guard = self.channel().await?;
        Ok(guard.realpath(&left).await? == guard.realpath(&right).await?)
    }

    /// Canonicalize a path. With `follow_links` the server resolves links;
    /// without, the normalized absolute path is verified to exist.
    pub async fn to_real_path(&self, path: &SftpPath, follow_links: bool) -> Result<SftpPath> {
        self.check_path(path)?;
        let remote = path.absolute_str();
        let guard = self.channel().await?;
        if follow_links {
            let real = guard.realpath(&remote).await?;
            guard.stat(&real, false).await?;
            Ok(self.path(&real))
        } else {
            guard.stat(&remote, false).await?;
            Ok(self.path(&remote))
        }
    }

    /// The file store of the path's filesystem.
    pub async fn file_store(&self, path: &SftpPath) -> Result<SftpFileStore> {
        self.read_attributes(path, true).await?;
        Ok(SftpFileStore {
            name: self.authority_uri.clone(),
        })
    }
}

fn kind_of(attrs: &FileAttributes) -> FileKind {
    FileKind::from_mode(attrs.permissions.unwrap_or(0))
}

/// Decide the open flags for a write, applying create/create-new/truncate
/// semantics with a pre-check `stat`.
async fn write_precheck(guard: &Guard, remote: &str, opts: &OpenOptions) -> Result<OpenFlags> {
    let existing = match guard.stat(remote, true).await {
        Ok(attrs) => Some(kind_of(&attrs)),
        Err(Error::NoSuchFile { .. }) => None,
        Err(e) => return Err(e),
    };
    decide_write_flags(existing, opts, remote)
}

/// The pure decision table behind [`write_precheck`]: what exists at the
/// target (if anything) plus the validated options determine the flags, or
/// the refusal.
fn decide_write_flags(
    existing: Option<FileKind>,
    opts: &OpenOptions,
    path: &str,
) -> Result<OpenFlags> {
    let mut flags = OpenFlags::WRITE;
    if opts.append {
        flags |= OpenFlags::APPEND;
    }
    match existing {
        Some(FileKind::Directory) => Err(Error::IsADirectory {
            path: path.to_owned(),
        }),
        Some(_) if opts.create_new => Err(Error::FileAlreadyExists {
            path: path.to_owned(),
        }),
        Some(_) => {
            if !opts.append {
                flags |= OpenFlags::TRUNCATE;
            }
            Ok(flags)
        }
        None if !opts.create && !opts.create_new => Err(Error::NoSuchFile {
            path: path.to_owned(),
        }),
        None => {
            flags |= OpenFlags::CREATE;
            if opts.create_new {
                flags |= OpenFlags::EXCLUDE;
            }
            Ok(flags)
        }
    }
}

/// For move/copy with `ReplaceExisting`: remove the target if present.
/// Without the option, an existing target is an error.
async fn remove_existing_target(guard: &Guard, target: &str, opts: &CopyOptions) -> Result<()> {
    match guard.stat(target, false).await {
        Ok(attrs) => {
            if !opts.replace_existing {
                return Err(Error::FileAlreadyExists {
                    path: target.to_owned(),
                });
            }
            let is_directory = kind_of(&attrs) == FileKind::Directory;
            guard.delete(target, is_directory).await
        }
        Err(Error::NoSuchFile { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Lazy sequence of directory entries as filesystem-bound paths.
///
/// The listing itself is a snapshot taken while the channel was held; the
/// dot entries are dropped and the user filter applies lazily.
pub struct DirectoryStream {
    base: SftpPath,
    entries: std::vec::IntoIter<(String, FileAttributes)>,
    filter: Box<dyn Fn(&SftpPath) -> bool + Send>,
}

impl Iterator for DirectoryStream {
    type Item = SftpPath;

    fn next(&mut self) -> Option<SftpPath> {
        loop {
            let (name, _attrs) = self.entries.next()?;
            if name == "." || name == ".." {
                continue;
            }
            let path = self.base.join(&name);
            if (self.filter)(&path) {
                return Some(path);
            }
        }
    }
}

impl std::fmt::Debug for DirectoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryStream")
            .field("base", &self.base)
            .finish()
    }
}

/// The file store backing a filesystem.
///
/// Space accounting requires the `statvfs@openssh.com` extension, which the
/// SFTP client library does not expose; the space accessors therefore report
/// [`Error::UnsupportedOperation`], the same outcome as a server without the
/// extension.
#[derive(Debug, Clone)]
pub struct SftpFileStore {
    name: String,
}

impl SftpFileStore {
    /// The store name: the filesystem's authority URI.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store type.
    pub fn store_type(&self) -> &'static str {
        "sftp"
    }

    /// SFTP gives no indication either way; assume writable.
    pub fn is_read_only(&self) -> bool {
        false
    }

    /// Total size of the store.
    pub fn total_space(&self) -> Result<u64> {
        Err(Error::UnsupportedOperation {
            operation: "total space",
        })
    }

    /// Usable space in the store.
    pub fn usable_space(&self) -> Result<u64> {
        Err(Error::UnsupportedOperation {
            operation: "usable space",
        })
    }

    /// Unallocated space in the store.
    pub fn unallocated_space(&self) -> Result<u64> {
        Err(Error::UnsupportedOperation {
            operation: "unallocated space",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_opts(tokens: &[OpenOptionFlag]) -> OpenOptions {
        OpenOptions::for_write(tokens).unwrap()
    }

    #[test]
    fn overwriting_an_existing_file_truncates() {
        let flags = decide_write_flags(
            Some(FileKind::Regular),
            &write_opts(&[OpenOptionFlag::Write]),
            "/f",
        )
        .unwrap();
        assert_eq!(flags.bits(), (OpenFlags::WRITE | OpenFlags::TRUNCATE).bits());
    }

    #[test]
    fn appending_never_truncates() {
        let flags = decide_write_flags(
            Some(FileKind::Regular),
            &write_opts(&[OpenOptionFlag::Append]),
            "/f",
        )
        .unwrap();
        assert_eq!(flags.bits(), (OpenFlags::WRITE | OpenFlags::APPEND).bits());
    }

    #[test]
    fn create_new_refuses_an_existing_file_before_any_write() {
        let err = decide_write_flags(
            Some(FileKind::Regular),
            &write_opts(&[OpenOptionFlag::Write, OpenOptionFlag::CreateNew]),
            "/f",
        )
        .unwrap_err();
        assert!(matches!(err, Error::FileAlreadyExists { path } if path == "/f"));
    }

    #[test]
    fn create_new_on_a_missing_file_is_exclusive() {
        let flags = decide_write_flags(
            None,
            &write_opts(&[OpenOptionFlag::Write, OpenOptionFlag::CreateNew]),
            "/f",
        )
        .unwrap();
        assert_eq!(
            flags.bits(),
            (OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUDE).bits()
        );
    }

    #[test]
    fn writing_a_missing_file_requires_create() {
        let err = decide_write_flags(None, &write_opts(&[OpenOptionFlag::Write]), "/f")
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchFile { path } if path == "/f"));

        let flags = decide_write_flags(
            None,
            &write_opts(&[OpenOptionFlag::Write, OpenOptionFlag::Create]),
            "/f",
        )
        .unwrap();
        assert_eq!(flags.bits(), (OpenFlags::WRITE | OpenFlags::CREATE).bits());
    }

    #[test]
    fn writing_to_a_directory_is_refused() {
        let err = decide_write_flags(
            Some(FileKind::Directory),
            &write_opts(&[OpenOptionFlag::Write, OpenOptionFlag::Create]),
            "/d",
        )
        .unwrap_err();
        assert!(matches!(err, Error::IsADirectory { path } if path == "/d"));
    }
}
