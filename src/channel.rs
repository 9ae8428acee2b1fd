use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use russh::client;
use russh::keys::known_hosts::{
    known_host_keys, known_host_keys_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use russh_sftp::client::fs::File as RemoteFile;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tracing::{debug, warn};

use crate::env::{HostKeyPolicy, SftpEnvironment};
use crate::error::{status_code, Error, ExceptionFactory, FileOperation, Result};
use crate::pool::Connector;

/// SSH client handler enforcing the environment's host key policy.
pub(crate) struct HostKeyHandler {
    lookup_host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl HostKeyHandler {
    fn verify(&self, server_key: &ssh_key::PublicKey) -> std::result::Result<bool, russh::Error> {
        let host = self.lookup_host.as_str();
        let known = match &self.known_hosts {
            Some(path) => {
                ensure_known_hosts_file(path).map_err(russh::Error::IO)?;
                known_host_keys_path(host, self.port, path)?
            }
            None => known_host_keys(host, self.port)?,
        };
        if known.iter().any(|(_, key)| key == server_key) {
            return Ok(true);
        }
        if !known.is_empty() {
            return Err(russh::Error::KeyChanged { line: known[0].0 });
        }
        match self.policy {
            HostKeyPolicy::Strict => Ok(false),
            HostKeyPolicy::AcceptNew => {
                match &self.known_hosts {
                    Some(path) => learn_known_hosts_path(host, self.port, server_key, path)?,
                    None => learn_known_hosts(host, self.port, server_key)?,
                }
                warn!(host, port = self.port, "learned new SSH host key");
                Ok(true)
            }
            // Handled before the lookup; kept for exhaustiveness.
            HostKeyPolicy::AcceptAll => Ok(true),
        }
    }
}

impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAll {
            return Ok(true);
        }
        self.verify(server_public_key)
    }
}

fn ensure_known_hosts_file(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Dials SSH sessions and opens the `sftp` subsystem on them.
pub(crate) struct SshConnector {
    host: String,
    port: u16,
    env: SftpEnvironment,
    factory: Arc<dyn ExceptionFactory>,
}

impl SshConnector {
    pub(crate) fn new(host: String, port: u16, env: SftpEnvironment) -> Self {
        let factory = env.exception_factory();
        SshConnector {
            host,
            port,
            env,
            factory,
        }
    }

    fn ssh_err(&self, context: &str) -> impl Fn(russh::Error) -> Error + '_ {
        let context = format!("{context} {}:{}", self.host, self.port);
        move |source| Error::Ssh {
            context: context.clone(),
            source,
        }
    }

    async fn dial(&self) -> Result<SftpChannel> {
        if let Some(encoding) = self.env.filename_encoding() {
            if !encoding.eq_ignore_ascii_case("utf-8") && !encoding.eq_ignore_ascii_case("utf8") {
                return Err(Error::IllegalArgument(format!(
                    "unsupported filename encoding: {encoding}"
                )));
            }
        }

        let mut config = client::Config::default();
        config.inactivity_timeout = self.env.timeout();
        config.keepalive_interval = self.env.server_alive_interval();
        if let Some(count) = self.env.server_alive_count_max() {
            config.keepalive_max = count;
        }
        if let Some(version) = self.env.client_version() {
            config.client_id = russh::SshId::Standard(version.to_owned());
        }

        let handler = HostKeyHandler {
            lookup_host: self
                .env
                .host_key_alias()
                .unwrap_or(self.host.as_str())
                .to_owned(),
            port: self.port,
            policy: self.env.host_key_policy(),
            known_hosts: self.env.known_hosts().cloned(),
        };

        let addr = (self.host.as_str(), self.port);
        let connect = client::connect(Arc::new(config), addr, handler);
        let mut session = match self.env.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| self.ssh_err("connect to")(russh::Error::ConnectionTimeout))?,
            None => connect.await,
        }
        .map_err(self.ssh_err("connect to"))?;

        self.authenticate(&mut session).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(self.ssh_err("open channel on"))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(self.ssh_err("request sftp subsystem on"))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|source| Error::FileSystem {
                operation: "initialize sftp subsystem",
                path: format!("{}:{}", self.host, self.port),
                secondary: None,
                source,
            })?;

        // Resolving the default directory doubles as the connection
        // verification round trip.
        let default_dir = match self.env.default_directory() {
            Some(dir) => sftp.canonicalize(dir).await.map_err(|e| {
                self.factory
                    .translate(FileOperation::ChangeDirectory, dir, None, e)
            })?,
            None => sftp.canonicalize(".").await.map_err(|e| {
                self.factory
                    .translate(FileOperation::ChangeDirectory, ".", None, e)
            })?,
        };

        Ok(SftpChannel {
            session,
            sftp,
            default_dir,
            factory: Arc::clone(&self.factory),
        })
    }

    async fn authenticate(&self, session: &mut client::Handle<HostKeyHandler>) -> Result<()> {
        let user = self
            .env
            .username()
            .ok_or_else(|| Error::IllegalArgument("no username configured".into()))?;

        for identity in self.env.identities() {
            let key = load_secret_key(&identity.path, identity.passphrase.as_deref()).map_err(
                |e| {
                    Error::IllegalArgument(format!(
                        "cannot load identity {}: {e}",
                        identity.path.display()
                    ))
                },
            )?;
            let hash = session
                .best_supported_rsa_hash()
                .await
                .map_err(self.ssh_err("negotiate hash algorithm with"))?
                .flatten();
            let auth = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                .await
                .map_err(self.ssh_err("authenticate with"))?;
            if auth.success() {
                return Ok(());
            }
            debug!(identity = %identity.path.display(), "identity rejected");
        }

        if let Some(password) = self.env.password() {
            let auth = session
                .authenticate_password(user, password)
                .await
                .map_err(self.ssh_err("authenticate with"))?;
            if auth.success() {
                return Ok(());
            }
        }

        Err(Error::AuthenticationFailed {
            user: user.to_owned(),
            host: self.host.clone(),
        })
    }
}

impl Connector for SshConnector {
    type Channel = SftpChannel;

    async fn connect(&self, id: u64) -> Result<SftpChannel> {
        let channel = self.dial().await?;
        debug!(channel = id, host = %self.host, port = self.port, "connected sftp channel");
        Ok(channel)
    }

    fn is_connected(&self, channel: &SftpChannel) -> bool {
        !channel.session.is_closed()
    }

    async fn ping(&self, channel: &SftpChannel) -> Result<()> {
        channel.ping().await
    }

    async fn disconnect(&self, channel: SftpChannel) -> Result<()> {
        channel
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "en-US")
            .await
            .map_err(self.ssh_err("disconnect from"))
    }
}

/// One live SSH session with an open SFTP subsystem.
///
/// Single-threaded by contract: an acquired channel is used by exactly one
/// caller until it is released.
pub(crate) struct SftpChannel {
    session: client::Handle<HostKeyHandler>,
    sftp: SftpSession,
    default_dir: String,
    factory: Arc<dyn ExceptionFactory>,
}

impl SftpChannel {
    /// The session's working directory, captured at connect time.
    pub(crate) fn default_dir(&self) -> &str {
        &self.default_dir
    }

    fn translate(
        &self,
        op: FileOperation,
        path: &str,
        secondary: Option<&str>,
    ) -> impl Fn(crate::error::SftpClientError) -> Error + '_ {
        let path = path.to_owned();
        let secondary = secondary.map(str::to_owned);
        move |cause| self.factory.translate(op, &path, secondary.as_deref(), cause)
    }

    /// Keep-alive round trip.
    pub(crate) async fn ping(&self) -> Result<()> {
        self.sftp
            .canonicalize(".")
            .await
            .map(drop)
            .map_err(self.translate(FileOperation::Stat, ".", None))
    }

    pub(crate) async fn stat(&self, path: &str, follow_links: bool) -> Result<FileAttributes> {
        let result = if follow_links {
            self.sftp.metadata(path).await
        } else {
            self.sftp.symlink_metadata(path).await
        };
        result.map_err(self.translate(FileOperation::Stat, path, None))
    }

    /// Quiet existence probe; errors are deliberately swallowed so the
    /// caller can keep its original failure.
    pub(crate) async fn exists(&self, path: &str) -> bool {
        self.sftp.metadata(path).await.is_ok()
    }

    pub(crate) async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileAttributes)>> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(self.translate(FileOperation::List, path, None))?;
        Ok(entries
            .map(|entry| (entry.file_name(), entry.metadata()))
            .collect())
    }

    pub(crate) async fn mkdir(&self, path: &str) -> Result<()> {
        match self.sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Most servers answer a plain failure when the directory is
                // already there; only then is the probe worth the round trip.
                if status_code(&e) == Some(StatusCode::Failure) && self.exists(path).await {
                    return Err(Error::FileAlreadyExists { path: path.into() });
                }
                Err(self.translate(FileOperation::CreateDirectory, path, None)(e))
            }
        }
    }

    pub(crate) async fn delete(&self, path: &str, is_directory: bool) -> Result<()> {
        if is_directory {
            self.sftp
                .remove_dir(path)
                .await
                .map_err(self.translate(FileOperation::DeleteDirectory, path, None))
        } else {
            self.sftp
                .remove_file(path)
                .await
                .map_err(self.translate(FileOperation::DeleteFile, path, None))
        }
    }

    pub(crate) async fn rename(&self, source: &str, target: &str) -> Result<()> {
        self.sftp
            .rename(source, target)
            .await
            .map_err(self.translate(FileOperation::Rename, source, Some(target)))
    }

    pub(crate) async fn read_link(&self, path: &str) -> Result<String> {
        self.sftp
            .read_link(path)
            .await
            .map_err(self.translate(FileOperation::ReadLink, path, None))
    }

    pub(crate) async fn symlink(&self, link: &str, target: &str) -> Result<()> {
        self.sftp
            .symlink(link, target)
            .await
            .map_err(self.translate(FileOperation::CreateSymbolicLink, link, Some(target)))
    }

    pub(crate) async fn realpath(&self, path: &str) -> Result<String> {
        self.sftp
            .canonicalize(path)
            .await
            .map_err(self.translate(FileOperation::Stat, path, None))
    }

    async fn set_attrs(
        &self,
        path: &str,
        attrs: FileAttributes,
        op: FileOperation,
    ) -> Result<()> {
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(self.translate(op, path, None))
    }

    pub(crate) async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let mut attrs = FileAttributes::default();
        attrs.permissions = Some(mode);
        self.set_attrs(path, attrs, FileOperation::SetPermissions).await
    }

    /// The uid/gid pair travels together on the wire, so the unchanged half
    /// is read back first.
    pub(crate) async fn chown(&self, path: &str, uid: u32) -> Result<()> {
        let current = self.stat(path, true).await?;
        let mut attrs = FileAttributes::default();
        attrs.uid = Some(uid);
        attrs.gid = current.gid.or(Some(0));
        self.set_attrs(path, attrs, FileOperation::SetOwner).await
    }

    pub(crate) async fn chgrp(&self, path: &str, gid: u32) -> Result<()> {
        let current = self.stat(path, true).await?;
        let mut attrs = FileAttributes::default();
        attrs.uid = current.uid.or(Some(0));
        attrs.gid = Some(gid);
        self.set_attrs(path, attrs, FileOperation::SetGroup).await
    }

    /// Owner and group in one round trip, for attribute copies.
    pub(crate) async fn set_ids(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let mut attrs = FileAttributes::default();
        attrs.uid = Some(uid);
        attrs.gid = Some(gid);
        self.set_attrs(path, attrs, FileOperation::SetOwner).await
    }

    /// Same for atime/mtime: preserve the access time that is already there.
    pub(crate) async fn set_mtime(&self, path: &str, mtime: SystemTime) -> Result<()> {
        let current = self.stat(path, true).await?;
        let seconds = unix_seconds(mtime);
        let mut attrs = FileAttributes::default();
        attrs.mtime = Some(seconds);
        attrs.atime = current.atime.or(Some(seconds));
        self.set_attrs(path, attrs, FileOperation::SetModificationTime)
            .await
    }

    pub(crate) async fn set_size(&self, path: &str, size: u64) -> Result<()> {
        let mut attrs = FileAttributes::default();
        attrs.size = Some(size);
        self.set_attrs(path, attrs, FileOperation::OpenOutput).await
    }

    pub(crate) async fn open_read(&self, path: &str) -> Result<RemoteFile> {
        self.sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(self.translate(FileOperation::OpenInput, path, None))
    }

    pub(crate) async fn open_write(&self, path: &str, flags: OpenFlags) -> Result<RemoteFile> {
        self.sftp
            .open_with_flags(path, flags)
            .await
            .map_err(self.translate(FileOperation::OpenOutput, path, None))
    }
}

pub(crate) fn unix_seconds(time: SystemTime) -> u32 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}
