use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DefaultExceptionFactory, ExceptionFactory};

const DEFAULT_CLIENT_CONNECTION_COUNT: usize = 5;

/// A private key file used for public-key authentication.
#[derive(Clone)]
pub struct IdentityFile {
    /// Path to the (OpenSSH-format) private key.
    pub path: PathBuf,
    /// Passphrase for an encrypted key.
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for IdentityFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityFile")
            .field("path", &self.path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How server host keys are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Known keys must match; unknown hosts are learned and recorded.
    AcceptNew,
    /// Known keys must match; unknown hosts are rejected.
    Strict,
    /// Accept any key without consulting the known-hosts file.
    AcceptAll,
}

/// Configuration for an SFTP filesystem.
///
/// A fluent builder over session, authentication, channel and pool settings.
/// The filesystem clones the environment when it takes ownership, so later
/// mutation by the caller has no effect on an open filesystem. Shared
/// sub-objects with identity (the exception factory) are shared by reference.
///
/// ```no_run
/// use std::time::Duration;
/// use sftp_fs::SftpEnvironment;
///
/// let env = SftpEnvironment::new()
///     .with_username("user")
///     .with_password("secret")
///     .with_client_connection_count(3)
///     .with_client_connection_wait_timeout(Duration::from_millis(500));
/// ```
#[derive(Clone, Default)]
pub struct SftpEnvironment {
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    client_version: Option<String>,
    host_key_alias: Option<String>,
    server_alive_interval: Option<Duration>,
    server_alive_count_max: Option<usize>,
    config: HashMap<String, String>,
    identities: Vec<IdentityFile>,
    known_hosts: Option<PathBuf>,
    filename_encoding: Option<String>,
    default_dir: Option<String>,
    client_connection_count: Option<usize>,
    client_connection_wait_timeout: Option<Duration>,
    exception_factory: Option<Arc<dyn ExceptionFactory>>,
}

impl std::fmt::Debug for SftpEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpEnvironment")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("identities", &self.identities)
            .field("known_hosts", &self.known_hosts)
            .field("default_dir", &self.default_dir)
            .field("client_connection_count", &self.client_connection_count)
            .field(
                "client_connection_wait_timeout",
                &self.client_connection_wait_timeout,
            )
            .finish_non_exhaustive()
    }
}

impl SftpEnvironment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authentication user. A user in the URI takes precedence.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for password authentication.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the timeout applied to establishing the session.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout: sessions idle longer than this are torn down.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the client identification string sent during version exchange.
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    /// Sets the alias used instead of the hostname for known-hosts lookups.
    pub fn with_host_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.host_key_alias = Some(alias.into());
        self
    }

    /// Sets the interval between transport-level keep-alive probes.
    pub fn with_server_alive_interval(mut self, interval: Duration) -> Self {
        self.server_alive_interval = Some(interval);
        self
    }

    /// Sets how many unanswered keep-alive probes disconnect the session.
    pub fn with_server_alive_count_max(mut self, count: usize) -> Self {
        self.server_alive_count_max = Some(count);
        self
    }

    /// Stores a configuration override. Adds to previously set options.
    ///
    /// Recognized keys: `StrictHostKeyChecking` (`yes`, `no`, `accept-new`).
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Adds a private key file to authenticate with. Adds to previously set
    /// identities.
    pub fn with_identity_file(
        mut self,
        path: impl Into<PathBuf>,
        passphrase: Option<&str>,
    ) -> Self {
        self.identities.push(IdentityFile {
            path: path.into(),
            passphrase: passphrase.map(Into::into),
        });
        self
    }

    /// Sets the known-hosts file consulted for host key verification.
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Sets the filename encoding. The transport speaks UTF-8; any other
    /// value fails when the filesystem connects.
    pub fn with_filename_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.filename_encoding = Some(encoding.into());
        self
    }

    /// Sets the directory that relative paths resolve against.
    pub fn with_default_directory(mut self, pathname: impl Into<String>) -> Self {
        self.default_dir = Some(pathname.into());
        self
    }

    /// Sets the number of pooled channels, which bounds the number of
    /// concurrent callers. Values below 1 are clamped to 1.
    pub fn with_client_connection_count(mut self, count: usize) -> Self {
        self.client_connection_count = Some(count);
        self
    }

    /// Sets how long an acquisition waits for a pooled channel.
    ///
    /// A zero duration waits indefinitely.
    pub fn with_client_connection_wait_timeout(mut self, timeout: Duration) -> Self {
        self.client_connection_wait_timeout = Some(timeout);
        self
    }

    /// Replaces the error translation installed into the filesystem.
    pub fn with_exception_factory(mut self, factory: Arc<dyn ExceptionFactory>) -> Self {
        self.exception_factory = Some(factory);
        self
    }

    pub(crate) fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn client_version(&self) -> Option<&str> {
        self.client_version.as_deref()
    }

    pub(crate) fn host_key_alias(&self) -> Option<&str> {
        self.host_key_alias.as_deref()
    }

    pub(crate) fn server_alive_interval(&self) -> Option<Duration> {
        self.server_alive_interval
    }

    pub(crate) fn server_alive_count_max(&self) -> Option<usize> {
        self.server_alive_count_max
    }

    pub(crate) fn identities(&self) -> &[IdentityFile] {
        &self.identities
    }

    pub(crate) fn known_hosts(&self) -> Option<&PathBuf> {
        self.known_hosts.as_ref()
    }

    pub(crate) fn filename_encoding(&self) -> Option<&str> {
        self.filename_encoding.as_deref()
    }

    pub(crate) fn default_directory(&self) -> Option<&str> {
        self.default_dir.as_deref()
    }

    /// Pool capacity, clamped to at least one channel.
    pub(crate) fn client_connection_count(&self) -> usize {
        self.client_connection_count
            .unwrap_or(DEFAULT_CLIENT_CONNECTION_COUNT)
            .max(1)
    }

    /// Acquisition wait timeout; `None` means wait indefinitely.
    pub(crate) fn client_connection_wait_timeout(&self) -> Option<Duration> {
        match self.client_connection_wait_timeout {
            None | Some(Duration::ZERO) => None,
            timeout => timeout,
        }
    }

    pub(crate) fn exception_factory(&self) -> Arc<dyn ExceptionFactory> {
        self.exception_factory
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultExceptionFactory))
    }

    /// Host key policy derived from `StrictHostKeyChecking`.
    pub(crate) fn host_key_policy(&self) -> HostKeyPolicy {
        match self.config.get("StrictHostKeyChecking").map(String::as_str) {
            Some("no") => HostKeyPolicy::AcceptAll,
            Some("yes") => HostKeyPolicy::Strict,
            _ => HostKeyPolicy::AcceptNew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn connection_count_is_clamped() {
        assert_eq!(SftpEnvironment::new().client_connection_count(), 5);
        assert_eq!(
            SftpEnvironment::new()
                .with_client_connection_count(0)
                .client_connection_count(),
            1
        );
        assert_eq!(
            SftpEnvironment::new()
                .with_client_connection_count(8)
                .client_connection_count(),
            8
        );
    }

    #[test]
    fn zero_wait_timeout_means_infinite() {
        assert_eq!(SftpEnvironment::new().client_connection_wait_timeout(), None);
        assert_eq!(
            SftpEnvironment::new()
                .with_client_connection_wait_timeout(Duration::ZERO)
                .client_connection_wait_timeout(),
            None
        );
        assert_eq!(
            SftpEnvironment::new()
                .with_client_connection_wait_timeout(Duration::from_millis(500))
                .client_connection_wait_timeout(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn host_key_policy_follows_config() {
        assert_eq!(
            SftpEnvironment::new().host_key_policy(),
            HostKeyPolicy::AcceptNew
        );
        assert_eq!(
            SftpEnvironment::new()
                .with_config("StrictHostKeyChecking", "no")
                .host_key_policy(),
            HostKeyPolicy::AcceptAll
        );
        assert_eq!(
            SftpEnvironment::new()
                .with_config("StrictHostKeyChecking", "yes")
                .host_key_policy(),
            HostKeyPolicy::Strict
        );
    }

    #[test]
    fn clone_is_independent_at_the_top_level() {
        let env = SftpEnvironment::new().with_username("alice");
        let copy = env.clone().with_username("bob");
        assert_eq!(env.username(), Some("alice"));
        assert_eq!(copy.username(), Some("bob"));
    }
}
