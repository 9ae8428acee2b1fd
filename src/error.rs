use std::io;

use russh_sftp::protocol::StatusCode;
use thiserror::Error as ThisError;

/// Error type of the SFTP client library this crate drives.
pub type SftpClientError = russh_sftp::client::error::Error;

/// The filesystem operation an error was raised for.
///
/// Used by [`ExceptionFactory`] implementations to pick the error kind for a
/// given SFTP failure, and embedded in generic errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FileOperation {
    /// Opening a file for reading.
    OpenInput,
    /// Opening a file for writing.
    OpenOutput,
    /// Reading file attributes.
    Stat,
    /// Listing a directory.
    List,
    /// Creating a directory.
    CreateDirectory,
    /// Deleting a regular file.
    DeleteFile,
    /// Deleting a directory.
    DeleteDirectory,
    /// Renaming or moving.
    Rename,
    /// Changing the owning user.
    SetOwner,
    /// Changing the owning group.
    SetGroup,
    /// Changing the permission bits.
    SetPermissions,
    /// Changing the last-modified time.
    SetModificationTime,
    /// Reading a symbolic link target.
    ReadLink,
    /// Creating a symbolic link.
    CreateSymbolicLink,
    /// Resolving the session working directory.
    ChangeDirectory,
}

impl FileOperation {
    /// Stable name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::OpenInput => "open for reading",
            FileOperation::OpenOutput => "open for writing",
            FileOperation::Stat => "read attributes",
            FileOperation::List => "list directory",
            FileOperation::CreateDirectory => "create directory",
            FileOperation::DeleteFile => "delete file",
            FileOperation::DeleteDirectory => "delete directory",
            FileOperation::Rename => "rename",
            FileOperation::SetOwner => "set owner",
            FileOperation::SetGroup => "set group",
            FileOperation::SetPermissions => "set permissions",
            FileOperation::SetModificationTime => "set modification time",
            FileOperation::ReadLink => "read symbolic link",
            FileOperation::CreateSymbolicLink => "create symbolic link",
            FileOperation::ChangeDirectory => "change working directory",
        }
    }
}

/// Errors raised by this crate.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum Error {
    /// The file or directory does not exist.
    #[error("no such file or directory: {path}")]
    NoSuchFile {
        /// The path that does not exist.
        path: String,
    },

    /// The file or directory already exists.
    #[error("file already exists: {path}")]
    FileAlreadyExists {
        /// The path that already exists.
        path: String,
    },

    /// The server denied access.
    #[error("access denied: {path}")]
    AccessDenied {
        /// The path access was denied for.
        path: String,
    },

    /// A directory could not be removed because it is not empty.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The non-empty directory.
        path: String,
    },

    /// A file operation was attempted on a directory.
    #[error("is a directory: {path}")]
    IsADirectory {
        /// The offending path.
        path: String,
    },

    /// A directory operation was attempted on a non-directory.
    #[error("not a directory: {path}")]
    NotDirectory {
        /// The offending path.
        path: String,
    },

    /// An atomic move was requested but cannot be guaranteed.
    #[error("atomic move not supported: {from} -> {to}")]
    AtomicMoveNotSupported {
        /// Source path of the move.
        from: String,
        /// Target path of the move.
        to: String,
    },

    /// The server or client library does not support the operation.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The filesystem has been closed.
    #[error("file system is closed")]
    ClosedFileSystem,

    /// A value belonging to a different filesystem provider was supplied.
    #[error("file system provider mismatch")]
    ProviderMismatch,

    /// An argument was rejected before any remote call was made.
    #[error("{0}")]
    IllegalArgument(String),

    /// A filesystem is already registered for the authority.
    #[error("file system already exists: {uri}")]
    FileSystemAlreadyExists {
        /// The normalized authority URI, password stripped.
        uri: String,
    },

    /// No filesystem is registered for the authority.
    #[error("{uri}")]
    FileSystemNotFound {
        /// The normalized authority URI, password stripped.
        uri: String,
    },

    /// No pooled channel became available within the configured wait timeout.
    #[error("timed out while waiting for a client connection")]
    ClientConnectionWaitTimeoutExpired,

    /// An I/O operation was interrupted.
    #[error("interrupted: {0}")]
    Interrupted(#[source] io::Error),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Every configured authentication method was rejected.
    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed {
        /// The user that failed to authenticate.
        user: String,
        /// The host that rejected the credentials.
        host: String,
    },

    /// SSH session failure (connect, authenticate, subsystem, disconnect).
    #[error("SSH {context}: {source}")]
    Ssh {
        /// What the session was doing when it failed.
        context: String,
        /// The underlying SSH error.
        #[source]
        source: russh::Error,
    },

    /// Remote SFTP failure that maps to no more specific kind.
    #[error("{operation}: {path}{}: {source}", .secondary.as_deref().map(|s| format!(" -> {s}")).unwrap_or_default())]
    FileSystem {
        /// The operation that failed.
        operation: &'static str,
        /// Primary path.
        path: String,
        /// Secondary path, for two-path operations.
        secondary: Option<String>,
        /// The SFTP client error.
        #[source]
        source: SftpClientError,
    },

    /// An error occurred, and cleaning up after it failed too.
    #[error(transparent)]
    Cleanup(Box<CleanupError>),
}

/// Primary error plus the error raised while cleaning up after it.
///
/// The primary error wins; the cleanup failure is retained as context.
#[derive(Debug, ThisError)]
#[error("{primary}; cleanup also failed: {cleanup}")]
pub struct CleanupError {
    /// The error that triggered cleanup.
    pub primary: Error,
    /// The error raised during cleanup.
    #[source]
    pub cleanup: Error,
}

impl Error {
    /// Attach a cleanup failure to `self`, keeping `self` as the primary.
    pub fn with_cleanup(self, cleanup: Error) -> Error {
        Error::Cleanup(Box::new(CleanupError {
            primary: self,
            cleanup,
        }))
    }

    /// Fold `next` into an optional accumulated error.
    pub(crate) fn aggregate(existing: Option<Error>, next: Error) -> Option<Error> {
        Some(match existing {
            None => next,
            Some(primary) => primary.with_cleanup(next),
        })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            Error::Interrupted(err)
        } else {
            Error::Io(err)
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Extract the SFTP status code from a client error, if it carries one.
pub fn status_code(err: &SftpClientError) -> Option<StatusCode> {
    match err {
        SftpClientError::Status(status) => Some(status.status_code),
        _ => None,
    }
}

/// Whether a client error reports that the path does not exist.
pub fn is_not_found(err: &SftpClientError) -> bool {
    status_code(err) == Some(StatusCode::NoSuchFile)
}

/// Maps SFTP failures to filesystem error kinds.
///
/// The default mapping is [`DefaultExceptionFactory`]; an alternative can be
/// installed through
/// [`SftpEnvironment::with_exception_factory`](crate::SftpEnvironment::with_exception_factory)
/// before the filesystem is created.
pub trait ExceptionFactory: std::fmt::Debug + Send + Sync {
    /// Translate an SFTP failure into a filesystem error.
    fn translate(
        &self,
        operation: FileOperation,
        path: &str,
        secondary: Option<&str>,
        cause: SftpClientError,
    ) -> Error;
}

/// The standard status-code to error-kind mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionFactory;

impl ExceptionFactory for DefaultExceptionFactory {
    fn translate(
        &self,
        operation: FileOperation,
        path: &str,
        secondary: Option<&str>,
        cause: SftpClientError,
    ) -> Error {
        match status_code(&cause) {
            Some(StatusCode::NoSuchFile) => Error::NoSuchFile { path: path.into() },
            Some(StatusCode::PermissionDenied) => Error::AccessDenied { path: path.into() },
            Some(StatusCode::OpUnsupported) => Error::UnsupportedOperation {
                operation: operation.as_str(),
            },
            Some(StatusCode::Failure) if operation == FileOperation::DeleteDirectory => {
                // openssh's sftp-server reports a plain failure for rmdir on
                // a non-empty directory.
                Error::DirectoryNotEmpty { path: path.into() }
            }
            _ => Error::FileSystem {
                operation: operation.as_str(),
                path: path.into(),
                secondary: secondary.map(Into::into),
                source: cause,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use russh_sftp::protocol::Status;

    fn status_error(code: StatusCode) -> SftpClientError {
        SftpClientError::Status(Status {
            id: 0,
            status_code: code,
            error_message: String::new(),
            language_tag: "en-US".into(),
        })
    }

    #[test]
    fn no_such_file_maps_to_not_found() {
        let err = DefaultExceptionFactory.translate(
            FileOperation::Stat,
            "/a",
            None,
            status_error(StatusCode::NoSuchFile),
        );
        assert!(matches!(err, Error::NoSuchFile { path } if path == "/a"));
    }

    #[test]
    fn permission_denied_maps_to_access_denied() {
        let err = DefaultExceptionFactory.translate(
            FileOperation::OpenOutput,
            "/a",
            None,
            status_error(StatusCode::PermissionDenied),
        );
        assert!(matches!(err, Error::AccessDenied { path } if path == "/a"));
    }

    #[test]
    fn op_unsupported_maps_to_unsupported_operation() {
        let err = DefaultExceptionFactory.translate(
            FileOperation::Rename,
            "/a",
            Some("/b"),
            status_error(StatusCode::OpUnsupported),
        );
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn failure_on_rmdir_maps_to_directory_not_empty() {
        let err = DefaultExceptionFactory.translate(
            FileOperation::DeleteDirectory,
            "/d",
            None,
            status_error(StatusCode::Failure),
        );
        assert!(matches!(err, Error::DirectoryNotEmpty { path } if path == "/d"));
    }

    #[test]
    fn failure_elsewhere_stays_generic() {
        let err = DefaultExceptionFactory.translate(
            FileOperation::DeleteFile,
            "/f",
            None,
            status_error(StatusCode::Failure),
        );
        match err {
            Error::FileSystem {
                operation,
                path,
                secondary,
                ..
            } => {
                assert_eq!(operation, "delete file");
                assert_eq!(path, "/f");
                assert_eq!(secondary, None);
            }
            other => panic!("expected generic error, got {other:?}"),
        }
    }

    #[test]
    fn interrupted_io_is_classified() {
        let err: Error = io::Error::new(io::ErrorKind::Interrupted, "signal").into();
        assert!(matches!(err, Error::Interrupted(_)));

        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn cleanup_keeps_primary_first() {
        let primary = Error::NoSuchFile { path: "/a".into() };
        let err = primary.with_cleanup(Error::ClosedFileSystem);
        let msg = err.to_string();
        assert!(msg.starts_with("no such file or directory: /a"));
        assert!(msg.contains("cleanup also failed"));
    }
}
