use crate::error::{Error, Result};

/// A single open flag token.
///
/// The universe of tokens accepted when opening files; combination rules are
/// enforced by [`OpenOptions::for_read`] and [`OpenOptions::for_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenOptionFlag {
    /// Open for reading.
    Read,
    /// Open for writing.
    Write,
    /// Writes go to the end of the file.
    Append,
    /// Truncate an existing file to zero length.
    TruncateExisting,
    /// Create the file if it does not exist.
    Create,
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Delete the file when the returned stream is closed.
    DeleteOnClose,
    /// Accepted and ignored; SFTP has no sparse-file hint.
    Sparse,
    /// Accepted and ignored; writes are synchronous at the server's whim.
    Sync,
    /// Accepted and ignored, like [`OpenOptionFlag::Sync`].
    Dsync,
}

/// Normalized result of validating a set of open flags.
///
/// The original token sequence is retained for error reporting.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Append instead of overwrite.
    pub append: bool,
    /// Truncate an existing file.
    pub truncate: bool,
    /// Create if absent.
    pub create: bool,
    /// Create, failing if present.
    pub create_new: bool,
    /// Delete on stream close.
    pub delete_on_close: bool,
    /// The tokens this record was parsed from.
    pub options: Vec<OpenOptionFlag>,
}

impl OpenOptions {
    fn collect(tokens: &[OpenOptionFlag]) -> Self {
        let mut opts = OpenOptions {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            delete_on_close: false,
            options: tokens.to_vec(),
        };
        for token in tokens {
            match token {
                OpenOptionFlag::Read => opts.read = true,
                OpenOptionFlag::Write => opts.write = true,
                OpenOptionFlag::Append => opts.append = true,
                OpenOptionFlag::TruncateExisting => opts.truncate = true,
                OpenOptionFlag::Create => opts.create = true,
                OpenOptionFlag::CreateNew => opts.create_new = true,
                OpenOptionFlag::DeleteOnClose => opts.delete_on_close = true,
                OpenOptionFlag::Sparse | OpenOptionFlag::Sync | OpenOptionFlag::Dsync => {}
            }
        }
        opts
    }

    fn invalid(tokens: &[OpenOptionFlag], reason: &str) -> Error {
        Error::IllegalArgument(format!("invalid open option combination {tokens:?}: {reason}"))
    }

    /// Validate flags for opening a file for reading.
    ///
    /// With none of `Read`/`Write`/`Append` present, `Read` is implied.
    /// Any write-intent flag is rejected.
    pub fn for_read(tokens: &[OpenOptionFlag]) -> Result<Self> {
        let mut opts = Self::collect(tokens);
        if !opts.read && !opts.write && !opts.append {
            opts.read = true;
        }
        if opts.write || opts.append {
            return Err(Self::invalid(tokens, "reads cannot request write access"));
        }
        if opts.truncate || opts.create || opts.create_new {
            return Err(Self::invalid(tokens, "reads cannot create or truncate"));
        }
        Ok(opts)
    }

    /// Validate flags for opening a file for writing.
    ///
    /// With none of `Read`/`Write`/`Append` present, `Write` is implied.
    pub fn for_write(tokens: &[OpenOptionFlag]) -> Result<Self> {
        let mut opts = Self::collect(tokens);
        if !opts.read && !opts.write && !opts.append {
            opts.write = true;
        }
        if opts.append {
            opts.write = true;
        }
        if opts.read {
            return Err(Self::invalid(tokens, "writes cannot request read access"));
        }
        if opts.append && opts.truncate {
            return Err(Self::invalid(tokens, "append cannot be combined with truncation"));
        }
        if opts.create_new && !opts.write {
            return Err(Self::invalid(tokens, "create-new requires write access"));
        }
        Ok(opts)
    }

    /// Whether any token expresses write intent.
    ///
    /// Used by the byte-channel entry point to pick read vs. write validation.
    pub fn has_write_intent(tokens: &[OpenOptionFlag]) -> bool {
        tokens.iter().any(|t| {
            matches!(
                t,
                OpenOptionFlag::Write
                    | OpenOptionFlag::Append
                    | OpenOptionFlag::TruncateExisting
                    | OpenOptionFlag::Create
                    | OpenOptionFlag::CreateNew
            )
        })
    }
}

/// A single copy/move option token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyOption {
    /// Replace an existing target.
    ReplaceExisting,
    /// Copy timestamps, ownership and permissions along with content.
    CopyAttributes,
    /// Require the move to be atomic.
    AtomicMove,
    /// Do not follow symbolic links when copying attributes.
    NoFollowLinks,
}

/// Normalized copy/move options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Replace an existing target.
    pub replace_existing: bool,
    /// Copy attributes after content.
    pub copy_attributes: bool,
    /// Require atomicity.
    pub atomic_move: bool,
    /// Follow links when reading source attributes.
    pub follow_links: bool,
}

impl CopyOptions {
    /// Normalize a set of copy option tokens.
    pub fn parse(tokens: &[CopyOption]) -> Self {
        let mut opts = CopyOptions {
            follow_links: true,
            ..CopyOptions::default()
        };
        for token in tokens {
            match token {
                CopyOption::ReplaceExisting => opts.replace_existing = true,
                CopyOption::CopyAttributes => opts.copy_attributes = true,
                CopyOption::AtomicMove => opts.atomic_move = true,
                CopyOption::NoFollowLinks => opts.follow_links = false,
            }
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OpenOptionFlag::*;

    #[test]
    fn read_defaults_to_read() {
        let opts = OpenOptions::for_read(&[]).unwrap();
        assert!(opts.read);
        assert!(!opts.write);
    }

    #[test]
    fn read_keeps_delete_on_close() {
        let opts = OpenOptions::for_read(&[Read, DeleteOnClose]).unwrap();
        assert!(opts.read);
        assert!(opts.delete_on_close);
    }

    #[test]
    fn read_rejects_write_intent() {
        assert!(OpenOptions::for_read(&[Write]).is_err());
        assert!(OpenOptions::for_read(&[Append]).is_err());
        assert!(OpenOptions::for_read(&[Read, TruncateExisting]).is_err());
        assert!(OpenOptions::for_read(&[Read, CreateNew]).is_err());
    }

    #[test]
    fn write_defaults_to_write() {
        let opts = OpenOptions::for_write(&[]).unwrap();
        assert!(opts.write);
        assert!(!opts.read);
    }

    #[test]
    fn append_implies_write() {
        let opts = OpenOptions::for_write(&[Append, Create]).unwrap();
        assert!(opts.write);
        assert!(opts.append);
        assert!(opts.create);
    }

    #[test]
    fn write_rejects_bad_combinations() {
        assert!(OpenOptions::for_write(&[Read, Write]).is_err());
        assert!(OpenOptions::for_write(&[Append, TruncateExisting]).is_err());
    }

    #[test]
    fn ignored_flags_are_accepted() {
        let opts = OpenOptions::for_write(&[Write, Sparse, Sync, Dsync]).unwrap();
        assert!(opts.write);
    }

    #[test]
    fn parse_is_idempotent() {
        let first = OpenOptions::for_write(&[Create, Append]).unwrap();
        let second = OpenOptions::for_write(&first.options).unwrap();
        assert_eq!(first.write, second.write);
        assert_eq!(first.append, second.append);
        assert_eq!(first.create, second.create);
        assert_eq!(first.options, second.options);
    }

    #[test]
    fn copy_options_normalize() {
        let opts = CopyOptions::parse(&[CopyOption::ReplaceExisting, CopyOption::CopyAttributes]);
        assert!(opts.replace_existing);
        assert!(opts.copy_attributes);
        assert!(!opts.atomic_move);
        assert!(opts.follow_links);

        let opts = CopyOptions::parse(&[CopyOption::NoFollowLinks]);
        assert!(!opts.follow_links);
    }
}
