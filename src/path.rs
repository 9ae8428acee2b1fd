use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::fs::SftpFileSystem;

/// Collapse separators and resolve `.`/`..` segments.
///
/// Absolute paths clamp `..` at the root; relative paths keep leading `..`
/// segments. The empty string stays empty (it resolves to the session's
/// default directory).
pub(crate) fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&"..") | None if !absolute => segments.push(".."),
                Some(_) => {
                    segments.pop();
                }
                None => {}
            },
            name => segments.push(name),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Resolve `child` against `base`. An absolute child wins; an empty child
/// yields `base`.
pub(crate) fn resolve(base: &str, child: &str) -> String {
    if child.starts_with('/') {
        normalize(child)
    } else if child.is_empty() {
        normalize(base)
    } else {
        normalize(&format!("{base}/{child}"))
    }
}

/// A POSIX-style path bound to an SFTP filesystem.
///
/// Paths are immutable and normalized on construction. Equality and hashing
/// include the identity of the owning filesystem, so equal strings on
/// different filesystems are different paths.
#[derive(Clone)]
pub struct SftpPath {
    fs: Arc<SftpFileSystem>,
    path: String,
}

impl SftpPath {
    pub(crate) fn new(fs: Arc<SftpFileSystem>, path: &str) -> Self {
        SftpPath {
            fs,
            path: normalize(path),
        }
    }

    /// The normalized path string.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The filesystem this path belongs to.
    pub fn file_system(&self) -> &Arc<SftpFileSystem> {
        &self.fs
    }

    /// Whether the path starts at the root.
    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    /// The last path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self.path.rsplit('/').next() {
            Some("") | None => None,
            name => name,
        }
    }

    /// The parent path; `None` for the root and for single-segment relative
    /// paths.
    pub fn parent(&self) -> Option<SftpPath> {
        if self.path == "/" || self.path.is_empty() {
            return None;
        }
        match self.path.rsplit_once('/') {
            Some(("", _)) => Some(SftpPath::new(self.fs.clone(), "/")),
            Some((parent, _)) => Some(SftpPath::new(self.fs.clone(), parent)),
            None => None,
        }
    }

    /// Resolve `other` against this path.
    pub fn join(&self, other: &str) -> SftpPath {
        SftpPath {
            fs: self.fs.clone(),
            path: resolve(&self.path, other),
        }
    }

    /// Resolve this path to an absolute one against the filesystem's default
    /// directory.
    pub fn to_absolute(&self) -> SftpPath {
        SftpPath {
            fs: self.fs.clone(),
            path: self.absolute_str(),
        }
    }

    /// The absolute remote path string sent over the wire.
    pub(crate) fn absolute_str(&self) -> String {
        if self.is_absolute() {
            self.path.clone()
        } else {
            resolve(self.fs.default_directory(), &self.path)
        }
    }

    /// The URI of this path, with the filesystem's authority and without the
    /// password.
    pub fn to_uri(&self) -> String {
        format!("{}{}", self.fs.authority_uri(), self.absolute_str())
    }
}

impl fmt::Display for SftpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for SftpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SftpPath({})", self.path)
    }
}

impl PartialEq for SftpPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs) && self.path == other.path
    }
}

impl Eq for SftpPath {}

impl Hash for SftpPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.fs).hash(state);
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_dots_and_separators() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//foo///bar/"), "/foo/bar");
        assert_eq!(normalize("/foo/./bar"), "/foo/bar");
        assert_eq!(normalize("/foo/../bar"), "/bar");
        assert_eq!(normalize("/../foo"), "/foo");
        assert_eq!(normalize("foo/.."), "");
        assert_eq!(normalize("../foo"), "../foo");
        assert_eq!(normalize("../../foo/bar"), "../../foo/bar");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn resolves_against_default_directory() {
        // Default directory /home/user.
        let cases = [
            ("/", "/"),
            ("foo", "/home/user/foo"),
            ("/foo", "/foo"),
            ("foo/bar", "/home/user/foo/bar"),
            ("/foo/bar", "/foo/bar"),
        ];
        for (input, expected) in cases {
            assert_eq!(resolve("/home/user", input), expected, "input {input:?}");
        }
    }

    #[test]
    fn resolve_of_empty_child_is_base() {
        assert_eq!(resolve("/home/user", ""), "/home/user");
    }
}
