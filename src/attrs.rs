use std::collections::HashMap;
use std::sync::Weak;
use std::time::{Duration, SystemTime};

use russh_sftp::protocol::FileAttributes;

use crate::error::{Error, Result};
use crate::fs::SftpFileSystem;
use crate::path::SftpPath;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Classification of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link.
    SymbolicLink,
    /// Anything else (socket, fifo, device, unknown).
    Other,
}

impl FileKind {
    /// Classify from the type bits of a POSIX mode word.
    pub fn from_mode(mode: u32) -> FileKind {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::Regular,
            S_IFLNK => FileKind::SymbolicLink,
            _ => FileKind::Other,
        }
    }
}

/// Access classes checked by
/// [`SftpFileSystem::check_access`](crate::SftpFileSystem::check_access).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read access.
    Read,
    /// Write access.
    Write,
    /// Execute / search access.
    Execute,
}

/// POSIX-shaped attribute record of a remote file.
///
/// Creation time is not available over SFTP and mirrors the modification
/// time. The file key is synthesized from the absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixFileAttributes {
    /// Last modification time, seconds granularity.
    pub last_modified_time: SystemTime,
    /// Last access time; mirrors the modification time when absent.
    pub last_access_time: SystemTime,
    /// Creation time; same as the modification time over SFTP.
    pub creation_time: SystemTime,
    /// Size in bytes.
    pub size: u64,
    /// Inode-like identity, synthesized from the absolute path.
    pub file_key: String,
    /// Entry classification.
    pub kind: FileKind,
    /// Owning uid, when reported.
    pub owner: Option<u32>,
    /// Owning gid, when reported.
    pub group: Option<u32>,
    /// 9-bit permission mask.
    pub permissions: u32,
}

impl PosixFileAttributes {
    /// Whether this is a regular file.
    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Whether this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Whether this is a symbolic link.
    pub fn is_symbolic_link(&self) -> bool {
        self.kind == FileKind::SymbolicLink
    }

    /// Whether this is neither file, directory nor link.
    pub fn is_other(&self) -> bool {
        self.kind == FileKind::Other
    }
}

fn from_unix_seconds(seconds: u32) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(seconds))
}

/// Shape the wire attributes into the POSIX record.
pub(crate) fn from_wire(absolute_path: &str, attrs: &FileAttributes) -> PosixFileAttributes {
    let mtime = attrs
        .mtime
        .map(from_unix_seconds)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let atime = attrs.atime.map(from_unix_seconds).unwrap_or(mtime);
    let mode = attrs.permissions.unwrap_or(0);
    PosixFileAttributes {
        last_modified_time: mtime,
        last_access_time: atime,
        creation_time: mtime,
        size: attrs.size.unwrap_or(0),
        file_key: absolute_path.to_owned(),
        kind: FileKind::from_mode(mode),
        owner: attrs.uid,
        group: attrs.gid,
        permissions: mode & 0o777,
    }
}

/// A single attribute value, as returned by named-attribute reads and
/// accepted by [`SftpFileSystem::set_attribute`](crate::SftpFileSystem::set_attribute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// A timestamp.
    Time(SystemTime),
    /// A byte count.
    Size(u64),
    /// A type flag.
    Bool(bool),
    /// A uid or gid.
    Id(u32),
    /// A 9-bit permission mask.
    Permissions(u32),
    /// The synthesized file key.
    FileKey(String),
}

const BASIC_NAMES: &[&str] = &[
    "lastModifiedTime",
    "lastAccessTime",
    "creationTime",
    "size",
    "isRegularFile",
    "isDirectory",
    "isSymbolicLink",
    "isOther",
    "fileKey",
];
const OWNER_NAMES: &[&str] = &["owner"];
const POSIX_EXTRA_NAMES: &[&str] = &["owner", "group", "permissions"];

fn lookup(attrs: &PosixFileAttributes, name: &str) -> Option<AttributeValue> {
    Some(match name {
        "lastModifiedTime" => AttributeValue::Time(attrs.last_modified_time),
        "lastAccessTime" => AttributeValue::Time(attrs.last_access_time),
        "creationTime" => AttributeValue::Time(attrs.creation_time),
        "size" => AttributeValue::Size(attrs.size),
        "isRegularFile" => AttributeValue::Bool(attrs.is_regular_file()),
        "isDirectory" => AttributeValue::Bool(attrs.is_directory()),
        "isSymbolicLink" => AttributeValue::Bool(attrs.is_symbolic_link()),
        "isOther" => AttributeValue::Bool(attrs.is_other()),
        "fileKey" => AttributeValue::FileKey(attrs.file_key.clone()),
        "owner" => AttributeValue::Id(attrs.owner.unwrap_or(0)),
        "group" => AttributeValue::Id(attrs.group.unwrap_or(0)),
        "permissions" => AttributeValue::Permissions(attrs.permissions),
        _ => return None,
    })
}

fn view_names(view: &str) -> Result<Vec<&'static str>> {
    match view {
        "basic" => Ok(BASIC_NAMES.to_vec()),
        "owner" => Ok(OWNER_NAMES.to_vec()),
        "posix" => {
            let mut names = BASIC_NAMES.to_vec();
            names.extend_from_slice(POSIX_EXTRA_NAMES);
            Ok(names)
        }
        other => Err(Error::IllegalArgument(format!(
            "unsupported attribute view: {other}"
        ))),
    }
}

/// Evaluate a named-attribute selector such as
/// `"basic:size,lastModifiedTime"`, `"posix:permissions"` or `"posix:*"`.
///
/// Without a view prefix, `basic` is assumed. Keys in the result are the
/// bare attribute names.
pub(crate) fn read_named(
    attrs: &PosixFileAttributes,
    selector: &str,
) -> Result<HashMap<String, AttributeValue>> {
    let (view, names) = match selector.split_once(':') {
        Some((view, names)) => (view, names),
        None => ("basic", selector),
    };
    let supported = view_names(view)?;

    let mut out = HashMap::new();
    if names == "*" {
        for name in supported {
            out.insert(name.to_owned(), lookup(attrs, name).expect("known name"));
        }
        return Ok(out);
    }
    for name in names.split(',') {
        let name = name.trim();
        if name.is_empty() || !supported.contains(&name) {
            return Err(Error::IllegalArgument(format!(
                "unsupported attribute: {view}:{name}"
            )));
        }
        out.insert(name.to_owned(), lookup(attrs, name).expect("known name"));
    }
    Ok(out)
}

/// A validated single-attribute write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttributeWrite {
    Permissions(u32),
    Owner(u32),
    Group(u32),
    LastModifiedTime(SystemTime),
}

/// Parse a `"view:name"` attribute write into its dispatch target.
pub(crate) fn parse_set(name: &str, value: &AttributeValue) -> Result<AttributeWrite> {
    let (view, attribute) = match name.split_once(':') {
        Some((view, attribute)) => (view, attribute),
        None => ("basic", name),
    };
    let unsupported =
        || Error::IllegalArgument(format!("unsupported attribute: {view}:{attribute}"));
    let bad_type = || {
        Error::IllegalArgument(format!(
            "invalid value for attribute {view}:{attribute}: {value:?}"
        ))
    };

    match (view, attribute) {
        ("basic" | "posix", "lastModifiedTime") => match value {
            AttributeValue::Time(time) => Ok(AttributeWrite::LastModifiedTime(*time)),
            _ => Err(bad_type()),
        },
        ("owner" | "posix", "owner") => match value {
            AttributeValue::Id(uid) => Ok(AttributeWrite::Owner(*uid)),
            _ => Err(bad_type()),
        },
        ("posix", "group") => match value {
            AttributeValue::Id(gid) => Ok(AttributeWrite::Group(*gid)),
            _ => Err(bad_type()),
        },
        ("posix", "permissions") => match value {
            AttributeValue::Permissions(mode) => Ok(AttributeWrite::Permissions(mode & 0o777)),
            _ => Err(bad_type()),
        },
        ("basic" | "owner" | "posix", _) => Err(unsupported()),
        _ => Err(Error::IllegalArgument(format!(
            "unsupported attribute view: {view}"
        ))),
    }
}

fn upgrade(fs: &Weak<SftpFileSystem>) -> Result<std::sync::Arc<SftpFileSystem>> {
    fs.upgrade().ok_or(Error::ClosedFileSystem)
}

/// Read access to the `basic` attribute view.
pub struct BasicFileAttributeView {
    pub(crate) fs: Weak<SftpFileSystem>,
    pub(crate) path: SftpPath,
    pub(crate) follow_links: bool,
}

impl BasicFileAttributeView {
    /// The view name, `"basic"`.
    pub fn name(&self) -> &'static str {
        "basic"
    }

    /// Read the attribute record.
    pub async fn read_attributes(&self) -> Result<PosixFileAttributes> {
        upgrade(&self.fs)?
            .read_attributes(&self.path, self.follow_links)
            .await
    }

    /// Update the last-modified time. Access and creation times are not
    /// settable over SFTP and must be `None`.
    pub async fn set_times(
        &self,
        last_modified_time: Option<SystemTime>,
        last_access_time: Option<SystemTime>,
        creation_time: Option<SystemTime>,
    ) -> Result<()> {
        if last_access_time.is_some() || creation_time.is_some() {
            return Err(Error::UnsupportedOperation {
                operation: "set access or creation time",
            });
        }
        if let Some(time) = last_modified_time {
            upgrade(&self.fs)?
                .set_last_modified_time(&self.path, time, self.follow_links)
                .await?;
        }
        Ok(())
    }
}

/// The `owner` attribute view.
pub struct FileOwnerAttributeView {
    pub(crate) fs: Weak<SftpFileSystem>,
    pub(crate) path: SftpPath,
    pub(crate) follow_links: bool,
}

impl FileOwnerAttributeView {
    /// The view name, `"owner"`.
    pub fn name(&self) -> &'static str {
        "owner"
    }

    /// The owning uid.
    pub async fn owner(&self) -> Result<Option<u32>> {
        Ok(upgrade(&self.fs)?
            .read_attributes(&self.path, self.follow_links)
            .await?
            .owner)
    }

    /// Change the owning uid.
    pub async fn set_owner(&self, uid: u32) -> Result<()> {
        upgrade(&self.fs)?
            .set_owner(&self.path, uid, self.follow_links)
            .await
    }
}

/// The `posix` attribute view.
pub struct PosixFileAttributeView {
    pub(crate) fs: Weak<SftpFileSystem>,
    pub(crate) path: SftpPath,
    pub(crate) follow_links: bool,
}

impl PosixFileAttributeView {
    /// The view name, `"posix"`.
    pub fn name(&self) -> &'static str {
        "posix"
    }

    /// Read the attribute record.
    pub async fn read_attributes(&self) -> Result<PosixFileAttributes> {
        upgrade(&self.fs)?
            .read_attributes(&self.path, self.follow_links)
            .await
    }

    /// Change the permission bits.
    pub async fn set_permissions(&self, mode: u32) -> Result<()> {
        upgrade(&self.fs)?
            .set_permissions(&self.path, mode, self.follow_links)
            .await
    }

    /// Change the owning uid.
    pub async fn set_owner(&self, uid: u32) -> Result<()> {
        upgrade(&self.fs)?
            .set_owner(&self.path, uid, self.follow_links)
            .await
    }

    /// Change the owning gid.
    pub async fn set_group(&self, gid: u32) -> Result<()> {
        upgrade(&self.fs)?
            .set_group(&self.path, gid, self.follow_links)
            .await
    }

    /// Update the last-modified time.
    pub async fn set_times(&self, last_modified_time: Option<SystemTime>) -> Result<()> {
        if let Some(time) = last_modified_time {
            upgrade(&self.fs)?
                .set_last_modified_time(&self.path, time, self.follow_links)
                .await?;
        }
        Ok(())
    }
}

/// A requested attribute view; `None` is returned for unsupported names.
pub enum FileAttributeView {
    /// The `basic` view.
    Basic(BasicFileAttributeView),
    /// The `owner` view.
    Owner(FileOwnerAttributeView),
    /// The `posix` view.
    Posix(PosixFileAttributeView),
}

impl FileAttributeView {
    /// The view name.
    pub fn name(&self) -> &'static str {
        match self {
            FileAttributeView::Basic(view) => view.name(),
            FileAttributeView::Owner(view) => view.name(),
            FileAttributeView::Posix(view) => view.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> PosixFileAttributes {
        PosixFileAttributes {
            last_modified_time: from_unix_seconds(1_000),
            last_access_time: from_unix_seconds(2_000),
            creation_time: from_unix_seconds(1_000),
            size: 42,
            file_key: "/home/user/file".into(),
            kind: FileKind::Regular,
            owner: Some(1000),
            group: Some(100),
            permissions: 0o640,
        }
    }

    #[test]
    fn classifies_mode_bits() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::SymbolicLink);
        assert_eq!(FileKind::from_mode(0o010644), FileKind::Other);
    }

    #[test]
    fn wire_attributes_fall_back_sensibly() {
        let mut wire = FileAttributes::default();
        wire.size = Some(7);
        wire.permissions = Some(0o100600);
        wire.mtime = Some(5_000);

        let attrs = from_wire("/f", &wire);
        assert_eq!(attrs.size, 7);
        assert_eq!(attrs.permissions, 0o600);
        assert_eq!(attrs.kind, FileKind::Regular);
        // atime falls back to mtime, creation always mirrors it.
        assert_eq!(attrs.last_access_time, attrs.last_modified_time);
        assert_eq!(attrs.creation_time, attrs.last_modified_time);
        assert_eq!(attrs.file_key, "/f");
    }

    #[test]
    fn named_read_selects_requested_attributes() {
        let attrs = sample();
        let map = read_named(&attrs, "basic:size,lastModifiedTime").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["size"], AttributeValue::Size(42));
        assert_eq!(
            map["lastModifiedTime"],
            AttributeValue::Time(from_unix_seconds(1_000))
        );
    }

    #[test]
    fn named_read_defaults_to_basic_view() {
        let attrs = sample();
        let map = read_named(&attrs, "size").unwrap();
        assert_eq!(map["size"], AttributeValue::Size(42));
    }

    #[test]
    fn named_read_star_returns_whole_view() {
        let attrs = sample();
        let map = read_named(&attrs, "posix:*").unwrap();
        assert_eq!(map["permissions"], AttributeValue::Permissions(0o640));
        assert_eq!(map["owner"], AttributeValue::Id(1000));
        assert_eq!(map["group"], AttributeValue::Id(100));
        assert!(map.contains_key("isDirectory"));
    }

    #[test]
    fn named_read_rejects_unknown_view_and_name() {
        let attrs = sample();
        assert!(read_named(&attrs, "acl:*").is_err());
        assert!(read_named(&attrs, "basic:permissions").is_err());
        assert!(read_named(&attrs, "basic:sizes").is_err());
    }

    #[test]
    fn set_parse_dispatches_by_view_and_name() {
        assert_eq!(
            parse_set("posix:permissions", &AttributeValue::Permissions(0o7644)).unwrap(),
            AttributeWrite::Permissions(0o644)
        );
        assert_eq!(
            parse_set("owner:owner", &AttributeValue::Id(1000)).unwrap(),
            AttributeWrite::Owner(1000)
        );
        assert_eq!(
            parse_set("posix:group", &AttributeValue::Id(100)).unwrap(),
            AttributeWrite::Group(100)
        );
        let time = from_unix_seconds(9);
        assert_eq!(
            parse_set("lastModifiedTime", &AttributeValue::Time(time)).unwrap(),
            AttributeWrite::LastModifiedTime(time)
        );
    }

    #[test]
    fn set_parse_rejects_unknown_and_mistyped() {
        assert!(parse_set("basic:permissions", &AttributeValue::Permissions(0o644)).is_err());
        assert!(parse_set("acl:owner", &AttributeValue::Id(0)).is_err());
        assert!(parse_set("posix:permissions", &AttributeValue::Bool(true)).is_err());
    }
}
