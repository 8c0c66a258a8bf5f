//! Archive member metadata.

use std::io::Read;

use chrono::{DateTime, Local};
use tar::{Entry, EntryType, Header};

use targpg_common::{clean_name, Error, Result};

/// Kind of filesystem object a member was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl MemberKind {
    fn from_entry_type(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                MemberKind::File
            }
            EntryType::Directory => MemberKind::Directory,
            EntryType::Symlink => MemberKind::Symlink,
            _ => MemberKind::Other,
        }
    }

    fn type_char(self) -> char {
        match self {
            MemberKind::File => '-',
            MemberKind::Directory => 'd',
            MemberKind::Symlink => 'l',
            MemberKind::Other => '?',
        }
    }
}

/// One stored entry of the archive.
///
/// Identity is the name alone; size, mode and times are whatever the
/// filesystem reported when the member was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Canonical name, without trailing separator.
    pub name: String,
    pub kind: MemberKind,
    pub size: u64,
    pub mode: u32,
    /// Seconds since the Unix epoch.
    pub mtime: u64,
    pub owner: String,
    pub group: String,
    /// Target of a symlink or hard link member.
    pub link_target: Option<String>,
}

impl ArchiveMember {
    pub(crate) fn from_entry<R: Read>(entry: &Entry<'_, R>) -> Result<Self> {
        let header = entry.header();
        let link_target = entry
            .link_name_bytes()
            .map(|target| String::from_utf8_lossy(&target).into_owned());

        Ok(Self {
            name: entry_name(entry),
            kind: MemberKind::from_entry_type(header.entry_type()),
            size: header.size().map_err(format_error)?,
            mode: header.mode().unwrap_or(0),
            mtime: header.mtime().unwrap_or(0),
            owner: owner_name(header),
            group: group_name(header),
            link_target,
        })
    }

    /// Format the member the way `tar tv` does.
    ///
    /// `-rw-r--r-- user/group          5 2024-01-31 09:15:00 notes.txt`
    pub fn listing_line(&self) -> String {
        let mtime = i64::try_from(self.mtime)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|utc| {
                utc.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "????-??-?? ??:??:??".to_string());

        let mut line = format!(
            "{} {}/{} {:>10} {} {}",
            self.mode_string(),
            self.owner,
            self.group,
            self.size,
            mtime,
            self.name
        );
        if self.kind == MemberKind::Directory {
            line.push('/');
        }
        if let Some(target) = &self.link_target {
            line.push_str(" -> ");
            line.push_str(target);
        }
        line
    }

    /// `ls -l` style permission string, e.g. `drwxr-xr-x`.
    pub fn mode_string(&self) -> String {
        const BITS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];

        let mut out = String::with_capacity(10);
        out.push(self.kind.type_char());
        for (bit, c) in BITS {
            out.push(if self.mode & bit != 0 { c } else { '-' });
        }
        out
    }
}

/// Canonical name of a tar entry, long names included.
pub(crate) fn entry_name<R: Read>(entry: &Entry<'_, R>) -> String {
    let raw = entry.path_bytes();
    clean_name(&String::from_utf8_lossy(&raw)).to_string()
}

pub(crate) fn format_error(e: std::io::Error) -> Error {
    Error::Archive(e.to_string())
}

fn owner_name(header: &Header) -> String {
    match header.username() {
        Ok(Some(name)) if !name.is_empty() => name.to_string(),
        _ => header.uid().map(|uid| uid.to_string()).unwrap_or_default(),
    }
}

fn group_name(header: &Header) -> String {
    match header.groupname() {
        Ok(Some(name)) if !name.is_empty() => name.to_string(),
        _ => header.gid().map(|gid| gid.to_string()).unwrap_or_default(),
    }
}
