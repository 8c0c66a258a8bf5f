//! In-memory tar container.
//!
//! One owned byte buffer holds the tar encoding of every member. The
//! buffer is either being appended to (write mode) or complete and
//! readable (read mode); switching between the two is explicit. Tar has
//! no in-place delete, so removing or replacing members means building a
//! new container from the members worth keeping.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};

use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::member::{entry_name, format_error, ArchiveMember};
use targpg_common::{clean_name, ContainerMode, Error, MemberName, Result};

const BLOCK_SIZE: u64 = 512;

/// Two zero blocks terminate a tar stream.
const END_OF_ARCHIVE: [u8; 1024] = [0u8; 1024];

enum Buffer {
    Write(Builder<Vec<u8>>),
    Read(Vec<u8>),
    Closed,
}

/// Ordered tar members over a single owned buffer.
pub struct ArchiveContainer {
    buffer: Buffer,
}

impl ArchiveContainer {
    /// Create an empty container in write mode.
    pub fn new() -> Self {
        Self {
            buffer: Buffer::Write(new_builder(Vec::new())),
        }
    }

    /// Parse a complete tar stream into a new write-mode container.
    ///
    /// # Errors
    /// - `Error::Archive` if any header or member in `bytes` is malformed;
    ///   nothing is kept in that case
    pub fn from_tar_bytes(bytes: Vec<u8>) -> Result<Self> {
        let source = Self {
            buffer: Buffer::Read(bytes),
        };
        source.rebuild_excluding(&[])
    }

    /// Current mode, or `None` once closed.
    pub fn mode(&self) -> Option<ContainerMode> {
        match self.buffer {
            Buffer::Write(_) => Some(ContainerMode::Write),
            Buffer::Read(_) => Some(ContainerMode::Read),
            Buffer::Closed => None,
        }
    }

    /// Finish the tar stream and make members readable.
    ///
    /// No-op when already in read mode.
    pub fn to_read_mode(&mut self) -> Result<()> {
        match mem::replace(&mut self.buffer, Buffer::Closed) {
            Buffer::Write(builder) => {
                let bytes = builder.into_inner().map_err(format_error)?;
                trace!(bytes = bytes.len(), "Container switched to read mode");
                self.buffer = Buffer::Read(bytes);
                Ok(())
            }
            read @ Buffer::Read(_) => {
                self.buffer = read;
                Ok(())
            }
            Buffer::Closed => Err(Error::Closed),
        }
    }

    /// Resume appending after the last member.
    ///
    /// The end-of-archive blocks are cut off so new members follow the
    /// existing ones. No-op when already in write mode.
    pub fn to_write_mode(&mut self) -> Result<()> {
        match mem::replace(&mut self.buffer, Buffer::Closed) {
            Buffer::Read(mut bytes) => {
                let end = match members_end(&bytes) {
                    Ok(end) => end,
                    Err(e) => {
                        self.buffer = Buffer::Read(bytes);
                        return Err(e);
                    }
                };
                bytes.truncate(end);
                trace!(bytes = bytes.len(), "Container switched to write mode");
                self.buffer = Buffer::Write(new_builder(bytes));
                Ok(())
            }
            write @ Buffer::Write(_) => {
                self.buffer = write;
                Ok(())
            }
            Buffer::Closed => Err(Error::Closed),
        }
    }

    /// Metadata of every member, in container order.
    ///
    /// Available in both modes.
    pub fn members(&self) -> Result<Vec<ArchiveMember>> {
        parse_members(self.bytes()?)
    }

    /// Names of every member, in container order, duplicates included.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.members()?.into_iter().map(|m| m.name).collect())
    }

    /// Append access; write mode only.
    pub fn writer(&mut self) -> Result<WriteHandle<'_>> {
        match &mut self.buffer {
            Buffer::Write(builder) => Ok(WriteHandle { builder }),
            Buffer::Read(_) => Err(Error::WrongMode {
                expected: ContainerMode::Write,
            }),
            Buffer::Closed => Err(Error::Closed),
        }
    }

    /// Content access; read mode only.
    pub fn reader(&self) -> Result<ReadHandle<'_>> {
        match &self.buffer {
            Buffer::Read(bytes) => Ok(ReadHandle { bytes }),
            Buffer::Write(_) => Err(Error::WrongMode {
                expected: ContainerMode::Read,
            }),
            Buffer::Closed => Err(Error::Closed),
        }
    }

    /// Build a new container without the named members.
    ///
    /// Dropping a directory name also drops everything stored beneath it.
    /// The new container is in write mode; `self` is left untouched.
    ///
    /// # Errors
    /// - `Error::WrongMode` unless in read mode
    pub fn rebuild_excluding(&self, names: &[MemberName]) -> Result<ArchiveContainer> {
        let reader = self.reader()?;
        let mut rebuilt = ArchiveContainer::new();
        let kept = {
            let mut writer = rebuilt.writer()?;
            reader.copy_into(&mut writer, |name| !names.iter().any(|n| n.covers(name)))?
        };
        debug!(kept, dropped = names.len(), "Rebuilt container");
        Ok(rebuilt)
    }

    /// Complete tar stream of the current contents.
    ///
    /// Does not change the mode.
    pub fn serialized(&self) -> Result<Vec<u8>> {
        match &self.buffer {
            Buffer::Write(builder) => {
                let mut bytes = builder.get_ref().clone();
                bytes.extend_from_slice(&END_OF_ARCHIVE);
                Ok(bytes)
            }
            Buffer::Read(bytes) => Ok(bytes.clone()),
            Buffer::Closed => Err(Error::Closed),
        }
    }

    /// Release the buffer. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.buffer = Buffer::Closed;
    }

    fn bytes(&self) -> Result<&[u8]> {
        match &self.buffer {
            Buffer::Write(builder) => Ok(builder.get_ref().as_slice()),
            Buffer::Read(bytes) => Ok(bytes.as_slice()),
            Buffer::Closed => Err(Error::Closed),
        }
    }
}

impl Default for ArchiveContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArchiveContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.bytes().map(|b| b.len()).unwrap_or(0);
        f.debug_struct("ArchiveContainer")
            .field("mode", &self.mode())
            .field("bytes", &bytes)
            .finish()
    }
}

/// Append access to a write-mode container.
pub struct WriteHandle<'a> {
    builder: &'a mut Builder<Vec<u8>>,
}

impl WriteHandle<'_> {
    /// Append a file, symlink or directory tree from disk under `name`.
    ///
    /// Directories are walked recursively with children in name order,
    /// each stored as `name/child`. Symlinks are stored as links.
    ///
    /// Returns the number of members appended.
    pub fn append_from_filesystem(&mut self, source: &Path, name: &MemberName) -> Result<usize> {
        let metadata = fs::symlink_metadata(source).map_err(|e| not_found(e, source))?;
        if !metadata.is_dir() {
            self.append_path(source, name.as_str())?;
            return Ok(1);
        }

        let mut appended = 0;
        for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(io::Error::from(e)))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|_| Error::PathEscape {
                    path: entry.path().to_path_buf(),
                    base: source.to_path_buf(),
                })?;
            let member = if relative.as_os_str().is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", name, slash_path(relative)?)
            };
            self.append_path(entry.path(), &member)?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Append a member verbatim.
    ///
    /// `header` supplies type, mode, times and ownership; `name` and
    /// `link_target` are written with long-name extensions when needed.
    pub fn append_member<R: Read>(
        &mut self,
        header: &Header,
        name: &str,
        link_target: Option<&str>,
        data: R,
    ) -> Result<()> {
        let mut header = header.clone();
        let result = match link_target {
            Some(target) if is_link(header.entry_type()) => {
                self.builder.append_link(&mut header, name, target)
            }
            _ => self.builder.append_data(&mut header, name, data),
        };
        result.map_err(|e| Error::Archive(format!("cannot copy {}: {}", name, e)))?;
        trace!(member = name, "Copied member");
        Ok(())
    }

    fn append_path(&mut self, path: &Path, member: &str) -> Result<()> {
        self.builder
            .append_path_with_name(path, member)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => not_found(e, path),
                _ => Error::Archive(format!("cannot add {}: {}", path.display(), e)),
            })?;
        debug!(member, "Appended member");
        Ok(())
    }
}

/// Content access to a read-mode container.
pub struct ReadHandle<'a> {
    bytes: &'a [u8],
}

impl ReadHandle<'_> {
    /// Metadata of every member, in container order.
    pub fn members(&self) -> Result<Vec<ArchiveMember>> {
        parse_members(self.bytes)
    }

    /// Copy every member for which `keep` returns true into `target`.
    ///
    /// Returns the number of members copied.
    pub fn copy_into<F>(&self, target: &mut WriteHandle<'_>, mut keep: F) -> Result<usize>
    where
        F: FnMut(&str) -> bool,
    {
        let mut archive = Archive::new(self.bytes);
        let mut copied = 0;
        for entry in archive.entries().map_err(format_error)? {
            let mut entry = entry.map_err(format_error)?;
            let name = entry_name(&entry);
            if !keep(&name) {
                trace!(member = %name, "Dropped member");
                continue;
            }
            let header = entry.header().clone();
            let link_target = entry
                .link_name_bytes()
                .map(|target| String::from_utf8_lossy(&target).into_owned());
            target.append_member(&header, &name, link_target.as_deref(), &mut entry)?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Write the member called `name` below `outdir`.
    ///
    /// Intermediate directories are created. When the name occurs more
    /// than once the last occurrence wins.
    ///
    /// # Errors
    /// - `Error::NotFound` if no member has that name
    /// - `Error::InvalidInput` if the member would land outside `outdir`
    pub fn extract_to(&self, name: &str, outdir: &Path) -> Result<PathBuf> {
        let name = clean_name(name);
        let position = self
            .members()?
            .iter()
            .rposition(|m| m.name == name)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the archive", name)))?;

        fs::create_dir_all(outdir)?;

        let mut archive = Archive::new(self.bytes);
        let mut entries = archive.entries().map_err(format_error)?;
        let mut entry = entries
            .nth(position)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the archive", name)))?
            .map_err(format_error)?;

        let unpacked = entry
            .unpack_in(outdir)
            .map_err(|e| Error::Archive(format!("cannot extract {}: {}", name, e)))?;
        if !unpacked {
            return Err(Error::InvalidInput(format!(
                "refusing to extract {} outside {}",
                name,
                outdir.display()
            )));
        }

        debug!(member = name, outdir = %outdir.display(), "Extracted member");
        Ok(outdir.join(name))
    }
}

fn new_builder(bytes: Vec<u8>) -> Builder<Vec<u8>> {
    let mut builder = Builder::new(bytes);
    builder.follow_symlinks(false);
    builder
}

fn parse_members(bytes: &[u8]) -> Result<Vec<ArchiveMember>> {
    let mut archive = Archive::new(bytes);
    let mut members = Vec::new();
    for entry in archive.entries().map_err(format_error)? {
        let entry = entry.map_err(format_error)?;
        members.push(ArchiveMember::from_entry(&entry)?);
    }
    Ok(members)
}

/// Offset just past the data of the last member.
fn members_end(bytes: &[u8]) -> Result<usize> {
    let mut archive = Archive::new(bytes);
    let mut end = 0u64;
    for entry in archive.entries().map_err(format_error)? {
        let entry = entry.map_err(format_error)?;
        let size = entry.header().entry_size().map_err(format_error)?;
        let padded = size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        end = end.max(entry.raw_file_position() + padded);
    }
    usize::try_from(end).map_err(|_| Error::Archive("archive too large".to_string()))
}

fn is_link(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::Symlink | EntryType::Link)
}

fn slash_path(path: &Path) -> Result<String> {
    let parts = path
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| {
                Error::InvalidInput(format!("{} is not valid UTF-8", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn not_found(e: io::Error, path: &Path) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    }
}
