//! Archive session.
//!
//! A [`SecureArchive`] owns the decrypted archive for as long as it is
//! open. The encrypted file is read once when the session opens and
//! written only when [`SecureArchive::save`] is called; every mutation in
//! between happens on the in-memory container.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::compress::{compress, decompress};
use crate::config::ArchiveOptions;
use crate::container::ArchiveContainer;
use crate::interact::{Interaction, PasswordPurpose, PasswordSource};
use crate::member::ArchiveMember;
use crate::path::{normalize, NormalizedPath};
use targpg_common::{clean_name, Error, MemberName, Passphrase, Result};

/// State of an archive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// Archive is loaded and accepts operations.
    Ready,
    /// Archive has been closed; every operation fails.
    Closed,
}

/// Flags for [`SecureArchive::add`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Fail if any name is already in the archive.
    pub unique: bool,
    /// Replace names already in the archive instead of appending copies.
    pub update: bool,
}

/// An open password-protected archive.
///
/// The password is held for the lifetime of the session and zeroized on
/// drop. Dropping the session closes it.
pub struct SecureArchive<I: Interaction> {
    /// Archive file on disk.
    path: PathBuf,
    /// Password used to seal on save.
    password: Passphrase,
    /// Options given at open.
    options: ArchiveOptions,
    /// Decrypted members.
    container: ArchiveContainer,
    /// Prompts and output.
    interaction: I,
    /// Session state.
    state: ArchiveState,
}

impl<I: Interaction> SecureArchive<I> {
    /// Open the archive at `path`, creating it in memory if missing.
    ///
    /// # Preconditions
    /// - `path` is a regular file or does not exist
    ///
    /// # Postconditions
    /// - Returns a ready session holding every member of the archive
    /// - Nothing is written to disk until `save`
    ///
    /// # Errors
    /// - `Error::ArchiveNotFound` if the file is missing and creating it
    ///   was declined
    /// - `Error::Decryption` if the password is wrong or the file is not an
    ///   archive
    /// - Password resolution errors (`PasswordMismatch`, `InvalidInput`)
    pub fn open(
        path: impl Into<PathBuf>,
        password: &PasswordSource,
        options: ArchiveOptions,
        mut interaction: I,
    ) -> Result<Self> {
        let path = path.into();
        options.validate()?;

        let exists = path.is_file();
        if !exists && path.exists() {
            return Err(Error::InvalidInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if !exists
            && !options.autocreate
            && !interaction.confirm("Secure file does not exist; Create new? ")?
        {
            return Err(Error::ArchiveNotFound(path));
        }

        let purpose = if exists {
            PasswordPurpose::Existing
        } else {
            PasswordPurpose::New
        };
        let password = password.resolve(&mut interaction, purpose)?;

        let container = if exists {
            load_container(&path, &password)?
        } else {
            ArchiveContainer::new()
        };

        info!(
            path = %path.display(),
            created = !exists,
            members = container.names()?.len(),
            "Opened archive"
        );

        Ok(Self {
            path,
            password,
            options,
            container,
            interaction,
            state: ArchiveState::Ready,
        })
    }

    /// Get the archive path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the session state.
    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// Get the options the archive was opened with.
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Get the interaction.
    pub fn interaction(&self) -> &I {
        &self.interaction
    }

    /// Get the interaction mutably.
    pub fn interaction_mut(&mut self) -> &mut I {
        &mut self.interaction
    }

    /// Member names in archive order.
    pub fn names(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.container.names()
    }

    /// Member metadata in archive order, without printing anything.
    pub fn members(&self) -> Result<Vec<ArchiveMember>> {
        self.ensure_ready()?;
        self.container.members()
    }

    /// Add files or directories, read relative to `directory`.
    ///
    /// # Behavior
    /// - Every path is checked before anything is appended, and the
    ///   archive is left unchanged if any append fails
    /// - `unique`: fail if any name is already present
    /// - `update`: names already present are replaced, the rest appended
    /// - Neither: everything is appended, duplicates included
    ///
    /// # Errors
    /// - `Error::NotFound` if any source path is missing
    /// - `Error::DuplicateMember` listing every offending name (`unique`)
    /// - Path normalization errors
    pub fn add<P: AsRef<Path>>(
        &mut self,
        filenames: &[P],
        directory: Option<&Path>,
        options: AddOptions,
    ) -> Result<()> {
        self.ensure_ready()?;
        if filenames.is_empty() {
            return Ok(());
        }

        let paths = normalize_all(filenames, directory)?;
        let existing: HashSet<String> = self.container.names()?.into_iter().collect();

        if options.unique {
            let mut seen = HashSet::new();
            let mut duplicates = Vec::new();
            for path in &paths {
                let name = path.member_name.as_str();
                if (existing.contains(name) || !seen.insert(name))
                    && !duplicates.iter().any(|d| d == name)
                {
                    duplicates.push(name.to_string());
                }
            }
            if !duplicates.is_empty() {
                return Err(Error::DuplicateMember(duplicates));
            }
        }

        let dropped: Vec<MemberName> = if options.update {
            paths
                .iter()
                .filter(|p| existing.contains(p.member_name.as_str()))
                .map(|p| p.member_name.clone())
                .collect()
        } else {
            Vec::new()
        };

        let appended = self.rebuild_with(&dropped, &paths)?;
        info!(
            requested = filenames.len(),
            replaced = dropped.len(),
            appended,
            "Added to archive"
        );
        Ok(())
    }

    /// Replace members with the current content of the given paths.
    ///
    /// Names not yet in the archive are added. Replacing a directory also
    /// drops every member stored beneath it before re-adding the tree.
    ///
    /// # Errors
    /// - `Error::NotFound` if any source path is missing
    /// - Path normalization errors
    pub fn update<P: AsRef<Path>>(&mut self, filenames: &[P], directory: Option<&Path>) -> Result<()> {
        self.ensure_ready()?;
        if filenames.is_empty() {
            return Ok(());
        }

        let paths = normalize_all(filenames, directory)?;
        let dropped: Vec<MemberName> = paths.iter().map(|p| p.member_name.clone()).collect();
        let appended = self.rebuild_with(&dropped, &paths)?;

        info!(requested = paths.len(), appended, "Updated archive");
        Ok(())
    }

    /// Remove members by name.
    ///
    /// Removing a directory also removes everything stored beneath it.
    ///
    /// # Errors
    /// - `Error::MissingMember` listing every name not in the archive;
    ///   nothing is removed in that case
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.ensure_ready()?;
        if names.is_empty() {
            return Ok(());
        }

        let names = names
            .iter()
            .map(MemberName::new)
            .collect::<Result<Vec<_>>>()?;

        let present: HashSet<String> = self.container.names()?.into_iter().collect();
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !present.contains(n.as_str()))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingMember(missing));
        }

        let before = present.len();
        self.container.to_read_mode()?;
        let rebuilt = self.container.rebuild_excluding(&names)?;
        self.swap(rebuilt);

        info!(
            requested = names.len(),
            distinct_before = before,
            remaining = self.container.names()?.len(),
            "Removed from archive"
        );
        Ok(())
    }

    /// Extract members into `outdir`.
    ///
    /// With no names, every member is shown with an index and the user is
    /// asked which to extract. Explicit names that are not in the archive
    /// are skipped.
    ///
    /// Returns the names extracted.
    ///
    /// # Errors
    /// - `Error::InvalidSelection` for an unparseable or out-of-range index
    pub fn extract<S: AsRef<str>>(&mut self, filenames: &[S], outdir: &Path) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let names = self.container.names()?;

        let selected = if filenames.is_empty() {
            self.select(&names)?
        } else {
            let mut selected = Vec::new();
            for filename in filenames {
                let name = clean_name(filename.as_ref());
                if !names.iter().any(|n| n == name) {
                    debug!(member = name, "Not in archive, skipping");
                } else if !selected.iter().any(|s| s == name) {
                    selected.push(name.to_string());
                }
            }
            selected
        };

        if selected.is_empty() {
            return Ok(selected);
        }

        self.container.to_read_mode()?;
        let reader = self.container.reader()?;
        for name in &selected {
            reader.extract_to(name, outdir)?;
        }

        info!(
            extracted = selected.len(),
            outdir = %outdir.display(),
            "Extracted from archive"
        );
        Ok(selected)
    }

    /// Show a `tar tv` style line for every member and return them.
    pub fn list(&mut self) -> Result<Vec<ArchiveMember>> {
        self.ensure_ready()?;
        let members = self.container.members()?;
        for member in &members {
            self.interaction.show(&member.listing_line())?;
        }
        Ok(members)
    }

    /// Encrypt the archive and write it to disk.
    ///
    /// Writes to `filename` if given, else to the path the archive was
    /// opened from. The file is replaced atomically, so a failed save
    /// leaves any previous file intact. In-memory state is unchanged and
    /// saving may be repeated.
    ///
    /// Returns the path written.
    pub fn save(&self, filename: Option<&Path>) -> Result<PathBuf> {
        self.ensure_ready()?;
        let destination = filename.unwrap_or(&self.path).to_path_buf();

        let tar = self.container.serialized()?;
        let compressed = compress(&tar, self.options.compression_level)?;
        let sealed = targpg_crypto::seal(&compressed, &self.password, &self.options.kdf_params)?;
        write_atomically(&destination, &sealed)?;

        info!(
            path = %destination.display(),
            tar_bytes = tar.len(),
            bytes = sealed.len(),
            "Saved archive"
        );
        Ok(destination)
    }

    /// Use a new password for subsequent saves.
    ///
    /// Prompting asks for the new password twice.
    pub fn change_password(&mut self, source: &PasswordSource) -> Result<()> {
        self.ensure_ready()?;
        self.password = source.resolve(&mut self.interaction, PasswordPurpose::New)?;
        info!(path = %self.path.display(), "Password changed, takes effect on save");
        Ok(())
    }

    /// Close the archive and release its contents.
    ///
    /// Safe to call more than once. Unsaved changes are lost.
    pub fn close(&mut self) {
        if self.state == ArchiveState::Closed {
            return;
        }
        self.container.close();
        self.state = ArchiveState::Closed;
        debug!(path = %self.path.display(), "Closed archive");
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ArchiveState::Ready => Ok(()),
            ArchiveState::Closed => Err(Error::Closed),
        }
    }

    /// Rebuild without `dropped`, append `paths`, then swap the result in.
    ///
    /// The live container is only replaced once every append succeeded.
    /// Returns the number of members appended.
    fn rebuild_with(&mut self, dropped: &[MemberName], paths: &[NormalizedPath]) -> Result<usize> {
        self.container.to_read_mode()?;
        let mut rebuilt = self.container.rebuild_excluding(dropped)?;
        let mut appended = 0;
        {
            let mut writer = rebuilt.writer()?;
            for path in paths {
                appended += writer.append_from_filesystem(&path.fs_path, &path.member_name)?;
            }
        }
        self.swap(rebuilt);
        Ok(appended)
    }

    fn swap(&mut self, container: ArchiveContainer) {
        let mut old = mem::replace(&mut self.container, container);
        old.close();
    }

    /// Ask which members to extract by index.
    fn select(&mut self, names: &[String]) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let width = names.len().to_string().len();
        for (index, name) in names.iter().enumerate() {
            self.interaction
                .show(&format!("{:>width$} {}", index, name, width = width))?;
        }

        let answer = self.interaction.ask("Extract? ")?;
        answer
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| names.get(index))
                    .cloned()
                    .ok_or_else(|| Error::InvalidSelection(token.to_string()))
            })
            .collect()
    }
}

impl<I: Interaction> Drop for SecureArchive<I> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<I: Interaction> std::fmt::Debug for SecureArchive<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureArchive")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// Decrypt and parse the archive file.
///
/// A wrong password is an error. Contents that decrypt but are not a
/// gzip'd tar stream are logged and replaced by an empty archive.
fn load_container(path: &Path, password: &Passphrase) -> Result<ArchiveContainer> {
    let sealed = fs::read(path)?;
    let compressed = targpg_crypto::open(&sealed, password)?;

    match decompress(&compressed).and_then(ArchiveContainer::from_tar_bytes) {
        Ok(container) => Ok(container),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Archive contents unreadable, starting empty"
            );
            Ok(ArchiveContainer::new())
        }
    }
}

fn normalize_all<P: AsRef<Path>>(filenames: &[P], directory: Option<&Path>) -> Result<Vec<NormalizedPath>> {
    filenames
        .iter()
        .map(|filename| {
            let path = normalize(filename, directory)?;
            path.ensure_exists()?;
            Ok(path)
        })
        .collect()
}

fn write_atomically(destination: &Path, data: &[u8]) -> Result<()> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(destination).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
