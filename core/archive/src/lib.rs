//! Archive engine for targpg.
//!
//! This module provides:
//! - Path normalization from user paths to member names
//! - The in-memory tar container and its read/write handles
//! - Gzip compression of the serialized container
//! - The archive session tying load, mutation and save together
//!
//! # Architecture
//! An archive on disk is `envelope(gzip(tar))`. The session decrypts it
//! once on open, mutates the tar container in memory and seals it again
//! on save. Prompts and output go through the [`Interaction`] trait.

pub mod compress;
pub mod config;
pub mod container;
pub mod interact;
pub mod member;
pub mod path;
pub mod session;

pub use config::ArchiveOptions;
pub use container::{ArchiveContainer, ReadHandle, WriteHandle};
pub use interact::{
    is_affirmative, Interaction, PasswordPurpose, PasswordSource, ScriptedInteraction,
};
pub use member::{ArchiveMember, MemberKind};
pub use path::{normalize, NormalizedPath};
pub use session::{AddOptions, ArchiveState, SecureArchive};
