/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Core of the `flatfs` filesystem: a two-level hierarchy (a root of
//! directories, each holding regular files with 8.3 names) stored on a single
//! fixed-size disk image, addressed in 512-byte blocks.
//!
//! The crate exposes the on-disk layout ([`record`]), the block device
//! ([`block`]), the free-space bitmap ([`bitmap`]), path analysis ([`path`]),
//! directory lookup ([`dir`]), the file I/O engine ([`file`]) and the
//! callback-facing operations ([`ops`]). A host integration layer is expected
//! to drive [`ops::FileSystem`] and relay failures with [`Error::errno`].

pub mod bitmap;
pub mod block;
pub mod dir;
pub mod file;
pub mod ops;
pub mod path;
pub mod record;

use std::io;
use thiserror::Error;

pub use ops::{Attributes, FileSystem};

/// An error surfaced by the filesystem core.
///
/// No error is recovered internally: any failure aborts the current operation
/// and is returned as-is to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A named directory or file does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A directory or file with that name already exists in the target scope.
    #[error("entry already exists")]
    AlreadyExists,
    /// A component of a parsed path exceeds its cap.
    #[error("name too long")]
    NameTooLong,
    /// The operation was attempted at an illegal level of the hierarchy.
    #[error("operation not permitted")]
    NotPermitted,
    /// No free block is left, or the parent container is at capacity.
    #[error("no space left on image")]
    NoSpace,
    /// The offset lies beyond the end of the file.
    #[error("offset out of bounds")]
    TooLarge,
    /// Read or write was invoked on a directory path.
    #[error("is a directory")]
    IsDirectory,
    /// The path is malformed or nests deeper than two levels.
    #[error("bad path")]
    BadPath,
    /// The backing file could not be accessed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Converts the error into the negative errno value expected by a
    /// filesystem-in-userspace callback layer.
    pub fn errno(&self) -> i32 {
        let errno = match self {
            Self::NotFound | Self::BadPath => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotPermitted => libc::EPERM,
            Self::NoSpace => libc::ENOSPC,
            Self::TooLarge => libc::EFBIG,
            Self::IsDirectory => libc::EISDIR,
            Self::Io(_) => libc::EIO,
        };
        -errno
    }
}

/// Builds the I/O-class error reported for malformed on-disk structures.
pub(crate) fn corrupted(msg: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Result type of every filesystem operation.
pub type Result<T> = std::result::Result<T, Error>;
