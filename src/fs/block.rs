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

//! Block-addressed access to the disk image.
//!
//! The device performs no caching: every access is a seek followed by an
//! exact read or write of one block. Out-of-range indices are a programmer
//! error and abort.

use crate::Result;
use crate::corrupted;
use crate::record::BLOCK_SIZE;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

/// A disk image opened for block-level access.
pub struct BlockDevice {
    /// The backing file.
    file: File,
    /// The number of blocks in the image, derived from the file's length.
    block_count: u64,
}

impl BlockDevice {
    /// Opens the image at `path` for reading and writing.
    ///
    /// Fails if the file is absent or its length is not a whole number of
    /// blocks.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(corrupted("image length is not a whole number of blocks"));
        }
        Ok(Self {
            file,
            block_count: len / BLOCK_SIZE as u64,
        })
    }

    /// Returns the number of blocks in the image.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Reads the block at `index` into `buf`.
    pub fn read_block(&mut self, index: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        assert!(index < self.block_count, "block index out of range: {index}");
        self.file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to the block at `index`.
    pub fn write_block(&mut self, index: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        assert!(index < self.block_count, "block index out of range: {index}");
        self.file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Forces completed writes down to the backing file.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
