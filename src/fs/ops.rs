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

//! Callback-facing filesystem operations.
//!
//! [`FileSystem`] composes the path parser, directory lookup, allocator and
//! file I/O engine into the operation set a host filesystem-in-userspace
//! layer dispatches on. One operation runs at a time; every mutating
//! operation writes its blocks back in the order data, directory record,
//! bitmap, and flushes the device before returning success.

use crate::Error;
use crate::Result;
use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::dir;
use crate::file;
use crate::path;
use crate::path::ParsedPath;
use crate::record::BLOCK_SIZE;
use crate::record::DIR_CAPACITY;
use crate::record::DataBlock;
use crate::record::DirEntry;
use crate::record::DirectoryBlock;
use crate::record::FileEntry;
use crate::record::ROOT_BLOCK;
use crate::record::ROOT_CAPACITY;
use log::debug;
use std::path::Path;

/// The attributes reported for a directory or file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Attributes {
    /// File type and permission bits.
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Size in bytes. Zero for directories.
    pub size: u64,
}

impl Attributes {
    /// The fixed attributes of a directory.
    fn directory() -> Self {
        Self {
            mode: libc::S_IFDIR as u32 | 0o755,
            nlink: 2,
            size: 0,
        }
    }

    /// The fixed attributes of a regular file of `size` bytes.
    fn regular(size: u64) -> Self {
        Self {
            mode: libc::S_IFREG as u32 | 0o666,
            nlink: 1,
            size,
        }
    }
}

/// A mounted filesystem.
pub struct FileSystem {
    /// The disk image.
    dev: BlockDevice,
    /// The allocation bitmap, held for the life of the mount.
    bitmap: Bitmap,
}

impl FileSystem {
    /// Opens the image at `path` and loads its allocation bitmap.
    pub fn mount(path: &Path) -> Result<Self> {
        let mut dev = BlockDevice::open(path)?;
        let bitmap = Bitmap::load(&mut dev)?;
        debug!(
            "mounted {} ({} blocks, {} free)",
            path.display(),
            dev.block_count(),
            bitmap.free_blocks()
        );
        Ok(Self { dev, bitmap })
    }

    /// Returns the attributes of the entry at `path`.
    pub fn getattr(&mut self, path: &str) -> Result<Attributes> {
        match path::parse(path)? {
            ParsedPath::Root => Ok(Attributes::directory()),
            ParsedPath::Directory(name) => {
                let root = dir::load_root(&mut self.dev)?;
                dir::find_directory(&root, &name).ok_or(Error::NotFound)?;
                Ok(Attributes::directory())
            }
            ParsedPath::File { dir: dname, name, ext } => {
                let root = dir::load_root(&mut self.dev)?;
                let block = dir::find_directory(&root, &dname).ok_or(Error::NotFound)?;
                let directory = dir::load_directory(&mut self.dev, block)?;
                let slot = dir::find_file(&directory, &name, &ext).ok_or(Error::NotFound)?;
                Ok(Attributes::regular(directory.files[slot].size))
            }
        }
    }

    /// Lists the entries of the directory at `path`, starting with `.` and
    /// `..`. Files render as `name` or `name.ext`.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>> {
        let mut entries = vec![".".to_owned(), "..".to_owned()];
        match path::parse(path)? {
            ParsedPath::Root => {
                let root = dir::load_root(&mut self.dev)?;
                for entry in root.directories {
                    entries.push(entry.name);
                }
            }
            ParsedPath::Directory(name) => {
                let root = dir::load_root(&mut self.dev)?;
                let block = dir::find_directory(&root, &name).ok_or(Error::NotFound)?;
                let directory = dir::load_directory(&mut self.dev, block)?;
                for file in directory.files {
                    if file.ext.is_empty() {
                        entries.push(file.name);
                    } else {
                        entries.push(format!("{}.{}", file.name, file.ext));
                    }
                }
            }
            ParsedPath::File { .. } => return Err(Error::NotFound),
        }
        Ok(entries)
    }

    /// Creates the directory at `path`, directly under the root.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let name = match path::parse(path)? {
            ParsedPath::Directory(name) => name,
            // directories exist at the root level only
            ParsedPath::Root | ParsedPath::File { .. } => return Err(Error::NotPermitted),
        };
        let mut root = dir::load_root(&mut self.dev)?;
        if dir::find_directory(&root, &name).is_some() {
            return Err(Error::AlreadyExists);
        }
        if root.directories.len() >= ROOT_CAPACITY {
            return Err(Error::NoSpace);
        }

        let block = self.bitmap.allocate()?;
        let mut raw = [0; BLOCK_SIZE];
        DirectoryBlock::default().encode(&mut raw);
        if let Err(e) = self.dev.write_block(block, &raw) {
            self.bitmap.free(block);
            return Err(e);
        }
        root.directories.push(DirEntry {
            name,
            start_block: block,
        });
        let mut raw = [0; BLOCK_SIZE];
        root.encode(&mut raw);
        if let Err(e) = self.dev.write_block(ROOT_BLOCK, &raw) {
            self.bitmap.free(block);
            return Err(e);
        }
        self.bitmap.persist(&mut self.dev)?;
        self.dev.flush()?;
        debug!("mkdir {path}: directory record in block {block}");
        Ok(())
    }

    /// Removing directories is not supported. Reported as success so the
    /// host layer's contract holds.
    pub fn rmdir(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Creates the empty file at `path`, inside an existing directory.
    pub fn mknod(&mut self, path: &str) -> Result<()> {
        let (dname, name, ext) = match path::parse(path)? {
            ParsedPath::File { dir, name, ext } => (dir, name, ext),
            // files live inside directories, never at the root level
            ParsedPath::Root | ParsedPath::Directory(_) => return Err(Error::NotPermitted),
        };
        let root = dir::load_root(&mut self.dev)?;
        let dir_block = dir::find_directory(&root, &dname).ok_or(Error::NotFound)?;
        let mut directory = dir::load_directory(&mut self.dev, dir_block)?;
        if dir::find_file(&directory, &name, &ext).is_some() {
            return Err(Error::AlreadyExists);
        }
        if directory.files.len() >= DIR_CAPACITY {
            return Err(Error::NoSpace);
        }

        let block = self.bitmap.allocate()?;
        let mut raw = [0; BLOCK_SIZE];
        DataBlock::default().encode(&mut raw);
        if let Err(e) = self.dev.write_block(block, &raw) {
            self.bitmap.free(block);
            return Err(e);
        }
        directory.files.push(FileEntry {
            name,
            ext,
            size: 0,
            start_block: block,
        });
        let mut raw = [0; BLOCK_SIZE];
        directory.encode(&mut raw);
        if let Err(e) = self.dev.write_block(dir_block, &raw) {
            self.bitmap.free(block);
            return Err(e);
        }
        self.bitmap.persist(&mut self.dev)?;
        self.dev.flush()?;
        debug!("mknod {path}: data chain starts in block {block}");
        Ok(())
    }

    /// Deleting files is not supported. Reported as success so the host
    /// layer's contract holds.
    pub fn unlink(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Reads up to `size` bytes at `offset` from the file at `path`.
    pub fn read(&mut self, path: &str, size: u64, offset: u64) -> Result<Vec<u8>> {
        let (_, directory, slot) = self.resolve_file(path)?;
        file::read(&mut self.dev, &directory, slot, size, offset)
    }

    /// Writes `data` at `offset` into the file at `path` and returns the
    /// number of bytes written.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let (dir_block, mut directory, slot) = self.resolve_file(path)?;
        let written = file::write(
            &mut self.dev,
            &mut self.bitmap,
            &mut directory,
            dir_block,
            slot,
            data,
            offset,
        )?;
        self.dev.flush()?;
        Ok(written)
    }

    /// Shrinking files is not supported; reported as success.
    pub fn truncate(&mut self, _path: &str, _size: u64) -> Result<()> {
        Ok(())
    }

    /// Nothing to do on open; access checks are not performed.
    pub fn open(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Forces completed writes down to the image.
    pub fn flush(&mut self) -> Result<()> {
        self.dev.flush()
    }

    /// Returns the number of free blocks.
    pub fn free_blocks(&self) -> u64 {
        self.bitmap.free_blocks()
    }

    /// Returns the number of blocks usable for records and data.
    pub fn data_blocks(&self) -> u64 {
        self.bitmap.data_blocks()
    }

    /// Rebuilds the allocation bitmap from the reachable records and writes
    /// it back.
    pub fn rebuild_bitmap(&mut self) -> Result<()> {
        self.bitmap.rebuild(&mut self.dev)?;
        self.bitmap.persist(&mut self.dev)?;
        self.dev.flush()
    }

    /// Resolves `path` to its enclosing directory record and file slot.
    fn resolve_file(&mut self, path: &str) -> Result<(u64, DirectoryBlock, usize)> {
        let ParsedPath::File { dir: dname, name, ext } = path::parse(path)? else {
            return Err(Error::IsDirectory);
        };
        let root = dir::load_root(&mut self.dev)?;
        let dir_block = dir::find_directory(&root, &dname).ok_or(Error::NotFound)?;
        let directory = dir::load_directory(&mut self.dev, dir_block)?;
        let slot = dir::find_file(&directory, &name, &ext).ok_or(Error::NotFound)?;
        Ok((dir_block, directory, slot))
    }
}
