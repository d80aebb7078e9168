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

//! Free-space bitmap allocator.
//!
//! One bit per block of the image, least significant bit first within each
//! byte: bit `i` of byte `j` covers block `j * 8 + i`. The map itself lives
//! in the trailing blocks of the image. Block 0 (the root record) and the
//! trailing map blocks are reserved and always marked used.
//!
//! The in-memory map is authoritative until written back: mutating callers
//! compose any number of `allocate`/`free` calls, then invoke [`Bitmap::persist`]
//! once at the end of the operation.

use crate::Error;
use crate::Result;
use crate::block::BlockDevice;
use crate::corrupted;
use crate::dir;
use crate::file::read_data_block;
use crate::record::BLOCK_DATA_SIZE;
use crate::record::BLOCK_SIZE;
use crate::record::ROOT_BLOCK;
use log::trace;

/// Returns the number of trailing blocks needed to hold a bitmap covering an
/// image of `block_count` blocks.
pub fn bitmap_blocks(block_count: u64) -> u64 {
    block_count.div_ceil((BLOCK_SIZE * 8) as u64)
}

/// The free-space bitmap of one disk image.
pub struct Bitmap {
    /// One bit per block of the image.
    map: Vec<u8>,
    /// The number of blocks in the image.
    block_count: u64,
    /// The number of trailing blocks holding the persisted map.
    map_blocks: u64,
}

impl Bitmap {
    /// Creates a fresh map for an image of `block_count` blocks, with only
    /// the reserved blocks marked used.
    pub fn new(block_count: u64) -> Self {
        let map_blocks = bitmap_blocks(block_count);
        assert!(block_count > map_blocks + 1, "image too small for a bitmap");
        let mut bitmap = Self {
            map: vec![0; map_blocks as usize * BLOCK_SIZE],
            block_count,
            map_blocks,
        };
        bitmap.reserve();
        bitmap
    }

    /// Loads the map from the trailing blocks of `dev` and marks the
    /// reserved blocks used.
    pub fn load(dev: &mut BlockDevice) -> Result<Self> {
        let block_count = dev.block_count();
        let map_blocks = bitmap_blocks(block_count);
        if block_count <= map_blocks + 1 {
            return Err(corrupted("image too small for a bitmap"));
        }
        let mut map = vec![0; map_blocks as usize * BLOCK_SIZE];
        let first = block_count - map_blocks;
        for i in 0..map_blocks {
            let mut buf = [0; BLOCK_SIZE];
            dev.read_block(first + i, &mut buf)?;
            map[i as usize * BLOCK_SIZE..][..BLOCK_SIZE].copy_from_slice(&buf);
        }
        let mut bitmap = Self {
            map,
            block_count,
            map_blocks,
        };
        bitmap.reserve();
        Ok(bitmap)
    }

    /// Marks the root block and the map's own blocks as used.
    fn reserve(&mut self) {
        self.set(ROOT_BLOCK);
        for index in (self.block_count - self.map_blocks)..self.block_count {
            self.set(index);
        }
    }

    fn set(&mut self, index: u64) {
        assert!(index < self.block_count, "block index out of range: {index}");
        self.map[(index / 8) as usize] |= 1 << (index % 8);
    }

    /// Tells whether the block at `index` is marked used.
    pub fn is_set(&self, index: u64) -> bool {
        assert!(index < self.block_count, "block index out of range: {index}");
        self.map[(index / 8) as usize] & (1 << (index % 8)) != 0
    }

    /// Clears the bit of the block at `index`. Clearing an already-free bit
    /// is a no-op.
    pub fn free(&mut self, index: u64) {
        assert!(index < self.block_count, "block index out of range: {index}");
        self.map[(index / 8) as usize] &= !(1 << (index % 8));
    }

    /// Returns the lowest free block index and marks it used, in memory only.
    ///
    /// The eligible range excludes the root block and the map's own blocks.
    pub fn allocate(&mut self) -> Result<u64> {
        let end = self.block_count - self.map_blocks;
        for index in 1..end {
            if !self.is_set(index) {
                self.set(index);
                trace!("allocated block {index}");
                return Ok(index);
            }
        }
        Err(Error::NoSpace)
    }

    /// Writes the in-memory map to the trailing blocks of `dev`.
    pub fn persist(&self, dev: &mut BlockDevice) -> Result<()> {
        let first = self.block_count - self.map_blocks;
        for i in 0..self.map_blocks {
            let mut buf = [0; BLOCK_SIZE];
            buf.copy_from_slice(&self.map[i as usize * BLOCK_SIZE..][..BLOCK_SIZE]);
            dev.write_block(first + i, &buf)?;
        }
        Ok(())
    }

    /// Returns the number of free blocks in the eligible range.
    pub fn free_blocks(&self) -> u64 {
        (1..self.block_count - self.map_blocks)
            .filter(|index| !self.is_set(*index))
            .count() as u64
    }

    /// Returns the number of blocks usable for records and data.
    pub fn data_blocks(&self) -> u64 {
        self.block_count - self.map_blocks - 1
    }

    /// Rebuilds the map by walking every record reachable from the root.
    ///
    /// Reserved blocks, every directory record and every block of every file
    /// chain end up marked used; everything else is free.
    pub fn rebuild(&mut self, dev: &mut BlockDevice) -> Result<()> {
        self.map.fill(0);
        self.reserve();
        let root = dir::load_root(dev)?;
        for entry in &root.directories {
            self.set(entry.start_block);
            let directory = dir::load_directory(dev, entry.start_block)?;
            for file in &directory.files {
                let blocks = file.size.div_ceil(BLOCK_DATA_SIZE as u64).max(1);
                let mut block = file.start_block;
                for i in 0..blocks {
                    self.set(block);
                    if i + 1 < blocks {
                        let data = read_data_block(dev, block)?;
                        if data.next_block == 0 {
                            return Err(corrupted("file chain ends before its recorded size"));
                        }
                        block = data.next_block;
                    }
                }
            }
        }
        Ok(())
    }
}
