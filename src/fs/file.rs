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

//! File content access over the linked data-block chain.
//!
//! A file is a singly linked list of data blocks, each carrying
//! [`BLOCK_DATA_SIZE`] payload bytes and the index of the next block
//! (`0` terminates the chain). Reads clamp to the end of the file; writes
//! grow the file and its chain as needed, but never shrink either.

use crate::Error;
use crate::Result;
use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::corrupted;
use crate::record::BLOCK_DATA_SIZE;
use crate::record::BLOCK_SIZE;
use crate::record::DataBlock;
use crate::record::DirectoryBlock;
use log::debug;

/// Reads the data block at `index`.
pub(crate) fn read_data_block(dev: &mut BlockDevice, index: u64) -> Result<DataBlock> {
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(index, &mut buf)?;
    DataBlock::decode(&buf)
}

/// Writes `block` at `index`.
fn write_data_block(dev: &mut BlockDevice, index: u64, block: &DataBlock) -> Result<()> {
    let mut buf = [0; BLOCK_SIZE];
    block.encode(&mut buf);
    dev.write_block(index, &buf)
}

/// Follows the chain starting at `start` for `hops` links.
fn walk_chain(dev: &mut BlockDevice, start: u64, hops: u64) -> Result<u64> {
    let mut block = start;
    for _ in 0..hops {
        let data = read_data_block(dev, block)?;
        if data.next_block == 0 {
            return Err(corrupted("file chain ends before its recorded size"));
        }
        block = data.next_block;
    }
    Ok(block)
}

/// Reads up to `size` bytes at `offset` from the file in slot `slot` of
/// `dir`, clamping to the end of the file.
///
/// An offset beyond the end of the file fails with [`Error::TooLarge`].
pub fn read(
    dev: &mut BlockDevice,
    dir: &DirectoryBlock,
    slot: usize,
    size: u64,
    offset: u64,
) -> Result<Vec<u8>> {
    let file = &dir.files[slot];
    if size == 0 {
        return Ok(Vec::new());
    }
    if offset > file.size {
        return Err(Error::TooLarge);
    }
    let size = size.min(file.size - offset) as usize;
    if size == 0 {
        // the read starts exactly at the end of the file
        return Ok(Vec::new());
    }

    let mut block = walk_chain(dev, file.start_block, offset / BLOCK_DATA_SIZE as u64)?;
    let mut within = (offset % BLOCK_DATA_SIZE as u64) as usize;
    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        let data = read_data_block(dev, block)?;
        let take = (size - out.len()).min(BLOCK_DATA_SIZE - within);
        out.extend_from_slice(&data.data[within..within + take]);
        within = 0;
        if out.len() < size {
            if data.next_block == 0 {
                return Err(corrupted("file chain ends before its recorded size"));
            }
            block = data.next_block;
        }
    }
    Ok(out)
}

/// Writes `buf` at `offset` into the file in slot `slot` of `dir`, growing
/// the file and its chain as needed.
///
/// On success the file's new size is recorded and the directory record at
/// `dir_block` and the bitmap are written back, in that order. Returns the
/// number of bytes written. An offset beyond the end of the file fails with
/// [`Error::TooLarge`]. A failed call releases the blocks it reserved and
/// re-terminates the chain where it used to end, so no on-disk link points
/// at a released block.
pub fn write(
    dev: &mut BlockDevice,
    bitmap: &mut Bitmap,
    dir: &mut DirectoryBlock,
    dir_block: u64,
    slot: usize,
    buf: &[u8],
    offset: u64,
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let old_size = dir.files[slot].size;
    if offset > old_size {
        return Err(Error::TooLarge);
    }

    let mut allocated = Vec::new();
    let mut junction = None;
    if let Err(e) = write_chain(
        dev,
        bitmap,
        dir.files[slot].start_block,
        buf,
        offset,
        &mut allocated,
        &mut junction,
    ) {
        release(dev, bitmap, allocated, junction);
        return Err(e);
    }

    // data blocks are on disk; commit the new size, then the bitmap
    dir.files[slot].size = old_size.max(offset + buf.len() as u64);
    let mut raw = [0; BLOCK_SIZE];
    dir.encode(&mut raw);
    if let Err(e) = dev.write_block(dir_block, &raw) {
        dir.files[slot].size = old_size;
        release(dev, bitmap, allocated, junction);
        return Err(e);
    }
    bitmap.persist(dev)?;
    debug!(
        "wrote {} bytes at offset {offset} ({} blocks allocated)",
        buf.len(),
        allocated.len()
    );
    Ok(buf.len())
}

/// Releases the blocks reserved by a failed write and re-terminates the
/// chain at `junction`, the old tail that was linked to the first of them.
///
/// The bitmap was not persisted, so only the dangling link needs undoing on
/// disk. If the device is failing, that write can fail too; block-level
/// atomicity is all that is left then.
fn release(dev: &mut BlockDevice, bitmap: &mut Bitmap, allocated: Vec<u64>, junction: Option<u64>) {
    for block in allocated {
        bitmap.free(block);
    }
    let Some(block) = junction else {
        return;
    };
    if let Ok(data) = read_data_block(dev, block) {
        let tail = DataBlock {
            next_block: 0,
            ..data
        };
        let _ = write_data_block(dev, block, &tail);
    }
}

/// Copies `buf` into the chain starting at `start`, beginning `offset` bytes
/// into the file. New blocks are linked in as needed and recorded in
/// `allocated`; `junction` receives the pre-existing tail that the first of
/// them was linked to.
fn write_chain(
    dev: &mut BlockDevice,
    bitmap: &mut Bitmap,
    start: u64,
    buf: &[u8],
    offset: u64,
    allocated: &mut Vec<u64>,
    junction: &mut Option<u64>,
) -> Result<()> {
    // reach the first block to write, extending the chain when the write
    // starts exactly at its end
    let mut block = start;
    let mut fresh = false;
    for _ in 0..offset / BLOCK_DATA_SIZE as u64 {
        let data = read_data_block(dev, block)?;
        if data.next_block != 0 {
            block = data.next_block;
        } else {
            let next = bitmap.allocate()?;
            allocated.push(next);
            if junction.is_none() {
                *junction = Some(block);
            }
            let linked = DataBlock {
                next_block: next,
                ..data
            };
            write_data_block(dev, block, &linked)?;
            block = next;
            fresh = true;
        }
    }

    let mut within = (offset % BLOCK_DATA_SIZE as u64) as usize;
    let mut pos = 0;
    loop {
        let mut data = if fresh {
            DataBlock::default()
        } else {
            read_data_block(dev, block)?
        };
        let take = (buf.len() - pos).min(BLOCK_DATA_SIZE - within);
        data.data[within..within + take].copy_from_slice(&buf[pos..pos + take]);
        pos += take;
        within = 0;
        if pos == buf.len() {
            // an overwrite ending mid-chain keeps the existing link; a fresh
            // block terminates the chain
            write_data_block(dev, block, &data)?;
            return Ok(());
        }
        if data.next_block == 0 {
            let next = bitmap.allocate()?;
            allocated.push(next);
            if junction.is_none() {
                *junction = Some(block);
            }
            data.next_block = next;
            write_data_block(dev, block, &data)?;
            block = next;
            fresh = true;
        } else {
            write_data_block(dev, block, &data)?;
            block = data.next_block;
            fresh = false;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::FileEntry;
    use tempfile::NamedTempFile;

    /// A scratch image holding a single directory record (block 1) with one
    /// empty file (data block 2).
    fn scratch() -> (NamedTempFile, BlockDevice, Bitmap, DirectoryBlock, u64) {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(64 * BLOCK_SIZE as u64).unwrap();
        let mut dev = BlockDevice::open(tmp.path()).unwrap();
        let mut bitmap = Bitmap::load(&mut dev).unwrap();

        let dir_block = bitmap.allocate().unwrap();
        let file_block = bitmap.allocate().unwrap();
        let dir = DirectoryBlock {
            files: vec![FileEntry {
                name: "blob".to_owned(),
                ext: "bin".to_owned(),
                size: 0,
                start_block: file_block,
            }],
        };
        let mut raw = [0; BLOCK_SIZE];
        dir.encode(&mut raw);
        dev.write_block(dir_block, &raw).unwrap();
        write_data_block(&mut dev, file_block, &DataBlock::default()).unwrap();
        bitmap.persist(&mut dev).unwrap();
        (tmp, dev, bitmap, dir, dir_block)
    }

    #[test]
    fn roundtrip_small() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        let n = write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"hello", 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(dir.files[0].size, 5);

        let back = read(&mut dev, &dir, 0, 5, 0).unwrap();
        assert_eq!(back, b"hello");
        // over-long reads clamp to the end of the file
        let back = read(&mut dev, &dir, 0, 100, 0).unwrap();
        assert_eq!(back, b"hello");
        // reads starting at the end of the file are empty
        assert!(read(&mut dev, &dir, 0, 10, 5).unwrap().is_empty());
    }

    #[test]
    fn zero_sized_transfers() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        assert_eq!(
            write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"", 0).unwrap(),
            0
        );
        assert!(read(&mut dev, &dir, 0, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn offset_past_end() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        assert!(matches!(
            read(&mut dev, &dir, 0, 1, 1),
            Err(Error::TooLarge)
        ));
        assert!(matches!(
            write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"x", 1),
            Err(Error::TooLarge)
        ));
    }

    #[test]
    fn block_boundary() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        let free = bitmap.free_blocks();

        // exactly one block of payload allocates nothing
        let body = vec![0x5a; BLOCK_DATA_SIZE];
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &body, 0).unwrap();
        assert_eq!(bitmap.free_blocks(), free);

        // one more byte spills into a second block
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"!", BLOCK_DATA_SIZE as u64).unwrap();
        assert_eq!(bitmap.free_blocks(), free - 1);
        assert_eq!(dir.files[0].size, BLOCK_DATA_SIZE as u64 + 1);

        let back = read(&mut dev, &dir, 0, dir.files[0].size, 0).unwrap();
        assert_eq!(&back[..BLOCK_DATA_SIZE], &body[..]);
        assert_eq!(back[BLOCK_DATA_SIZE], b'!');
    }

    #[test]
    fn spanning_write() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        let free = bitmap.free_blocks();

        let body: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &body, 0).unwrap();
        // 1000 bytes need two blocks; the first was allocated at creation
        assert_eq!(bitmap.free_blocks(), free - 1);
        assert_eq!(read(&mut dev, &dir, 0, 1000, 0).unwrap(), body);
    }

    #[test]
    fn overwrite_keeps_the_tail() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        let body = vec![0x11; BLOCK_DATA_SIZE * 2];
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &body, 0).unwrap();

        // overwriting the head must not detach the second block
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"head", 0).unwrap();
        assert_eq!(dir.files[0].size, body.len() as u64);
        let back = read(&mut dev, &dir, 0, body.len() as u64, 0).unwrap();
        assert_eq!(&back[..4], b"head");
        assert_eq!(&back[4..], &body[4..]);
    }

    #[test]
    fn unaligned_overwrite() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        let mut mirror = vec![0u8; 1400];
        for (i, b) in mirror.iter_mut().enumerate() {
            *b = i as u8;
        }
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &mirror, 0).unwrap();

        let patch = [0xeeu8; 600];
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &patch, 700).unwrap();
        mirror[700..1300].copy_from_slice(&patch);

        assert_eq!(dir.files[0].size, 1400);
        assert_eq!(read(&mut dev, &dir, 0, 1400, 0).unwrap(), mirror);
    }

    #[test]
    fn exhaustion_releases_reserved_blocks() {
        let (_tmp, mut dev, mut bitmap, mut dir, dir_block) = scratch();
        // leave a single free block, then ask for a write needing two
        while bitmap.free_blocks() > 1 {
            bitmap.allocate().unwrap();
        }
        let body = vec![0; BLOCK_DATA_SIZE * 3];
        assert!(matches!(
            write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &body, 0),
            Err(Error::NoSpace)
        ));
        // the block reserved before the failure was released again
        assert_eq!(bitmap.free_blocks(), 1);
        assert_eq!(dir.files[0].size, 0);
        // and the on-disk chain was re-terminated: no link may point at a
        // released block
        let tail = read_data_block(&mut dev, dir.files[0].start_block).unwrap();
        assert_eq!(tail.next_block, 0);

        // later writes find a consistent chain and go through the allocator
        let head = vec![0x42; BLOCK_DATA_SIZE];
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, &head, 0).unwrap();
        write(&mut dev, &mut bitmap, &mut dir, dir_block, 0, b"!", BLOCK_DATA_SIZE as u64).unwrap();
        assert_eq!(bitmap.free_blocks(), 0);
        let back = read(&mut dev, &dir, 0, BLOCK_DATA_SIZE as u64 + 1, 0).unwrap();
        assert_eq!(&back[..BLOCK_DATA_SIZE], &head[..]);
        assert_eq!(back[BLOCK_DATA_SIZE], b'!');
    }
}
