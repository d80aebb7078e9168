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

//! The `mkfs.flat` tool creates a flat filesystem on a disk image.
//!
//! The image file is created (or re-sized) and zero-filled, an empty root
//! record is written to block 0 and the allocation bitmap, with its reserved
//! bits set, to the trailing blocks.

use crate::error;
use crate::prompt::prompt;
use flatfs::bitmap::Bitmap;
use flatfs::bitmap::bitmap_blocks;
use flatfs::block::BlockDevice;
use flatfs::record::BLOCK_SIZE;
use flatfs::record::ROOT_BLOCK;
use flatfs::record::RootBlock;
use std::env::ArgsOs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::process::exit;

/// The default image size in bytes.
const DEFAULT_IMAGE_LEN: u64 = 5 * 1024 * 1024;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The image size in bytes.
    len: Option<u64>,
    /// The path to the image file to create.
    image_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    let mut iter = args;
    while let Some(arg) = iter.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-s" | "--size") => {
                let len = iter
                    .next()
                    .and_then(|s| s.to_str().and_then(|s| s.parse::<u64>().ok()))
                    .unwrap_or_else(|| {
                        error("mkfs.flat", "`-s` expects a size in bytes");
                    });
                res.len = Some(len);
            }
            _ => res.image_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mkfs.flat [options] <image>");
    println!();
    println!("Creates a flat filesystem on the image file, creating it if necessary.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -s, --size <bytes>\tSize of the image (default: 5 MiB).");
}

/// Tells whether the image already carries a formatted filesystem.
///
/// The heuristic is the persisted bitmap: a formatted image has the root
/// block's bit set in the trailing map. Best-effort only: a file with
/// pre-existing content can spuriously match.
fn is_present(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 || len % BLOCK_SIZE as u64 != 0 {
        return Ok(false);
    }
    let block_count = len / BLOCK_SIZE as u64;
    let map_blocks = bitmap_blocks(block_count);
    if block_count <= map_blocks + 1 {
        return Ok(false);
    }
    let mut first = [0u8; 1];
    file.seek(SeekFrom::Start((block_count - map_blocks) * BLOCK_SIZE as u64))?;
    file.read_exact(&mut first)?;
    Ok(first[0] & 1 != 0)
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let image_path = args.image_path.unwrap_or_else(|| {
        error("mkfs.flat", "specify path to a disk image");
    });
    let len = args.len.unwrap_or(DEFAULT_IMAGE_LEN);
    let block_count = len / BLOCK_SIZE as u64;
    if len % BLOCK_SIZE as u64 != 0 || block_count <= bitmap_blocks(block_count) + 1 {
        error(
            "mkfs.flat",
            format_args!("invalid image size `{len}`: expected a multiple of {BLOCK_SIZE} with room for the root, the bitmap and data"),
        );
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&image_path)
        .unwrap_or_else(|e| {
            error("mkfs.flat", format_args!("{}: {e}", image_path.display()));
        });

    let present = is_present(&mut file).unwrap_or_else(|e| {
        error("mkfs.flat", format_args!("{}: {e}", image_path.display()));
    });
    if present {
        println!("{} already contains a flat filesystem", image_path.display());
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    // zero-fill by truncating, then extending
    let res = file.set_len(0).and_then(|_| file.set_len(len));
    res.unwrap_or_else(|e| {
        error("mkfs.flat", format_args!("{}: {e}", image_path.display()));
    });
    drop(file);

    create(&image_path, block_count).unwrap_or_else(|e| {
        error(
            "mkfs.flat",
            format_args!("failed to create filesystem: {e}"),
        );
    });
    println!(
        "created flat filesystem on {}: {} blocks, {} usable",
        image_path.display(),
        block_count,
        block_count - bitmap_blocks(block_count) - 1
    );
}

/// Writes the empty root record and the fresh bitmap to the zeroed image.
fn create(image_path: &Path, block_count: u64) -> flatfs::Result<()> {
    let mut dev = BlockDevice::open(image_path)?;
    let mut raw = [0; BLOCK_SIZE];
    RootBlock::default().encode(&mut raw);
    dev.write_block(ROOT_BLOCK, &raw)?;
    Bitmap::new(block_count).persist(&mut dev)?;
    dev.flush()
}
