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

//! `flatsh` is an interactive shell over a mounted disk image.
//!
//! It drives the same operations a host filesystem-in-userspace layer would
//! dispatch, which makes it a convenient way to inspect and fill an image
//! without mounting anything.

use crate::error;
use crate::prompt::prompt;
use flatfs::FileSystem;
use std::env::ArgsOs;
use std::path::PathBuf;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the disk image.
    image_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => res.image_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" flatsh [options] <image>");
    println!();
    println!("Opens an interactive shell on the image.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
}

/// Prints help for the shell's internal commands.
fn print_cmd_help() {
    println!();
    println!("Help:");
    println!();
    println!("   ls [path]         list a directory (default: /)");
    println!("   stat <path>       print the attributes of an entry");
    println!("   mkdir <path>      create a directory under /");
    println!("   touch <path>      create an empty file");
    println!("   write <path> <text>   append text to a file");
    println!("   cat <path>        print a file's content");
    println!("   df                print free space");
    println!("   fsck              rebuild the allocation bitmap");
    println!("   help              print this menu");
    println!("   q                 quit");
    println!();
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        return;
    }
    let image_path = args.image_path.unwrap_or_else(|| {
        error("flatsh", "specify path to a disk image");
    });
    let mut fs = FileSystem::mount(&image_path).unwrap_or_else(|e| {
        error("flatsh", format_args!("{}: {e}", image_path.display()));
    });

    while let Some(line) = prompt("flatfs> ") {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        if cmd == "q" {
            break;
        }
        handle_cmd(&mut fs, cmd, arg);
    }
}

fn handle_cmd(fs: &mut FileSystem, cmd: &str, arg: &str) {
    let res = match cmd {
        "ls" => list(fs, if arg.is_empty() { "/" } else { arg }),
        "stat" => stat(fs, arg),
        "mkdir" => fs.mkdir(arg),
        "touch" => fs.mknod(arg),
        "write" => append(fs, arg),
        "cat" => cat(fs, arg),
        "df" => {
            println!("{} / {} blocks free", fs.free_blocks(), fs.data_blocks());
            Ok(())
        }
        "fsck" => fs.rebuild_bitmap(),
        "help" => {
            print_cmd_help();
            Ok(())
        }
        _ => {
            eprintln!("{cmd}: unknown command (try `help`)");
            Ok(())
        }
    };
    if let Err(e) = res {
        eprintln!("{cmd}: {e}");
    }
}

fn list(fs: &mut FileSystem, path: &str) -> flatfs::Result<()> {
    for entry in fs.readdir(path)? {
        println!("{entry}");
    }
    Ok(())
}

fn stat(fs: &mut FileSystem, path: &str) -> flatfs::Result<()> {
    let attr = fs.getattr(path)?;
    println!(
        "mode: {:o}  nlink: {}  size: {}",
        attr.mode, attr.nlink, attr.size
    );
    Ok(())
}

/// Appends `text` at the end of the file.
fn append(fs: &mut FileSystem, arg: &str) -> flatfs::Result<()> {
    let Some((path, text)) = arg.split_once(' ') else {
        eprintln!("write: usage: write <path> <text>");
        return Ok(());
    };
    let offset = fs.getattr(path)?.size;
    fs.write(path, text.as_bytes(), offset)?;
    Ok(())
}

fn cat(fs: &mut FileSystem, path: &str) -> flatfs::Result<()> {
    let size = fs.getattr(path)?.size;
    let data = fs.read(path, size, 0)?;
    println!("{}", String::from_utf8_lossy(&data));
    Ok(())
}
