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

//! Entry point of the `flatfs` tools.
//!
//! The binary is multi-call: installed (or symlinked) as `mkfs.flat` it
//! formats a disk image, as `flatsh` it opens the interactive shell. Under
//! any other name, the first argument selects the tool.

mod mkfs;
mod prompt;
mod shell;

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::exit;

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

fn main() {
    env_logger::init();
    let mut args = env::args_os();
    let bin = args
        .next()
        .map(PathBuf::from)
        .and_then(|p| {
            p.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            error("flatfs", "missing binary name");
        });
    match bin.as_str() {
        "mkfs.flat" => mkfs::main(args),
        "flatsh" => shell::main(args),
        _ => match args.next().and_then(|arg| arg.into_string().ok()).as_deref() {
            Some("mkfs") => mkfs::main(args),
            Some("shell") => shell::main(args),
            _ => error("flatfs", "usage: flatfs <mkfs | shell> [options...]"),
        },
    }
}
