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

//! Directory lookup over the root and directory records.

use crate::Result;
use crate::block::BlockDevice;
use crate::record::BLOCK_SIZE;
use crate::record::DirectoryBlock;
use crate::record::ROOT_BLOCK;
use crate::record::RootBlock;

/// Reads the root record from block 0.
pub fn load_root(dev: &mut BlockDevice) -> Result<RootBlock> {
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(ROOT_BLOCK, &mut buf)?;
    RootBlock::decode(&buf)
}

/// Reads the directory record stored at `block`.
pub fn load_directory(dev: &mut BlockDevice, block: u64) -> Result<DirectoryBlock> {
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    DirectoryBlock::decode(&buf)
}

/// Returns the start block of the sub-directory `name`, if present.
pub fn find_directory(root: &RootBlock, name: &str) -> Option<u64> {
    root.directories
        .iter()
        .find(|dir| dir.name == name)
        .map(|dir| dir.start_block)
}

/// Returns the slot of the file `name`.`ext` in `dir`, if present.
pub fn find_file(dir: &DirectoryBlock, name: &str, ext: &str) -> Option<usize> {
    dir.files
        .iter()
        .position(|file| file.name == name && file.ext == ext)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::DirEntry;
    use crate::record::FileEntry;

    #[test]
    fn directory_lookup() {
        let root = RootBlock {
            directories: vec![
                DirEntry {
                    name: "docs".to_owned(),
                    start_block: 3,
                },
                DirEntry {
                    name: "music".to_owned(),
                    start_block: 9,
                },
            ],
        };
        assert_eq!(find_directory(&root, "docs"), Some(3));
        assert_eq!(find_directory(&root, "music"), Some(9));
        assert_eq!(find_directory(&root, "doc"), None);
        assert_eq!(find_directory(&root, ""), None);
    }

    #[test]
    fn file_lookup() {
        let dir = DirectoryBlock {
            files: vec![
                FileEntry {
                    name: "report".to_owned(),
                    ext: "txt".to_owned(),
                    size: 10,
                    start_block: 4,
                },
                FileEntry {
                    name: "report".to_owned(),
                    ext: String::new(),
                    size: 0,
                    start_block: 5,
                },
            ],
        };
        // the extension takes part in the match
        assert_eq!(find_file(&dir, "report", "txt"), Some(0));
        assert_eq!(find_file(&dir, "report", ""), Some(1));
        assert_eq!(find_file(&dir, "report", "bin"), None);
        assert_eq!(find_file(&dir, "repo", "txt"), None);
    }
}
