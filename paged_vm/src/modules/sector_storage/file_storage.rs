/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    fs::{remove_file, File},
    io::{Read, Seek, Write},
    mem::ManuallyDrop,
    path::Path,
};

use super::{SectorStorageModule, SECTOR_SIZE};

/// Sector device backed by a plain file.
pub struct FileSectorStorage {
    /// underlying file holding the raw sectors
    file: ManuallyDrop<File>,

    /// path of file, save for deleting file later
    file_path: String,

    /// cached sector count, so no `metadata` call necessary
    num_sectors: usize,
}

impl FileSectorStorage {
    /// Creates a new device with `num_sectors` zeroed sectors.
    pub fn new(filepath: String, num_sectors: usize) -> std::io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(filepath.clone())?;

        file.set_len((num_sectors * SECTOR_SIZE) as u64)?;

        Ok(Self {
            file: ManuallyDrop::new(file),
            file_path: filepath,
            num_sectors,
        })
    }
}

impl SectorStorageModule for FileSectorStorage {
    fn read_sector(&mut self, sector: usize, dest: &mut [u8; SECTOR_SIZE]) -> Result<(), ()> {
        debug_assert!(
            sector < self.num_sectors,
            "illegal access, sector: {}, num_sectors: {}",
            sector,
            self.num_sectors
        );

        self.file
            .seek(std::io::SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .map_err(|_| ())?;
        self.file.read_exact(dest).map_err(|_| ())?;

        Ok(())
    }

    fn write_sector(&mut self, sector: usize, src: &[u8; SECTOR_SIZE]) -> Result<(), ()> {
        debug_assert!(
            sector < self.num_sectors,
            "illegal access, sector: {}, num_sectors: {}",
            sector,
            self.num_sectors
        );

        self.file
            .seek(std::io::SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .map_err(|_| ())?;
        self.file.write_all(src).map_err(|_| ())?;

        Ok(())
    }

    fn num_sectors(&self) -> usize {
        self.num_sectors
    }
}

impl Drop for FileSectorStorage {
    fn drop(&mut self) {
        // drop and close file before removing
        // note that after this call, file should never be accessed again...
        unsafe {
            ManuallyDrop::drop(&mut self.file);
        }

        if Path::new(self.file_path.as_str()).exists() {
            let _ = remove_file(self.file_path.as_str());
        }
    }
}
