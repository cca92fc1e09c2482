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

use log::{debug, trace};

use crate::bitmap::Bitmap;
use crate::file_header::FileHeader;
use crate::machine::PAGE_SIZE;
use crate::modules::sector_storage::{SectorStorageModule, SECTOR_SIZE};

/// Swap space for virtual pages: a disk file created through the indexed
/// descriptor, carved into page-sized slots handed out by a page map.
///
/// Pages are reserved eagerly at address-space creation and a slot stays
/// with its virtual page for the page's whole lifetime. A freshly
/// reserved slot is zero-filled, so the backing copy is authoritative
/// before the first write-back.
pub struct BackingStore {
    header: FileHeader,
    header_sector: usize,
    page_map: Bitmap,
}

impl BackingStore {
    /// Creates the swap file with room for `num_pages` page slots,
    /// claiming its sectors (header included) from `sector_map`.
    pub fn create<S: SectorStorageModule>(
        num_pages: usize,
        sector_map: &mut Bitmap,
        storage: &mut S,
    ) -> Result<Self, ()> {
        let header_sector = sector_map.find().ok_or(())?;

        let mut header = FileHeader::new();
        header.set_type("swap.vm");
        if header
            .allocate(sector_map, storage, num_pages * PAGE_SIZE)
            .is_err()
        {
            sector_map.clear(header_sector);
            return Err(());
        }
        header.write_back(header_sector, storage)?;

        debug!(
            "backing store created: {} pages at header sector {}",
            num_pages, header_sector
        );

        Ok(BackingStore {
            header,
            header_sector,
            page_map: Bitmap::new(num_pages),
        })
    }

    pub fn num_pages(&self) -> usize {
        self.page_map.len()
    }

    pub fn num_free_pages(&self) -> usize {
        self.page_map.num_clear()
    }

    /// Reserves the lowest free page slot and zero-fills it. `None` when
    /// the swap space is exhausted.
    pub fn allocate_page<S: SectorStorageModule>(
        &mut self,
        storage: &mut S,
    ) -> Result<Option<usize>, ()> {
        let page = match self.page_map.find() {
            Some(page) => page,
            None => return Ok(None),
        };

        self.write_page(page, &[0u8; PAGE_SIZE], storage)?;
        trace!("backing store: reserved page {}", page);

        Ok(Some(page))
    }

    /// Returns a page slot. Freeing a slot that is not reserved is a
    /// consistency violation and aborts.
    pub fn free_page(&mut self, page: usize) {
        self.page_map.clear(page);
        trace!("backing store: freed page {}", page);
    }

    /// Reads page slot `page` into `dest` (one page's worth of bytes).
    pub fn read_page<S: SectorStorageModule>(
        &mut self,
        page: usize,
        dest: &mut [u8],
        storage: &mut S,
    ) -> Result<(), ()> {
        debug_assert_eq!(dest.len(), PAGE_SIZE);

        for (i, chunk) in dest.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = self
                .header
                .byte_to_sector(page * PAGE_SIZE + i * SECTOR_SIZE, storage)?;
            let mut buf = [0u8; SECTOR_SIZE];
            storage.read_sector(sector, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        self.header.touch_accessed();

        Ok(())
    }

    /// Writes `src` (one page's worth of bytes) to page slot `page`.
    pub fn write_page<S: SectorStorageModule>(
        &mut self,
        page: usize,
        src: &[u8],
        storage: &mut S,
    ) -> Result<(), ()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);

        for (i, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = self
                .header
                .byte_to_sector(page * PAGE_SIZE + i * SECTOR_SIZE, storage)?;
            storage.write_sector(sector, chunk.try_into().unwrap())?;
        }
        self.header.touch_modified();

        Ok(())
    }

    /// Writes `bytes` into page slot `page` starting at `offset`. Sectors
    /// only partially covered are read, patched and written back.
    pub fn write_at<S: SectorStorageModule>(
        &mut self,
        page: usize,
        offset: usize,
        bytes: &[u8],
        storage: &mut S,
    ) -> Result<(), ()> {
        assert!(
            offset + bytes.len() <= PAGE_SIZE,
            "write_at: {} bytes at offset {} spill out of the page",
            bytes.len(),
            offset
        );

        let mut pos = page * PAGE_SIZE + offset;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let sector = self.header.byte_to_sector(pos, storage)?;
            let in_sector = pos % SECTOR_SIZE;
            let here = remaining.len().min(SECTOR_SIZE - in_sector);

            let mut buf = [0u8; SECTOR_SIZE];
            if here < SECTOR_SIZE {
                storage.read_sector(sector, &mut buf)?;
            }
            buf[in_sector..in_sector + here].copy_from_slice(&remaining[..here]);
            storage.write_sector(sector, &buf)?;

            remaining = &remaining[here..];
            pos += here;
        }
        self.header.touch_modified();

        Ok(())
    }

    /// Gives the swap file's sectors (header included) back to
    /// `sector_map` at machine teardown.
    pub fn destroy<S: SectorStorageModule>(
        &mut self,
        sector_map: &mut Bitmap,
        storage: &mut S,
    ) -> Result<(), ()> {
        self.header.deallocate(sector_map, storage)?;
        sector_map.clear(self.header_sector);
        debug!("backing store destroyed");

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::BackingStore;
    use crate::bitmap::Bitmap;
    use crate::machine::PAGE_SIZE;
    use crate::modules::sector_storage::MemSectorStorage;

    const TEST_SECTORS: usize = 256;

    fn setup(num_pages: usize) -> (BackingStore, Bitmap, MemSectorStorage) {
        let mut sector_map = Bitmap::new(TEST_SECTORS);
        let mut storage = MemSectorStorage::new(TEST_SECTORS);
        let backing = BackingStore::create(num_pages, &mut sector_map, &mut storage).unwrap();
        (backing, sector_map, storage)
    }

    #[test]
    fn test_allocated_pages_are_zero_filled() {
        let (mut backing, _sector_map, mut storage) = setup(4);

        // dirty a slot, free it, re-reserve it: must come back zeroed
        let page = backing.allocate_page(&mut storage).unwrap().unwrap();
        backing
            .write_page(page, &[0xab; PAGE_SIZE], &mut storage)
            .unwrap();
        backing.free_page(page);

        let page = backing.allocate_page(&mut storage).unwrap().unwrap();
        let mut buf = [0xffu8; PAGE_SIZE];
        backing.read_page(page, &mut buf, &mut storage).unwrap();
        assert_eq!(buf, [0u8; PAGE_SIZE]);
    }

    #[test]
    fn test_exhaustion_reports_none() {
        let (mut backing, _sector_map, mut storage) = setup(2);

        assert_eq!(backing.allocate_page(&mut storage).unwrap(), Some(0));
        assert_eq!(backing.allocate_page(&mut storage).unwrap(), Some(1));
        assert_eq!(backing.allocate_page(&mut storage).unwrap(), None);

        backing.free_page(0);
        assert_eq!(backing.allocate_page(&mut storage).unwrap(), Some(0));
    }

    #[test]
    fn test_write_at_patches_without_disturbing_neighbors() {
        let (mut backing, _sector_map, mut storage) = setup(2);
        let page = backing.allocate_page(&mut storage).unwrap().unwrap();

        backing
            .write_page(page, &[0x55; PAGE_SIZE], &mut storage)
            .unwrap();
        backing.write_at(page, 10, &[1, 2, 3, 4], &mut storage).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        backing.read_page(page, &mut buf, &mut storage).unwrap();
        assert_eq!(&buf[10..14], &[1, 2, 3, 4]);
        assert!(buf[..10].iter().all(|b| *b == 0x55));
        assert!(buf[14..].iter().all(|b| *b == 0x55));
    }

    #[test]
    fn test_destroy_restores_sector_map() {
        let mut sector_map = Bitmap::new(TEST_SECTORS);
        let mut storage = MemSectorStorage::new(TEST_SECTORS);
        let before = sector_map.num_clear();

        let mut backing = BackingStore::create(8, &mut sector_map, &mut storage).unwrap();
        assert!(sector_map.num_clear() < before);

        backing.destroy(&mut sector_map, &mut storage).unwrap();
        assert_eq!(sector_map.num_clear(), before);
    }

    #[test]
    #[should_panic]
    fn test_double_free_aborts() {
        let (mut backing, _sector_map, mut storage) = setup(2);
        let page = backing.allocate_page(&mut storage).unwrap().unwrap();
        backing.free_page(page);
        backing.free_page(page);
    }
}
