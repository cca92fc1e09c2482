use super::{SectorStorageModule, SECTOR_SIZE};

/// Sector device held entirely in RAM. Useful for tests and demos where
/// no durability is wanted.
pub struct MemSectorStorage {
    data: Vec<u8>,
}

impl MemSectorStorage {
    pub fn new(num_sectors: usize) -> Self {
        Self {
            data: vec![0; num_sectors * SECTOR_SIZE],
        }
    }
}

impl SectorStorageModule for MemSectorStorage {
    fn read_sector(&mut self, sector: usize, dest: &mut [u8; SECTOR_SIZE]) -> Result<(), ()> {
        debug_assert!(
            sector < self.num_sectors(),
            "illegal access, sector: {}, num_sectors: {}",
            sector,
            self.num_sectors()
        );

        let offset = sector * SECTOR_SIZE;
        dest.copy_from_slice(&self.data[offset..offset + SECTOR_SIZE]);

        Ok(())
    }

    fn write_sector(&mut self, sector: usize, src: &[u8; SECTOR_SIZE]) -> Result<(), ()> {
        debug_assert!(
            sector < self.num_sectors(),
            "illegal access, sector: {}, num_sectors: {}",
            sector,
            self.num_sectors()
        );

        let offset = sector * SECTOR_SIZE;
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(src);

        Ok(())
    }

    fn num_sectors(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}
