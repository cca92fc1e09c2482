mod file_storage;
mod mem_storage;

pub use file_storage::FileSectorStorage;
pub use mem_storage::MemSectorStorage;

/// Size of one storage sector in bytes. Unit of every device I/O.
pub const SECTOR_SIZE: usize = 128;

/// A synchronous sector device.
///
/// A read or write blocks the requesting execution context until the
/// underlying device completes; the device accepts one outstanding request
/// at a time, so concurrent requesters are serialized behind the
/// implementation. There is no timeout or cancellation: once issued, an
/// I/O runs to completion.
pub trait SectorStorageModule {
    /// Reads sector `sector` into `dest`.
    fn read_sector(&mut self, sector: usize, dest: &mut [u8; SECTOR_SIZE]) -> Result<(), ()>;

    /// Writes `src` to sector `sector`.
    fn write_sector(&mut self, sector: usize, src: &[u8; SECTOR_SIZE]) -> Result<(), ()>;

    /// Total number of sectors on the device.
    ///
    /// **It is illegal to access a sector at or past this bound!**
    fn num_sectors(&self) -> usize;
}
