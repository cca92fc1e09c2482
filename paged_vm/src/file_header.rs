use log::{debug, trace};
use static_assertions::const_assert_eq;

use crate::bitmap::Bitmap;
use crate::modules::sector_storage::{SectorStorageModule, SECTOR_SIZE};
use crate::util::ceil_div;

/// Fixed descriptor fields: byte length, sector count, type tag and three
/// timestamps. Everything else in the sector is pointer slots.
const FIXED_FIELDS_SIZE: usize = 4 + 4 + 4 + 3 * 8;

/// Number of sector-pointer slots in the descriptor and in every chain
/// block. Chosen so the descriptor image fills its sector exactly.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - FIXED_FIELDS_SIZE) / 4;

/// Data pointers per index block. The remaining slot is repurposed as the
/// pointer to the next chain block whenever more data follows.
const BLOCK_DATA_SLOTS: usize = NUM_DIRECT - 1;

const_assert_eq!(FIXED_FIELDS_SIZE + NUM_DIRECT * 4, SECTOR_SIZE);

/// On-disk descriptor of one file: maps the file's logical bytes onto a
/// chain of sectors through direct pointers plus singly-linked chain
/// blocks.
///
/// The descriptor occupies exactly one sector. It is the single source of
/// truth for where the file's bytes live; every sector reachable from it
/// is marked used in the free map.
///
/// A descriptor is initialized in two ways: for a new file through
/// [`FileHeader::allocate`], for a file already on disk through
/// [`FileHeader::fetch_from`]. Changes only hit the disk on an explicit
/// [`FileHeader::write_back`].
#[derive(Debug, Clone)]
pub struct FileHeader {
    num_bytes: u32,
    num_sectors: u32,
    file_type: [u8; 4],
    created: u64,
    accessed: u64,
    modified: u64,
    data_sectors: [u32; NUM_DIRECT],
}

/// One chain block: a sector-sized table of pointer slots, formatted like
/// the descriptor's table and linked from it (or from another chain
/// block). Decoded into an owned value, never aliased out of a raw
/// buffer.
#[derive(Debug, Clone, Copy)]
struct IndexBlock {
    slots: [u32; NUM_DIRECT],
}

impl IndexBlock {
    fn empty() -> Self {
        IndexBlock {
            slots: [0; NUM_DIRECT],
        }
    }

    fn decode(buf: &[u8; SECTOR_SIZE]) -> Self {
        let mut slots = [0u32; NUM_DIRECT];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }

        IndexBlock { slots }
    }

    fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&slot.to_le_bytes());
        }

        buf
    }

    fn read_from<S: SectorStorageModule>(sector: usize, storage: &mut S) -> Result<Self, ()> {
        let mut buf = [0u8; SECTOR_SIZE];
        storage.read_sector(sector, &mut buf)?;

        Ok(Self::decode(&buf))
    }

    fn write_to<S: SectorStorageModule>(&self, sector: usize, storage: &mut S) -> Result<(), ()> {
        storage.write_sector(sector, &self.encode())
    }
}

/// Where the index block currently under mutation lives: inline in the
/// descriptor, or out on disk as a chain block.
enum BlockHome {
    Header,
    Chain(u32),
}

fn data_sectors_for(bytes: usize) -> usize {
    ceil_div(bytes, SECTOR_SIZE)
}

/// Chain blocks needed to reference `data` data sectors.
fn chain_blocks_for(data: usize) -> usize {
    if data <= BLOCK_DATA_SLOTS {
        0
    } else {
        ceil_div(data - BLOCK_DATA_SLOTS, BLOCK_DATA_SLOTS)
    }
}

impl FileHeader {
    /// Fresh descriptor for a file that owns no sectors yet.
    pub fn new() -> Self {
        FileHeader {
            num_bytes: 0,
            num_sectors: 0,
            file_type: *b"??\0\0",
            created: 0,
            accessed: 0,
            modified: 0,
            data_sectors: [0; NUM_DIRECT],
        }
    }

    pub fn length(&self) -> usize {
        self.num_bytes as usize
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    /// Allocates sectors for a file of `size` bytes out of `free_map`.
    ///
    /// Fails without touching the free map when not enough sectors (data
    /// plus chain blocks) are clear. Each completed chain block is written
    /// to disk before the walk moves past it; the head pointers stay in
    /// the descriptor, which the caller persists with
    /// [`FileHeader::write_back`].
    pub fn allocate<S: SectorStorageModule>(
        &mut self,
        free_map: &mut Bitmap,
        storage: &mut S,
        size: usize,
    ) -> Result<(), ()> {
        debug_assert_eq!(self.num_sectors, 0, "allocate on a non-empty descriptor");

        self.grow(free_map, storage, size)?;
        self.touch_created();

        debug!(
            "allocated descriptor: {} bytes in {} sectors",
            self.num_bytes, self.num_sectors
        );
        Ok(())
    }

    /// Grows the file by `delta` bytes, appending sectors as needed.
    ///
    /// The walk finds the first index block with spare data slots, appends
    /// there and continues chaining exactly as in [`FileHeader::allocate`].
    /// Total availability is validated up front and the extension applies
    /// all-or-nothing: on failure the free map is back to its prior state
    /// and a re-walk of the old chain sees no trace of the attempt.
    pub fn extend<S: SectorStorageModule>(
        &mut self,
        free_map: &mut Bitmap,
        storage: &mut S,
        delta: usize,
    ) -> Result<(), ()> {
        self.grow(free_map, storage, self.num_bytes as usize + delta)?;
        self.touch_modified();

        Ok(())
    }

    fn grow<S: SectorStorageModule>(
        &mut self,
        free_map: &mut Bitmap,
        storage: &mut S,
        new_bytes: usize,
    ) -> Result<(), ()> {
        let old_data = self.num_sectors as usize;
        let new_data = data_sectors_for(new_bytes);

        if new_data == old_data {
            // fits into the already-allocated sectors
            self.num_bytes = new_bytes as u32;
            return Ok(());
        }

        let needed =
            (new_data - old_data) + (chain_blocks_for(new_data) - chain_blocks_for(old_data));
        if free_map.num_clear() < needed {
            debug!(
                "grow to {} sectors failed, need {} but only {} clear",
                new_data,
                needed,
                free_map.num_clear()
            );
            return Err(());
        }

        let old_header = self.data_sectors;
        let mut claimed: Vec<u32> = Vec::with_capacity(needed);

        match self.grow_chain(free_map, storage, old_data, new_data, &mut claimed) {
            Ok(()) => {
                self.num_bytes = new_bytes as u32;
                self.num_sectors = new_data as u32;
                Ok(())
            }
            Err(()) => {
                // a sector write gave out mid-walk: hand every claimed
                // sector back so the free map matches the (unchanged) old
                // chain again
                for sector in claimed {
                    free_map.clear(sector as usize);
                }
                self.data_sectors = old_header;
                Err(())
            }
        }
    }

    /// The shared allocation walk of `allocate` and `extend`. Appends
    /// `new_data - old_data` data pointers behind position `old_data`,
    /// claiming sectors from `free_map` into `claimed`.
    fn grow_chain<S: SectorStorageModule>(
        &mut self,
        free_map: &mut Bitmap,
        storage: &mut S,
        old_data: usize,
        new_data: usize,
        claimed: &mut Vec<u32>,
    ) -> Result<(), ()> {
        let mut claim = |free_map: &mut Bitmap| -> u32 {
            let sector = free_map
                .find()
                .expect("free map exhausted after availability check") as u32;
            claimed.push(sector);
            sector
        };

        // walk past the blocks the old chain already filled completely
        let mut home = BlockHome::Header;
        let mut block = IndexBlock {
            slots: self.data_sectors,
        };
        let mut skip = old_data;
        while skip > BLOCK_DATA_SLOTS {
            let next = block.slots[NUM_DIRECT - 1];
            block = IndexBlock::read_from(next as usize, storage)?;
            home = BlockHome::Chain(next);
            skip -= BLOCK_DATA_SLOTS;
        }

        // `fill` is the first spare data slot in the current block
        let mut fill = skip;
        let mut remaining = new_data - old_data;
        loop {
            while fill < BLOCK_DATA_SLOTS && remaining > 0 {
                block.slots[fill] = claim(free_map);
                fill += 1;
                remaining -= 1;
            }

            if remaining == 0 {
                break;
            }

            // block is full and data still follows: repurpose the last
            // slot as the chain pointer and move on
            let next = claim(free_map);
            block.slots[NUM_DIRECT - 1] = next;
            self.flush_block(&home, &block, storage)?;

            home = BlockHome::Chain(next);
            block = IndexBlock::empty();
            fill = 0;
        }

        self.flush_block(&home, &block, storage)
    }

    fn flush_block<S: SectorStorageModule>(
        &mut self,
        home: &BlockHome,
        block: &IndexBlock,
        storage: &mut S,
    ) -> Result<(), ()> {
        match home {
            BlockHome::Header => {
                self.data_sectors = block.slots;
                Ok(())
            }
            BlockHome::Chain(sector) => {
                trace!("writing chain block at sector {}", sector);
                block.write_to(*sector as usize, storage)
            }
        }
    }

    /// Hands every sector reachable from this descriptor back to
    /// `free_map`, chain blocks included.
    ///
    /// Freeing a sector the free map does not consider used is a
    /// consistency violation and aborts.
    pub fn deallocate<S: SectorStorageModule>(
        &mut self,
        free_map: &mut Bitmap,
        storage: &mut S,
    ) -> Result<(), ()> {
        let mut remaining = self.num_sectors as usize;
        let mut slots = self.data_sectors;

        loop {
            let here = remaining.min(BLOCK_DATA_SLOTS);
            for slot in &slots[..here] {
                free_map.clear(*slot as usize);
            }
            remaining -= here;

            if remaining == 0 {
                break;
            }

            let next = slots[NUM_DIRECT - 1] as usize;
            slots = IndexBlock::read_from(next, storage)?.slots;
            free_map.clear(next);
        }

        debug!(
            "deallocated descriptor: {} sectors returned",
            self.num_sectors
        );
        self.num_bytes = 0;
        self.num_sectors = 0;
        self.data_sectors = [0; NUM_DIRECT];

        Ok(())
    }

    /// Which sector stores the byte at `offset`?
    ///
    /// Walks the direct slots, then successive chain blocks, exactly
    /// mirroring the allocation structure. An offset past the allocated
    /// data is a programming error and aborts.
    pub fn byte_to_sector<S: SectorStorageModule>(
        &self,
        offset: usize,
        storage: &mut S,
    ) -> Result<usize, ()> {
        assert!(
            offset < self.num_bytes as usize,
            "byte_to_sector: offset {} beyond file of {} bytes",
            offset,
            self.num_bytes
        );

        let mut index = offset / SECTOR_SIZE;
        let mut remaining = self.num_sectors as usize;
        let mut slots = self.data_sectors;

        while remaining > BLOCK_DATA_SLOTS {
            if index < BLOCK_DATA_SLOTS {
                return Ok(slots[index] as usize);
            }

            slots = IndexBlock::read_from(slots[NUM_DIRECT - 1] as usize, storage)?.slots;
            index -= BLOCK_DATA_SLOTS;
            remaining -= BLOCK_DATA_SLOTS;
        }

        Ok(slots[index] as usize)
    }

    /// Every data sector of the file, in logical byte order. Chain blocks
    /// themselves are not part of the list.
    pub fn sectors<S: SectorStorageModule>(&self, storage: &mut S) -> Result<Vec<usize>, ()> {
        let mut result = Vec::with_capacity(self.num_sectors as usize);
        let mut remaining = self.num_sectors as usize;
        let mut slots = self.data_sectors;

        loop {
            let here = remaining.min(BLOCK_DATA_SLOTS);
            result.extend(slots[..here].iter().map(|s| *s as usize));
            remaining -= here;

            if remaining == 0 {
                return Ok(result);
            }

            slots = IndexBlock::read_from(slots[NUM_DIRECT - 1] as usize, storage)?.slots;
        }
    }

    /// Reads the descriptor's on-disk image from `sector`.
    pub fn fetch_from<S: SectorStorageModule>(
        sector: usize,
        storage: &mut S,
    ) -> Result<Self, ()> {
        let mut buf = [0u8; SECTOR_SIZE];
        storage.read_sector(sector, &mut buf)?;

        let word = |offset: usize| u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        let long = |offset: usize| u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());

        let mut data_sectors = [0u32; NUM_DIRECT];
        for (i, slot) in data_sectors.iter_mut().enumerate() {
            *slot = word(FIXED_FIELDS_SIZE + i * 4);
        }

        Ok(FileHeader {
            num_bytes: word(0),
            num_sectors: word(4),
            file_type: buf[8..12].try_into().unwrap(),
            created: long(12),
            accessed: long(20),
            modified: long(28),
            data_sectors,
        })
    }

    /// Writes the descriptor's one-sector image back to `sector`.
    pub fn write_back<S: SectorStorageModule>(
        &self,
        sector: usize,
        storage: &mut S,
    ) -> Result<(), ()> {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_sectors.to_le_bytes());
        buf[8..12].copy_from_slice(&self.file_type);
        buf[12..20].copy_from_slice(&self.created.to_le_bytes());
        buf[20..28].copy_from_slice(&self.accessed.to_le_bytes());
        buf[28..36].copy_from_slice(&self.modified.to_le_bytes());
        for (i, slot) in self.data_sectors.iter().enumerate() {
            let offset = FIXED_FIELDS_SIZE + i * 4;
            buf[offset..offset + 4].copy_from_slice(&slot.to_le_bytes());
        }

        storage.write_sector(sector, &buf)
    }

    /// Derives the type tag from a file name's extension.
    pub fn set_type(&mut self, name: &str) {
        let mut tag = *b"??\0\0";
        if let Some((_, extension)) = name.rsplit_once('.') {
            if !extension.is_empty() {
                for (dst, src) in tag.iter_mut().zip(extension.bytes()) {
                    *dst = src;
                }
            }
        }

        self.file_type = tag;
    }

    pub fn file_type(&self) -> &[u8; 4] {
        &self.file_type
    }

    pub fn touch_created(&mut self) {
        self.created = unix_seconds();
    }

    pub fn touch_accessed(&mut self) {
        self.accessed = unix_seconds();
    }

    pub fn touch_modified(&mut self) {
        self.modified = unix_seconds();
    }
}

fn unix_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
