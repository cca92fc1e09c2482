use log::debug;

use crate::backing_store::BackingStore;
use crate::bitmap::Bitmap;
use crate::modules::sector_storage::{SectorStorageModule, SECTOR_SIZE};
use crate::vm_config::VmConfig;

/// Size of one virtual page (and one physical frame) in bytes.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// One simulated machine instance: the sector device with its free map,
/// physical memory with its frame map, and the backing store.
///
/// Everything that used to be ambient global state lives here and is
/// constructed exactly once per instance.
pub struct Machine<S: SectorStorageModule> {
    /// the sector device
    pub(crate) storage: S,

    /// free map of the device's sectors
    pub(crate) sector_map: Bitmap,

    /// free map of physical frames
    pub(crate) frame_map: Bitmap,

    /// main memory, `num_frames * PAGE_SIZE` bytes
    pub(crate) memory: Vec<u8>,

    /// swap space shared by all address spaces of this machine
    pub(crate) backing: BackingStore,

    next_space_id: usize,
}

impl<S: SectorStorageModule> Machine<S> {
    /// Brings up a machine: free maps sized to the device and `config`,
    /// zeroed main memory, and a freshly created backing store file.
    pub fn new(mut storage: S, config: &VmConfig) -> Result<Self, ()> {
        let mut sector_map = Bitmap::new(storage.num_sectors());
        let backing = BackingStore::create(config.backing_pages, &mut sector_map, &mut storage)?;

        debug!(
            "machine up: {} sectors, {} frames, {} backing pages",
            storage.num_sectors(),
            config.num_frames,
            config.backing_pages
        );

        Ok(Machine {
            storage,
            sector_map,
            frame_map: Bitmap::new(config.num_frames),
            memory: vec![0; config.num_frames * PAGE_SIZE],
            backing,
            next_space_id: 0,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.memory.len() / PAGE_SIZE
    }

    /// The bytes of physical frame `frame`.
    pub fn frame(&self, frame: usize) -> &[u8] {
        &self.memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE]
    }

    pub(crate) fn next_space_id(&mut self) -> usize {
        let id = self.next_space_id;
        self.next_space_id += 1;
        id
    }

    /// Borrows the pieces the paging path mutates together: main memory,
    /// the backing store, the device and the frame map.
    pub(crate) fn split_paging(
        &mut self,
    ) -> (&mut [u8], &mut BackingStore, &mut S, &mut Bitmap) {
        (
            &mut self.memory,
            &mut self.backing,
            &mut self.storage,
            &mut self.frame_map,
        )
    }

    /// Tears the machine down, returning the backing store's sectors to
    /// the device free map.
    pub fn destroy(mut self) -> Result<(), ()> {
        self.backing
            .destroy(&mut self.sector_map, &mut self.storage)
    }
}
