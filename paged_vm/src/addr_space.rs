use log::{debug, trace};
use try_lock::{Locked, TryLock};

use crate::machine::{Machine, PAGE_SIZE};
use crate::modules::replacement::{ReplacementModule, ScanReplacementModule};
use crate::modules::sector_storage::SectorStorageModule;
use crate::noff::{NoffHeader, Segment};
use crate::paging_engine::DemandPagingEngine;
use crate::translation_cache::TranslationCache;
use crate::util::ceil_div;

/// Bytes reserved for the user stack at the top of every address space.
pub const USER_STACK_SIZE: usize = 1024;

/// One virtual page's entry in the page table.
///
/// A page is either resident (the frame is valid, the backing copy may be
/// stale) or not (only the backing copy is authoritative). The backing
/// page is assigned once, at address-space creation, and never changes.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    pub virtual_page: usize,
    pub physical_frame: usize,
    pub backing_page: usize,
    pub resident: bool,
    pub dirty: bool,
    pub used: bool,
    pub read_only: bool,
}

/// The page table and its frame-eviction policy, behind the fault gate.
pub(crate) struct SpaceInner {
    pub(crate) page_table: Vec<PageTableEntry>,
    frame_policy: ScanReplacementModule,
}

/// The address space of one user program.
///
/// Built from an executable image: every virtual page eagerly gets a
/// zero-filled backing-store slot, code and initialized data are copied
/// into the backing store (never into physical memory), and residency is
/// deferred entirely to first access.
pub struct AddrSpace {
    id: usize,
    num_pages: usize,

    /// Fault-service gate: at most one execution context services a
    /// fault (or otherwise mutates the page table) at a time. Re-entry
    /// is a programming error, detected rather than raced.
    pub(crate) inner: TryLock<SpaceInner>,
}

impl AddrSpace {
    /// Loads a user program. The image's header describes the code,
    /// initialized-data and uninitialized-data segments; a bad magic
    /// aborts.
    pub fn new<S: SectorStorageModule>(
        image: &[u8],
        machine: &mut Machine<S>,
    ) -> Result<Self, ()> {
        let header = NoffHeader::parse(image);
        let size = header.memory_size() + USER_STACK_SIZE;
        let num_pages = ceil_div(size, PAGE_SIZE);

        debug!(
            "initializing address space, num pages {}, size {}",
            num_pages, size
        );

        let mut page_table = Vec::with_capacity(num_pages);
        for virtual_page in 0..num_pages {
            let backing_page = machine
                .backing
                .allocate_page(&mut machine.storage)?
                .expect("backing store exhausted while reserving pages");

            page_table.push(PageTableEntry {
                virtual_page,
                physical_frame: 0,
                backing_page,
                resident: false,
                dirty: false,
                used: false,
                read_only: false,
            });
        }

        let inner = SpaceInner {
            page_table,
            frame_policy: ScanReplacementModule::new(num_pages),
        };

        inner.load_segment(&header.code, image, machine)?;
        inner.load_segment(&header.init_data, image, machine)?;

        Ok(AddrSpace {
            id: machine.next_space_id(),
            num_pages,
            inner: TryLock::new(inner),
        })
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Copy of the page-table entry for `virtual_page`.
    pub fn entry(&self, virtual_page: usize) -> PageTableEntry {
        self.lock_inner().page_table[virtual_page]
    }

    /// Releases every page's storage at process exit: the physical frame
    /// when resident, the backing page when not.
    pub fn release_pages<S: SectorStorageModule>(&self, machine: &mut Machine<S>) {
        self.lock_inner().release_pages(machine);
    }

    /// Evicts one resident page — lowest virtual page first, skipping
    /// pages with a live cache line — and returns its frame, which stays
    /// marked used: ownership transfers to the caller. Aborts when no
    /// victim exists.
    pub fn evict_one_page<R: ReplacementModule, S: SectorStorageModule>(
        &self,
        cache: &mut TranslationCache<R>,
        machine: &mut Machine<S>,
    ) -> Result<usize, ()> {
        self.lock_inner().evict_one_page(cache, machine)
    }

    /// Writes back every dirty resident page and marks the whole space
    /// non-resident; a save point for the space as a whole.
    pub fn evict_all<R: ReplacementModule, S: SectorStorageModule>(
        &self,
        engine: &mut DemandPagingEngine<R>,
        machine: &mut Machine<S>,
    ) -> Result<(), ()> {
        self.lock_inner()
            .evict_all(engine.cache_mut(), machine)
    }

    /// On context switch out: every cache line caches translations of a
    /// space that is no longer running, so flush and invalidate them all.
    pub fn save_state<R: ReplacementModule>(&self, engine: &mut DemandPagingEngine<R>) {
        let mut inner = self.lock_inner();
        engine.cache_mut().invalidate_all(&mut inner.page_table);
        engine.unbind();
    }

    /// On context switch in: this space's page table becomes the
    /// authoritative one for subsequent accesses.
    pub fn restore_state<R: ReplacementModule>(&self, engine: &mut DemandPagingEngine<R>) {
        engine.bind(self.id);
    }

    pub(crate) fn lock_inner(&self) -> Locked<'_, SpaceInner> {
        self.inner
            .try_lock()
            .expect("address space is busy servicing a fault")
    }
}

impl SpaceInner {
    /// Copies one segment of the executable into the backing store.
    fn load_segment<S: SectorStorageModule>(
        &self,
        segment: &Segment,
        image: &[u8],
        machine: &mut Machine<S>,
    ) -> Result<(), ()> {
        if segment.size == 0 {
            return Ok(());
        }

        debug!(
            "initializing segment at {:#x}, size {}",
            segment.virtual_addr, segment.size
        );

        let mut vaddr = segment.virtual_addr as usize;
        let mut bytes = &image[segment.in_file_addr as usize..][..segment.size as usize];
        while !bytes.is_empty() {
            let virtual_page = vaddr / PAGE_SIZE;
            let offset = vaddr % PAGE_SIZE;
            let here = bytes.len().min(PAGE_SIZE - offset);

            machine.backing.write_at(
                self.page_table[virtual_page].backing_page,
                offset,
                &bytes[..here],
                &mut machine.storage,
            )?;

            bytes = &bytes[here..];
            vaddr += here;
        }

        Ok(())
    }

    pub(crate) fn release_pages<S: SectorStorageModule>(&mut self, machine: &mut Machine<S>) {
        for entry in self.page_table.iter_mut() {
            if entry.resident {
                machine.frame_map.clear(entry.physical_frame);
                entry.resident = false;
                debug!(
                    "released frame {} of vpage {}",
                    entry.physical_frame, entry.virtual_page
                );
            } else {
                machine.backing.free_page(entry.backing_page);
                debug!(
                    "released backing page {} of vpage {}",
                    entry.backing_page, entry.virtual_page
                );
            }
        }
    }

    /// Picks a resident victim in ascending virtual-page order, skipping
    /// pages mirrored by a live cache line, writes it back if dirty and
    /// returns its frame.
    ///
    /// The frame's bit in the frame map stays set: ownership transfers to
    /// the caller, which installs the faulting page into it. Calling this
    /// with no victim available is a caller-side invariant violation and
    /// aborts.
    pub(crate) fn evict_one_page<R: ReplacementModule, S: SectorStorageModule>(
        &mut self,
        cache: &mut TranslationCache<R>,
        machine: &mut Machine<S>,
    ) -> Result<usize, ()> {
        let victim = self
            .frame_policy
            .select(&self.page_table, |entry| {
                entry.resident && !cache.mirrors(entry.virtual_page)
            })
            .expect("frame eviction requested but no victim available");

        // no stale alias of the reclaimed frame may survive into its next life
        let frame = self.page_table[victim].physical_frame;
        cache.invalidate_frame(frame, &mut self.page_table);

        let entry = &mut self.page_table[victim];
        entry.resident = false;

        if entry.dirty {
            entry.dirty = false;
            trace!(
                "evicting dirty vpage {} to backing page {}",
                entry.virtual_page,
                entry.backing_page
            );

            let backing_page = entry.backing_page;
            let (memory, backing, storage, _) = machine.split_paging();
            backing.write_page(
                backing_page,
                &memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE],
                storage,
            )?;
        } else {
            trace!("evicting clean vpage {}", entry.virtual_page);
        }

        Ok(frame)
    }

    pub(crate) fn evict_all<R: ReplacementModule, S: SectorStorageModule>(
        &mut self,
        cache: &mut TranslationCache<R>,
        machine: &mut Machine<S>,
    ) -> Result<(), ()> {
        // cached dirty bits have to land in the page table before the
        // write-back below decides what is dirty
        cache.invalidate_all(&mut self.page_table);

        let (memory, backing, storage, frame_map) = machine.split_paging();

        for entry in self.page_table.iter_mut() {
            if !entry.resident {
                continue;
            }

            if entry.dirty {
                entry.dirty = false;
                backing.write_page(
                    entry.backing_page,
                    &memory[entry.physical_frame * PAGE_SIZE..][..PAGE_SIZE],
                    storage,
                )?;
            }

            entry.resident = false;
            frame_map.clear(entry.physical_frame);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::machine::PAGE_SIZE;
    use crate::test::{build_image, get_test_machine};
    use crate::addr_space::{AddrSpace, USER_STACK_SIZE};
    use crate::util::ceil_div;

    #[test]
    fn test_image_lands_in_backing_store_not_memory() {
        let mut machine = get_test_machine(64);
        let code: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let data = [0xd7u8; 100];
        let image = build_image(&code, &data, 50);

        let space = AddrSpace::new(&image, &mut machine).unwrap();
        assert_eq!(
            space.num_pages(),
            ceil_div(300 + 100 + 50 + USER_STACK_SIZE, PAGE_SIZE)
        );

        // nothing resident, physical memory untouched
        for vpn in 0..space.num_pages() {
            assert!(!space.entry(vpn).resident);
        }
        assert!(machine.memory.iter().all(|b| *b == 0));

        // the backing store holds code then data, zeros elsewhere
        let mut loaded = Vec::new();
        let mut buf = [0u8; PAGE_SIZE];
        for vpn in 0..space.num_pages() {
            let backing_page = space.entry(vpn).backing_page;
            machine
                .backing
                .read_page(backing_page, &mut buf, &mut machine.storage)
                .unwrap();
            loaded.extend_from_slice(&buf);
        }
        assert_eq!(&loaded[..300], &code[..]);
        assert_eq!(&loaded[300..400], &data[..]);
        assert!(loaded[400..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_release_pages_frees_backing_slots() {
        let mut machine = get_test_machine(64);
        let image = build_image(&[1, 2, 3], &[], 0);

        let free_before = machine.backing.num_free_pages();
        let space = AddrSpace::new(&image, &mut machine).unwrap();
        assert!(machine.backing.num_free_pages() < free_before);

        space.release_pages(&mut machine);
        assert_eq!(machine.backing.num_free_pages(), free_before);
    }

    #[test]
    fn test_each_page_gets_its_own_backing_slot() {
        let mut machine = get_test_machine(64);
        let image = build_image(&[0u8; 1000], &[0u8; 500], 200);
        let space = AddrSpace::new(&image, &mut machine).unwrap();

        let mut slots: Vec<usize> =
            (0..space.num_pages()).map(|vpn| space.entry(vpn).backing_page).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), space.num_pages());
    }
}
