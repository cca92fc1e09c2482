use core::fmt;

use log::{debug, trace};

use crate::addr_space::{AddrSpace, SpaceInner};
use crate::machine::{Machine, PAGE_SIZE};
use crate::modules::replacement::ReplacementModule;
use crate::modules::sector_storage::SectorStorageModule;
use crate::translation_cache::TranslationCache;

/// Translation-cache hit/miss counters, accumulated for the whole run
/// and reported once at process halt or exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct PagingStats {
    hits: u64,
    misses: u64,
}

impl PagingStats {
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// misses / (hits + misses); an empty run counts as one access so
    /// the ratio stays defined.
    pub fn miss_ratio(&self) -> f64 {
        let mut total = self.hits + self.misses;
        if total == 0 {
            total = 1;
        }

        self.misses as f64 / total as f64
    }
}

impl fmt::Display for PagingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total hits: {} total misses: {} miss ratio: {:.4}",
            self.hits,
            self.misses,
            self.miss_ratio()
        )
    }
}

/// Services translation-cache misses for the running address space.
///
/// Owns the translation cache and the hit/miss counters; one engine is
/// constructed per machine instance. Fault handling composes the cache,
/// the page table, the frame map and the backing store: a miss on a
/// resident page installs a mapping without disk I/O, a miss on a
/// non-resident page first brings the page into a frame (evicting a
/// resident victim when memory is exhausted). Fault service always runs
/// to completion before the faulting access resumes.
pub struct DemandPagingEngine<R: ReplacementModule> {
    cache: TranslationCache<R>,
    stats: PagingStats,
    active_space: Option<usize>,
}

impl<R: ReplacementModule> DemandPagingEngine<R> {
    pub fn new(cache_lines: usize) -> Self {
        DemandPagingEngine {
            cache: TranslationCache::new(cache_lines),
            stats: PagingStats::default(),
            active_space: None,
        }
    }

    pub fn stats(&self) -> PagingStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = PagingStats::default();
    }

    pub fn cache(&self) -> &TranslationCache<R> {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut TranslationCache<R> {
        &mut self.cache
    }

    pub(crate) fn bind(&mut self, space_id: usize) {
        self.active_space = Some(space_id);
    }

    pub(crate) fn unbind(&mut self) {
        self.active_space = None;
    }

    /// One memory access at `vaddr`: translates through the cache,
    /// servicing a miss if needed, and returns the physical address.
    ///
    /// An address with no page-table entry is a fatal translation error.
    pub fn access<S: SectorStorageModule>(
        &mut self,
        space: &AddrSpace,
        machine: &mut Machine<S>,
        vaddr: usize,
        write: bool,
    ) -> Result<usize, ()> {
        debug_assert_eq!(
            self.active_space,
            Some(space.id()),
            "access against an address space that was not restored"
        );

        let virtual_page = vaddr / PAGE_SIZE;
        assert!(
            virtual_page < space.num_pages(),
            "translation fault at {:#x}: no page-table entry reachable",
            vaddr
        );

        if let Some(slot) = self.cache.lookup(virtual_page) {
            self.stats.hits += 1;
            self.cache.hit(slot, write);
        } else {
            self.stats.misses += 1;
            self.service_miss(space, machine, virtual_page, write)?;
        }

        let frame = space.entry(virtual_page).physical_frame;
        Ok(frame * PAGE_SIZE + vaddr % PAGE_SIZE)
    }

    /// Cache miss on `virtual_page`: bring the page in if it is not
    /// resident, then install the mapping. Runs under the space's fault
    /// gate.
    fn service_miss<S: SectorStorageModule>(
        &mut self,
        space: &AddrSpace,
        machine: &mut Machine<S>,
        virtual_page: usize,
        write: bool,
    ) -> Result<(), ()> {
        let mut inner = space.lock_inner();

        trace!("cache miss on vpage {}", virtual_page);
        if !inner.page_table[virtual_page].resident {
            self.page_in(&mut inner, machine, virtual_page)?;
        }

        self.cache.install(&mut inner.page_table, virtual_page, write);
        Ok(())
    }

    /// Brings a non-resident page into physical memory: a free frame if
    /// one exists, otherwise the frame of an evicted victim; then the
    /// page's sectors are read from the backing store.
    fn page_in<S: SectorStorageModule>(
        &mut self,
        inner: &mut SpaceInner,
        machine: &mut Machine<S>,
        virtual_page: usize,
    ) -> Result<(), ()> {
        let frame = match machine.frame_map.find() {
            Some(frame) => frame,
            None => inner.evict_one_page(&mut self.cache, machine)?,
        };

        let (memory, backing, storage, _) = machine.split_paging();
        let entry = &mut inner.page_table[virtual_page];
        backing.read_page(
            entry.backing_page,
            &mut memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE],
            storage,
        )?;

        entry.physical_frame = frame;
        entry.resident = true;
        entry.dirty = false;

        debug!("paged in vpage {} -> frame {}", virtual_page, frame);
        Ok(())
    }
}
