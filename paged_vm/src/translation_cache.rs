use log::trace;

use crate::addr_space::PageTableEntry;
use crate::modules::replacement::ReplacementModule;

/// One translation-cache line: the hardware-visible shadow of a subset of
/// a page-table entry's fields.
#[derive(Debug, Clone, Copy)]
pub struct TlbEntry {
    pub valid: bool,
    pub virtual_page: usize,
    pub physical_frame: usize,
    pub dirty: bool,
    pub used: bool,
    pub read_only: bool,
}

impl TlbEntry {
    fn invalid() -> Self {
        TlbEntry {
            valid: false,
            virtual_page: 0,
            physical_frame: 0,
            dirty: false,
            used: false,
            read_only: false,
        }
    }
}

/// Fixed-capacity cache of virtual-to-physical translations.
///
/// The cache is never authoritative: the page table is. Lines are
/// write-back — a hit mutates only the line, and the line's `dirty` and
/// `used` bits land in the page-table entry exactly when the line is
/// flushed (eviction, frame invalidation, wholesale invalidation). All
/// of those transitions happen inside this type, so the two copies of
/// the translation cannot drift apart at some call site.
pub struct TranslationCache<R: ReplacementModule> {
    lines: Vec<TlbEntry>,
    policy: R,
}

impl<R: ReplacementModule> TranslationCache<R> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "translation cache needs at least one line");

        TranslationCache {
            lines: vec![TlbEntry::invalid(); capacity],
            policy: R::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lines.len()
    }

    /// The slot holding a valid translation for `virtual_page`, if any.
    pub fn lookup(&self, virtual_page: usize) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.valid && line.virtual_page == virtual_page)
    }

    /// Is any live line mirroring `virtual_page`?
    pub fn mirrors(&self, virtual_page: usize) -> bool {
        self.lookup(virtual_page).is_some()
    }

    /// Copy of the line in `slot`, for inspection.
    pub fn line(&self, slot: usize) -> TlbEntry {
        self.lines[slot]
    }

    /// Records a hit on `slot`: the line's `used` bit is set, `dirty` too
    /// for a write access, and the policy sees the use.
    pub fn hit(&mut self, slot: usize, write: bool) {
        let line = &mut self.lines[slot];
        debug_assert!(line.valid);

        line.used = true;
        line.dirty |= write;
        self.policy.touch(slot);
    }

    /// Installs a mapping for `page_table[virtual_page]`, which must be
    /// resident. Takes a free slot when one exists, otherwise evicts per
    /// policy, flushing the evicted line's state into the page table.
    pub fn install(
        &mut self,
        page_table: &mut [PageTableEntry],
        virtual_page: usize,
        write: bool,
    ) {
        let entry = page_table[virtual_page];
        debug_assert!(entry.resident, "installing a non-resident translation");

        let slot = match self.lines.iter().position(|line| !line.valid) {
            Some(free) => free,
            None => {
                let selected = self
                    .policy
                    .select(&self.lines, |_| true)
                    .expect("a full cache always has a victim");
                Self::flush(&self.lines[selected], page_table);
                trace!(
                    "cache line {} (vpage {}) evicted for vpage {}",
                    selected,
                    self.lines[selected].virtual_page,
                    virtual_page
                );
                self.policy.make_room(&mut self.lines, selected)
            }
        };

        self.lines[slot] = TlbEntry {
            valid: true,
            virtual_page,
            physical_frame: entry.physical_frame,
            dirty: write,
            used: true,
            read_only: entry.read_only,
        };
        self.policy.touch(slot);
    }

    /// Flushes and invalidates every line pointing at `physical_frame`.
    /// Called before a frame is reused so no stale alias survives.
    pub fn invalidate_frame(&mut self, physical_frame: usize, page_table: &mut [PageTableEntry]) {
        for line in self.lines.iter_mut() {
            if line.valid && line.physical_frame == physical_frame {
                Self::flush(line, page_table);
                line.valid = false;
                trace!("cache line for frame {} invalidated", physical_frame);
            }
        }
    }

    /// Flushes and invalidates every line; the policy history is wiped
    /// with them. Used on context switch.
    pub fn invalidate_all(&mut self, page_table: &mut [PageTableEntry]) {
        for line in self.lines.iter_mut() {
            if line.valid {
                Self::flush(line, page_table);
                line.valid = false;
            }
        }
        self.policy.reset();
    }

    /// Writes a line's accumulated state back into its page-table entry.
    fn flush(line: &TlbEntry, page_table: &mut [PageTableEntry]) {
        let entry = &mut page_table[line.virtual_page];
        debug_assert_eq!(entry.physical_frame, line.physical_frame);

        entry.dirty |= line.dirty;
        entry.used |= line.used;
    }
}
