use crate::modules::replacement::{
    FifoReplacementModule, LruReplacementModule, ReplacementModule,
};
use crate::test::{build_image, get_test_machine, get_test_machine_with};
use crate::{AddrSpace, DemandPagingEngine, TranslationCache, VmConfig, PAGE_SIZE};

fn cached_pages<R: ReplacementModule>(engine: &DemandPagingEngine<R>, pages: usize) -> Vec<usize> {
    (0..pages)
        .filter(|vpn| engine.cache().mirrors(*vpn))
        .collect()
}

#[test]
fn test_fifo_evicts_the_oldest_entry() {
    let mut machine = get_test_machine(32);
    let image = build_image(&[0u8; 3 * PAGE_SIZE], &[], 0);
    let space = AddrSpace::new(&image, &mut machine).unwrap();

    // capacity 2, accesses [A, B, C]
    let mut engine: DemandPagingEngine<FifoReplacementModule> = DemandPagingEngine::new(2);
    space.restore_state(&mut engine);
    for vpn in [0, 1, 2] {
        engine
            .access(&space, &mut machine, vpn * PAGE_SIZE, false)
            .unwrap();
    }

    // A was evicted on C's insertion, the cache holds {B, C}
    assert_eq!(cached_pages(&engine, space.num_pages()), vec![1, 2]);

    // slot 0 is the oldest again: B sits there, C in the highest slot
    assert_eq!(engine.cache().line(0).virtual_page, 1);
    assert_eq!(engine.cache().line(1).virtual_page, 2);
}

#[test]
fn test_lru_keeps_the_recently_used_entry() {
    let mut machine = get_test_machine(32);
    let image = build_image(&[0u8; 3 * PAGE_SIZE], &[], 0);
    let space = AddrSpace::new(&image, &mut machine).unwrap();

    // capacity 2, accesses [A, B, A, C]
    let mut engine: DemandPagingEngine<LruReplacementModule> = DemandPagingEngine::new(2);
    space.restore_state(&mut engine);
    for vpn in [0, 1, 0, 2] {
        engine
            .access(&space, &mut machine, vpn * PAGE_SIZE, false)
            .unwrap();
    }

    // A's third access refreshed its counter, so B was the victim
    assert_eq!(cached_pages(&engine, space.num_pages()), vec![0, 2]);
}

#[test]
fn test_frame_eviction_skips_pages_with_live_cache_lines() {
    // four frames, two cache lines: when the fifth page faults, the two
    // cached pages are ineligible and the lowest uncached page goes
    let mut machine = get_test_machine_with(&VmConfig {
        num_frames: 4,
        cache_lines: 2,
        backing_pages: 32,
    });
    let image = build_image(&[0u8; 5 * PAGE_SIZE], &[], 0);
    let space = AddrSpace::new(&image, &mut machine).unwrap();

    let mut engine: DemandPagingEngine<FifoReplacementModule> = DemandPagingEngine::new(2);
    space.restore_state(&mut engine);
    for vpn in [0, 1, 2, 3] {
        engine
            .access(&space, &mut machine, vpn * PAGE_SIZE, false)
            .unwrap();
    }

    // pages 2 and 3 are mirrored right now; record every mirrored frame
    let mirrored_frames: Vec<usize> = (0..4)
        .filter(|vpn| engine.cache().mirrors(*vpn))
        .map(|vpn| space.entry(vpn).physical_frame)
        .collect();
    assert_eq!(mirrored_frames.len(), 2);
    let frame_of_page0 = space.entry(0).physical_frame;

    engine
        .access(&space, &mut machine, 4 * PAGE_SIZE, false)
        .unwrap();

    // the victim was page 0, not one of the mirrored pages
    assert!(!space.entry(0).resident);
    let new_frame = space.entry(4).physical_frame;
    assert_eq!(new_frame, frame_of_page0);
    assert!(!mirrored_frames.contains(&new_frame));
    for vpn in [1, 2, 3] {
        assert!(space.entry(vpn).resident);
    }
}

#[test]
fn test_direct_eviction_returns_lowest_resident_frame() {
    let mut machine = get_test_machine(32);
    let image = build_image(&[0u8; 3 * PAGE_SIZE], &[], 0);
    let space = AddrSpace::new(&image, &mut machine).unwrap();

    let mut engine: DemandPagingEngine<FifoReplacementModule> = DemandPagingEngine::new(4);
    space.restore_state(&mut engine);
    for vpn in [0, 1, 2] {
        engine
            .access(&space, &mut machine, vpn * PAGE_SIZE, false)
            .unwrap();
    }

    let expected = space.entry(0).physical_frame;

    // with an empty standalone cache nothing is mirrored, so the scan
    // picks virtual page 0
    let mut cache: TranslationCache<FifoReplacementModule> = TranslationCache::new(2);
    let frame = space.evict_one_page(&mut cache, &mut machine).unwrap();
    assert_eq!(frame, expected);
    assert!(!space.entry(0).resident);

    // ownership of the frame moved to the caller: the frame map still
    // considers it used
    assert!(machine.frame_map.test(frame));
}

#[test]
#[should_panic(expected = "no victim available")]
fn test_eviction_with_nothing_resident_aborts() {
    let mut machine = get_test_machine(32);
    let image = build_image(&[0u8; 2 * PAGE_SIZE], &[], 0);
    let space = AddrSpace::new(&image, &mut machine).unwrap();

    let mut cache: TranslationCache<FifoReplacementModule> = TranslationCache::new(2);
    let _ = space.evict_one_page(&mut cache, &mut machine);
}
