use paged_vm::{
    modules::{replacement::LruReplacementModule, sector_storage::FileSectorStorage},
    AddrSpace, DemandPagingEngine, Machine, NoffHeader, Segment, VmConfig, PAGE_SIZE,
};

/// Builds a small executable image by hand: one page of "code" holding a
/// recognizable pattern, half a page of initialized data, and some
/// uninitialized data.
fn build_image() -> Vec<u8> {
    let code: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let data = vec![0x5au8; PAGE_SIZE / 2];

    let header = NoffHeader {
        code: Segment {
            virtual_addr: 0,
            in_file_addr: NoffHeader::SIZE as u32,
            size: code.len() as u32,
        },
        init_data: Segment {
            virtual_addr: code.len() as u32,
            in_file_addr: (NoffHeader::SIZE + code.len()) as u32,
            size: data.len() as u32,
        },
        uninit_data: Segment {
            virtual_addr: (code.len() + data.len()) as u32,
            in_file_addr: 0,
            size: PAGE_SIZE as u32,
        },
    };

    let mut image = header.encode().to_vec();
    image.extend_from_slice(&code);
    image.extend_from_slice(&data);
    image
}

fn main() {
    env_logger::init();

    let storage = FileSectorStorage::new("trace_example.data".to_string(), 256).unwrap();
    let config = VmConfig {
        num_frames: 4,
        cache_lines: 2,
        backing_pages: 64,
    };

    let mut machine = Machine::new(storage, &config).unwrap();
    let image = build_image();
    let space = AddrSpace::new(&image, &mut machine).unwrap();
    println!("loaded program: {} pages", space.num_pages());

    let mut engine: DemandPagingEngine<LruReplacementModule> =
        DemandPagingEngine::new(config.cache_lines);
    space.restore_state(&mut engine);

    // a little locality: sweep the code page, hammer the data page,
    // then touch every page once to churn the cache and the frames
    let mut trace: Vec<usize> = Vec::new();
    trace.extend((0..16).map(|i| i * 8));
    trace.extend([PAGE_SIZE, PAGE_SIZE + 4].repeat(8));
    trace.extend((0..space.num_pages()).map(|vpn| vpn * PAGE_SIZE));

    for vaddr in trace {
        let paddr = engine.access(&space, &mut machine, vaddr, false).unwrap();
        log::trace!("vaddr {:#06x} -> paddr {:#06x}", vaddr, paddr);
    }

    // the process exits: release its pages and report the counters
    space.save_state(&mut engine);
    space.release_pages(&mut machine);
    println!("{}", engine.stats());

    machine.destroy().unwrap();
}
