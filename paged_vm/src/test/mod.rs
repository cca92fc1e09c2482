use crate::modules::sector_storage::MemSectorStorage;
use crate::noff::{NoffHeader, Segment};
use crate::{Machine, VmConfig};

mod replacement;

pub(crate) fn get_test_machine_with(config: &VmConfig) -> Machine<MemSectorStorage> {
    let _ = env_logger::builder().is_test(true).try_init();

    // data sectors, chain blocks, swap header and some slack
    let sectors = config.backing_pages + config.backing_pages / 20 + 8;
    Machine::new(MemSectorStorage::new(sectors), config).unwrap()
}

pub(crate) fn get_test_machine(backing_pages: usize) -> Machine<MemSectorStorage> {
    get_test_machine_with(&VmConfig {
        num_frames: 8,
        cache_lines: 4,
        backing_pages,
    })
}

/// Builds an executable image: header, then code bytes, then initialized
/// data, laid out back to back in the virtual address space.
pub(crate) fn build_image(code: &[u8], init_data: &[u8], uninit_size: usize) -> Vec<u8> {
    let header = NoffHeader {
        code: Segment {
            virtual_addr: 0,
            in_file_addr: NoffHeader::SIZE as u32,
            size: code.len() as u32,
        },
        init_data: Segment {
            virtual_addr: code.len() as u32,
            in_file_addr: (NoffHeader::SIZE + code.len()) as u32,
            size: init_data.len() as u32,
        },
        uninit_data: Segment {
            virtual_addr: (code.len() + init_data.len()) as u32,
            in_file_addr: 0,
            size: uninit_size as u32,
        },
    };

    let mut image = header.encode().to_vec();
    image.extend_from_slice(code);
    image.extend_from_slice(init_data);
    image
}
