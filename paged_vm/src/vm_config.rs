/// Geometry of one simulated machine instance.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Physical frames of main memory.
    pub num_frames: usize,

    /// Capacity of the translation cache.
    pub cache_lines: usize,

    /// Page slots reserved in the backing store; bounds the total virtual
    /// pages of all live address spaces.
    pub backing_pages: usize,
}
