use super::ReplacementModule;

/// First-in-first-out replacement with age implicit in slot position:
/// slot 0 is always the oldest entry, so it is always the replacement
/// target. On every replacement the surviving entries shift one position
/// down and the incoming entry takes the highest slot, which restores the
/// age order without any bookkeeping state.
pub struct FifoReplacementModule;

impl ReplacementModule for FifoReplacementModule {
    fn new(_capacity: usize) -> Self {
        Self
    }

    fn reset(&mut self) {}

    fn touch(&mut self, _slot: usize) {
        // hits don't change insertion order
    }

    fn select<E>(&self, table: &[E], mut eligible: impl FnMut(&E) -> bool) -> Option<usize> {
        // age order == slot order
        table.iter().position(|entry| eligible(entry))
    }

    fn make_room<E>(&mut self, table: &mut [E], selected: usize) -> usize {
        table[selected..].rotate_left(1);
        table.len() - 1
    }
}
