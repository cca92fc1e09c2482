/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use super::ReplacementModule;

/// Counter value a slot is reset to on use.
const LRU_MAX: u32 = 100;

/// Least-recently-used replacement over per-slot recency counters: a use
/// resets the used slot's counter to [`LRU_MAX`] and decrements every
/// other counter, floored at zero. The victim is the slot with the
/// smallest counter, ties broken by the lowest slot index. Entries never
/// move between slots.
pub struct LruReplacementModule {
    counters: Vec<u32>,
}

impl ReplacementModule for LruReplacementModule {
    fn new(capacity: usize) -> Self {
        Self {
            counters: vec![0; capacity],
        }
    }

    fn reset(&mut self) {
        self.counters.fill(0);
    }

    fn touch(&mut self, slot: usize) {
        for counter in self.counters.iter_mut() {
            *counter = counter.saturating_sub(1);
        }
        self.counters[slot] = LRU_MAX;
    }

    fn select<E>(&self, table: &[E], mut eligible: impl FnMut(&E) -> bool) -> Option<usize> {
        debug_assert_eq!(table.len(), self.counters.len());

        let mut best: Option<usize> = None;
        for (slot, entry) in table.iter().enumerate() {
            if !eligible(entry) {
                continue;
            }

            // strict comparison keeps the lowest index on ties
            match best {
                Some(b) if self.counters[slot] >= self.counters[b] => {}
                _ => best = Some(slot),
            }
        }

        best
    }

    fn make_room<E>(&mut self, _table: &mut [E], selected: usize) -> usize {
        selected
    }
}
