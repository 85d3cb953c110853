//! # Chain
//!
//! Lays out a singly linked list inside a zero-filled region, one link per stride-sized slot.
//! Each link holds the address of the link built before it; the first link built points at
//! [`END`], a word outside the region holding [`END_MARK`]. The last link built is the head, so a
//! traversal walks construction order backwards and stops when it loads `END_MARK`.
//!
//! The three [`Pattern`]s differ only in which slot offsets they visit and in what order. Linking,
//! the zero check and bounds checks are shared.
use crate::lfsr::Permutation;
use std::mem::size_of;
use thiserror::Error;

/// Size of one link, in bytes.
pub const WORD: usize = size_of::<usize>();

/// Value loaded from the terminal link's target, marking the end of a lap.
pub const END_MARK: usize = usize::MAX;

/// Sentinel word the first-built link points at. Read once per lap, never written.
pub static END: usize = END_MARK;

/// Loads per unrolled group in the traversal loop. A lap is `slots` loads, so `slots` must be a
/// multiple of this or the walk would run past the sentinel.
pub const UNROLL: usize = 8;

/// Address stored in the first-built link.
#[inline]
pub fn end_addr() -> usize {
    &END as *const usize as usize
}

/// Errors raised while laying out a chain. Any of these means the slot/stride arithmetic does not
/// agree with the buffer, which is a bug in the caller rather than a user mistake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A target word was already nonzero when its link was about to be written.
    #[error("slot at byte offset {offset} already written (value {value:#x})")]
    SlotOccupied { offset: usize, value: usize },
    /// A computed link offset fell outside the buffer.
    #[error("link at byte offset {offset} is outside the {len}-byte region")]
    OutOfRegion { offset: usize, len: usize },
    /// Fewer than two slots leaves nothing to link.
    #[error("need at least 2 slots, got {slots}")]
    TooFewSlots { slots: usize },
    /// A lap must be a whole number of unrolled load groups.
    #[error("{slots} slots is not a multiple of {}", UNROLL)]
    SlotsNotUnrolled { slots: usize },
    /// Stride is zero or not word aligned.
    #[error("stride {stride} is not a nonzero multiple of {}", WORD)]
    BadStride { stride: usize },
    /// Cache line is not word aligned.
    #[error("cacheline {cacheline} is not a multiple of {}", WORD)]
    BadCacheline { cacheline: usize },
    /// The slots need more bytes than the buffer holds.
    #[error("{slots} slots of {stride} bytes don't fit in a {len}-byte region")]
    RegionTooSmall { slots: usize, stride: usize, len: usize },
    /// The random pattern needs a wider LFSR than the tap table covers.
    #[error("no LFSR taps available for {slots} slots")]
    UnsupportedWidth { slots: usize },
}

/// Access pattern used to order the links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// Slot indices in LFSR order: physically unpredictable next-address jumps.
    #[default]
    Random,
    /// One link per stride (page), each in a different cache line of its page.
    Tlb,
    /// Slot indices in natural order, the prefetch-friendly baseline.
    Sequential,
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Pattern::Random => "random",
            Pattern::Tlb => "tlb",
            Pattern::Sequential => "sequential",
        };
        f.write_str(name)
    }
}

/// Geometry of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Number of stride-sized slots in the region; `slots - 1` of them get a link.
    pub slots: usize,
    /// Distance in bytes between logical slot positions.
    pub stride: usize,
    /// Cache line size in bytes, used by [`Pattern::Tlb`] to rotate the in-page offset.
    pub cacheline: usize,
    /// Store each link in the last word of its stride region instead of the first.
    pub end_of_line: bool,
}

impl Layout {
    /// Byte offset added to every link when `end_of_line` is set.
    pub fn line_offset(&self) -> usize {
        if self.end_of_line { self.stride - WORD } else { 0 }
    }

    fn check(&self, len: usize) -> Result<(), ChainError> {
        if self.slots < 2 {
            return Err(ChainError::TooFewSlots { slots: self.slots });
        }
        if self.slots % UNROLL != 0 {
            return Err(ChainError::SlotsNotUnrolled { slots: self.slots });
        }
        if self.stride < WORD || self.stride % WORD != 0 {
            return Err(ChainError::BadStride { stride: self.stride });
        }
        if self.cacheline % WORD != 0 {
            return Err(ChainError::BadCacheline { cacheline: self.cacheline });
        }
        let too_small = ChainError::RegionTooSmall { slots: self.slots, stride: self.stride, len };
        match self.slots.checked_mul(self.stride) {
            Some(needed) if needed <= len => Ok(()),
            _ => Err(too_small),
        }
    }
}

impl Pattern {
    /// Write the chain into `words` and return it.
    ///
    /// `words` must be zero wherever a link lands; a nonzero target is reported as
    /// [`ChainError::SlotOccupied`] and the buffer is left partially written.
    pub fn build<'a>(self, words: &'a mut [usize], layout: &Layout) -> Result<Chain<'a>, ChainError> {
        let len = words.len() * WORD;
        layout.check(len)?;

        let line_offset = layout.line_offset();
        let stride = layout.stride;
        let links = layout.slots - 1;

        let head = match self {
            Pattern::Random => {
                let order = Permutation::new(layout.slots)
                    .ok_or(ChainError::UnsupportedWidth { slots: layout.slots })?;
                link(words, order.map(|idx| idx * stride + line_offset))?
            }
            Pattern::Tlb => {
                let cacheline = layout.cacheline;
                link(
                    words,
                    (0..links).map(|i| i * stride + (i * cacheline) % stride + line_offset),
                )?
            }
            Pattern::Sequential => link(words, (0..links).map(|i| i * stride + line_offset))?,
        };

        let base = words.as_ptr() as usize;
        let words: &'a [usize] = words;
        Ok(Chain { base, words, head, links, slots: layout.slots })
    }
}

/// Link the slots at `offsets` in order, each pointing at the previous one. Returns the address
/// of the last link written.
fn link(words: &mut [usize], offsets: impl Iterator<Item = usize>) -> Result<usize, ChainError> {
    let len = words.len() * WORD;
    let base = words.as_ptr() as usize;
    let mut prev = end_addr();
    for offset in offsets {
        if offset % WORD != 0 || offset + WORD > len {
            return Err(ChainError::OutOfRegion { offset, len });
        }
        let slot = &mut words[offset / WORD];
        if *slot != 0 {
            return Err(ChainError::SlotOccupied { offset, value: *slot });
        }
        *slot = prev;
        prev = base + offset;
    }
    Ok(prev)
}

/// A built chain. Borrows the region so it can't be rewritten or freed while it is walked.
#[derive(Debug)]
pub struct Chain<'a> {
    base: usize,
    words: &'a [usize],
    head: usize,
    links: usize,
    slots: usize,
}

impl Chain<'_> {
    /// Address of the first link a traversal loads.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Number of live links (`slots - 1`).
    pub fn links(&self) -> usize {
        self.links
    }

    /// Number of slots the region was divided into; also the number of loads per lap.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Byte offsets of the links in traversal order, head first.
    ///
    /// Walks the chain through the borrowed slice instead of raw pointers, stopping at the
    /// sentinel. Returns `None` if a link points outside the region or the walk doesn't end
    /// after `links` steps.
    pub fn offsets(&self) -> Option<Vec<usize>> {
        let len = self.words.len() * WORD;
        let mut out = Vec::with_capacity(self.links);
        let mut addr = self.head;
        while addr != end_addr() {
            if out.len() == self.links {
                return None;
            }
            let offset = addr.checked_sub(self.base)?;
            if offset % WORD != 0 || offset >= len {
                return None;
            }
            out.push(offset);
            addr = self.words[offset / WORD];
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn region(bytes: usize) -> Vec<usize> {
        vec![0usize; bytes / WORD]
    }

    fn layout(size: usize, stride: usize, end_of_line: bool) -> Layout {
        Layout { slots: size / stride, stride, cacheline: 128, end_of_line }
    }

    #[test]
    fn every_pattern_links_distinct_slots() {
        for pattern in [Pattern::Random, Pattern::Tlb, Pattern::Sequential] {
            for (size, stride) in [(4096, 8), (4096, 128), (65536, 512), (1 << 20, 4096)] {
                for eol in [false, true] {
                    let mut words = region(size);
                    let l = layout(size, stride, eol);
                    let chain = pattern.build(&mut words, &l).unwrap();
                    let offsets = chain.offsets().unwrap();
                    assert_eq!(offsets.len(), l.slots - 1, "{pattern} {size}/{stride}");
                    let unique: HashSet<_> = offsets.iter().collect();
                    assert_eq!(unique.len(), offsets.len(), "{pattern} {size}/{stride}");
                }
            }
        }
    }

    #[test]
    fn sequential_links_point_backwards() {
        let mut words = region(4096);
        let l = layout(4096, 512, false);
        let chain = Pattern::Sequential.build(&mut words, &l).unwrap();
        let base = chain.base;
        assert_eq!(chain.head(), base + 3072);
        assert_eq!(chain.offsets().unwrap(), vec![3072, 2560, 2048, 1536, 1024, 512, 0]);
        drop(chain);

        assert_eq!(words[0], end_addr());
        for i in 1..7 {
            assert_eq!(words[i * 512 / WORD], base + (i - 1) * 512);
        }
        // last slot is never linked
        assert_eq!(words[3584 / WORD], 0);
    }

    #[test]
    fn end_of_line_moves_links_to_last_word() {
        for pattern in [Pattern::Random, Pattern::Sequential] {
            let mut words = region(4096);
            let l = layout(4096, 128, true);
            let chain = pattern.build(&mut words, &l).unwrap();
            for offset in chain.offsets().unwrap() {
                assert_eq!(offset % 128, 128 - WORD, "{pattern} offset {offset}");
            }
            drop(chain);
            for (i, w) in words.iter().enumerate() {
                if (i * WORD) % 128 != 128 - WORD {
                    assert_eq!(*w, 0, "{pattern} wrote head word at {}", i * WORD);
                }
            }
        }
    }

    #[test]
    fn tlb_links_rotate_through_lines() {
        let (size, stride) = (1 << 20, 65536);
        let mut words = region(size);
        let l = layout(size, stride, false);
        let chain = Pattern::Tlb.build(&mut words, &l).unwrap();
        let mut offsets = chain.offsets().unwrap();
        assert_eq!(offsets.len(), 15);
        offsets.reverse();
        for (i, offset) in offsets.iter().enumerate() {
            assert_eq!(offset / stride, i);
            assert_eq!(offset % stride, (i * 128) % stride);
        }
    }

    #[test]
    fn random_head_is_last_drawn_slot() {
        let mut words = region(8192);
        let l = layout(8192, 64, false);
        let last = Permutation::new(l.slots).unwrap().last().unwrap();
        let chain = Pattern::Random.build(&mut words, &l).unwrap();
        assert_eq!(chain.offsets().unwrap()[0], last * 64);
        // index 0 is reserved and never linked
        assert!(!chain.offsets().unwrap().contains(&0));
    }

    #[test]
    fn dirty_slot_is_an_invariant_violation() {
        let mut words = region(4096);
        words[512 / WORD] = 0xdead;
        let err = Pattern::Sequential.build(&mut words, &layout(4096, 512, false)).unwrap_err();
        assert_eq!(err, ChainError::SlotOccupied { offset: 512, value: 0xdead });
    }

    #[test]
    fn building_twice_trips_the_zero_check() {
        let mut words = region(4096);
        let l = layout(4096, 256, false);
        Pattern::Random.build(&mut words, &l).unwrap();
        assert!(matches!(
            Pattern::Random.build(&mut words, &l),
            Err(ChainError::SlotOccupied { .. })
        ));
    }

    #[test]
    fn layout_larger_than_region_is_rejected() {
        let mut words = region(2048);
        let err = Pattern::Sequential.build(&mut words, &layout(4096, 512, false)).unwrap_err();
        assert_eq!(err, ChainError::RegionTooSmall { slots: 8, stride: 512, len: 2048 });

        let bad_stride = Layout { slots: 8, stride: 12, cacheline: 128, end_of_line: false };
        let err = Pattern::Sequential.build(&mut words, &bad_stride).unwrap_err();
        assert_eq!(err, ChainError::BadStride { stride: 12 });

        let huge = Layout { slots: usize::MAX - 7, stride: 8, cacheline: 128, end_of_line: false };
        let err = Pattern::Sequential.build(&mut words, &huge).unwrap_err();
        assert!(matches!(err, ChainError::RegionTooSmall { .. }));
    }

    #[test]
    fn lap_must_be_whole_unrolled_groups() {
        // 12 loads per lap would walk four loads past the sentinel
        let mut words = region(4096);
        let l = Layout { slots: 12, stride: 64, cacheline: 128, end_of_line: false };
        for pattern in [Pattern::Random, Pattern::Tlb, Pattern::Sequential] {
            let err = pattern.build(&mut words, &l).unwrap_err();
            assert_eq!(err, ChainError::SlotsNotUnrolled { slots: 12 }, "{pattern}");
        }
        assert!(words.iter().all(|&w| w == 0));

        let one = Layout { slots: 1, ..l };
        let err = Pattern::Sequential.build(&mut words, &one).unwrap_err();
        assert_eq!(err, ChainError::TooFewSlots { slots: 1 });
    }
}
