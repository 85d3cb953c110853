//! # LFSR
//!
//! Maximal-length Galois linear-feedback shift register used to scatter chain slots across the
//! region. A `b`-bit register seeded with `1` walks every value in `1..2^b` exactly once before
//! repeating, and never produces `0`. Drawing from it and discarding values `>= slots` therefore
//! yields each of `1..slots` exactly once, with no bookkeeping of what was already handed out.

/// Register seed. Any nonzero value works, `1` keeps runs reproducible.
pub const SEED: u64 = 1;

/// Smallest supported register width.
pub const MIN_BITS: u32 = 2;
/// Largest supported register width (2^40 slots is far beyond any sane region).
pub const MAX_BITS: u32 = 40;

/// Feedback taps per register width, 1-indexed bit positions of a primitive polynomial
/// (Xilinx XAPP052 table). Index 0 corresponds to `MIN_BITS`.
const TAPS: [&[u32]; (MAX_BITS - MIN_BITS + 1) as usize] = [
    &[2, 1],
    &[3, 2],
    &[4, 3],
    &[5, 3],
    &[6, 5],
    &[7, 6],
    &[8, 6, 5, 4],
    &[9, 5],
    &[10, 7],
    &[11, 9],
    &[12, 6, 4, 1],
    &[13, 4, 3, 1],
    &[14, 5, 3, 1],
    &[15, 14],
    &[16, 15, 13, 4],
    &[17, 14],
    &[18, 11],
    &[19, 6, 2, 1],
    &[20, 17],
    &[21, 19],
    &[22, 21],
    &[23, 18],
    &[24, 23, 22, 17],
    &[25, 22],
    &[26, 6, 2, 1],
    &[27, 5, 2, 1],
    &[28, 25],
    &[29, 27],
    &[30, 6, 4, 1],
    &[31, 28],
    &[32, 22, 2, 1],
    &[33, 20],
    &[34, 27, 2, 1],
    &[35, 33],
    &[36, 25],
    &[37, 5, 4, 3, 2, 1],
    &[38, 6, 5, 1],
    &[39, 35],
    &[40, 38, 21, 19],
];

/// Feedback mask for a register of `bits` width, `None` if the width has no tap entry.
pub fn feedback_mask(bits: u32) -> Option<u64> {
    if !(MIN_BITS..=MAX_BITS).contains(&bits) {
        return None;
    }
    let taps = TAPS[(bits - MIN_BITS) as usize];
    Some(taps.iter().fold(0u64, |mask, tap| mask | (1 << (tap - 1))))
}

/// Smallest register width `b >= 1` such that `2^b >= slots`.
pub fn bits_for(slots: usize) -> u32 {
    let mut bits = 1;
    while (1usize << bits) < slots {
        bits += 1;
    }
    bits
}

/// Advance a `bits`-wide register by one step, `None` if the width has no tap entry.
///
/// Pure: the only state is the register value threaded by the caller.
#[inline]
pub fn next(bits: u32, state: u64) -> Option<u64> {
    feedback_mask(bits).map(|mask| step(mask, state))
}

#[inline]
fn step(mask: u64, state: u64) -> u64 {
    let lsb = state & 1;
    let shifted = state >> 1;
    if lsb == 1 { shifted ^ mask } else { shifted }
}

/// Pseudo-random ordering of the slot indices `1..slots`, produced by rejection sampling an
/// LFSR over its `2^bits` domain.
#[derive(Debug, Clone)]
pub struct Permutation {
    mask: u64,
    state: u64,
    slots: u64,
    remaining: usize,
}

impl Permutation {
    /// `None` when `slots` needs a register wider than the tap table covers.
    pub fn new(slots: usize) -> Option<Self> {
        let bits = bits_for(slots).max(MIN_BITS);
        let mask = feedback_mask(bits)?;
        Some(Permutation {
            mask,
            state: SEED,
            slots: slots as u64,
            remaining: slots.saturating_sub(1),
        })
    }
}

impl Iterator for Permutation {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            self.state = step(self.mask, self.state);
            if self.state < self.slots {
                self.remaining -= 1;
                return Some(self.state as usize);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Permutation {}
