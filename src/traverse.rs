//! # Traverse
//!
//! Timed pointer chase over a built [`Chain`]. Laps (full head-to-sentinel walks) repeat until a
//! deadline fires. The deadline only sets a flag, and the flag is checked between laps, so the
//! measured window always covers a whole number of laps and can overrun the requested duration
//! by up to one lap.
use crate::chain::{Chain, END_MARK};
use crate::clock;
use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, warn};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Below this wall-clock time the result is mostly timer resolution.
pub const MIN_RELIABLE: Duration = Duration::from_micros(100);

/// Whether a run of `elapsed` wall time is too short to trust.
pub fn too_short(elapsed: Duration) -> bool {
    elapsed < MIN_RELIABLE
}

/// Raw counts from one timed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMeasurement {
    /// Wall-clock nanoseconds between the start and end timestamps.
    pub elapsed_ns: u64,
    /// Cycle-counter ticks over the same window.
    pub elapsed_ticks: u64,
    /// Completed laps, always at least one.
    pub laps: u64,
}

/// Timer that raises a flag once `duration` has passed, unless dropped first.
///
/// The timer thread does nothing after waking except a single atomic store.
pub struct Deadline {
    cancel: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Deadline {
    /// Start the timer. `flag` is set to `true` when it fires.
    pub fn arm(duration: Duration, flag: Arc<AtomicBool>) -> Result<Self, std::io::Error> {
        // Nothing is ever sent; dropping `cancel` disconnects and wakes the timer
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("deadline".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(duration) {
                    flag.store(true, Ordering::Relaxed);
                }
            })?;
        Ok(Deadline { cancel: Some(cancel), handle: Some(handle) })
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Deadline timer thread panicked");
            }
        }
    }
}

/// Runs timed traversals. Owns the stop flag shared with its [`Deadline`].
#[derive(Debug, Default)]
pub struct Traversal {
    finished: Arc<AtomicBool>,
}

impl Traversal {
    pub fn new() -> Self {
        Traversal { finished: Arc::new(AtomicBool::new(false)) }
    }

    /// Walk `chain` repeatedly for at least `duration`, then report what was counted.
    pub fn run(&self, chain: &Chain<'_>, duration: Duration) -> Result<RawMeasurement, std::io::Error> {
        self.finished.store(false, Ordering::Relaxed);
        let deadline = Deadline::arm(duration, Arc::clone(&self.finished))?;

        let before = Instant::now();
        let before_ticks = clock::cycles();

        // SAFETY: `chain` borrows the region for the whole call, every link holds the address of
        // another link or of the sentinel, and `Pattern::build` only accepts slot counts that are a
        // multiple of `UNROLL`, so the sentinel value is loaded at the end of a full group.
        let laps = unsafe { chase(chain.head(), &self.finished) };

        let elapsed_ticks = clock::cycles().wrapping_sub(before_ticks);
        let elapsed = before.elapsed();
        drop(deadline);

        if too_short(elapsed) {
            warn!(
                "Test ran for only {} us, measurement is dominated by timer resolution",
                elapsed.as_micros()
            );
        }
        debug!(
            "{laps} laps over {} slots in {:.3} s ({elapsed_ticks} ticks)",
            chain.slots(),
            elapsed.as_secs_f64()
        );

        Ok(RawMeasurement {
            elapsed_ns: elapsed.as_nanos() as u64,
            elapsed_ticks,
            laps,
        })
    }
}

/// Pointer chase until `finished` is observed between laps. Returns the number of laps.
///
/// # Safety
/// `head` must be the address of a link in a chain of `8 * n` loads ending at the sentinel, and
/// the memory it reaches must stay valid and unmodified for the duration of the call.
#[inline(never)]
unsafe fn chase(head: usize, finished: &AtomicBool) -> u64 {
    let mut laps = 0u64;
    loop {
        let mut p = head;
        loop {
            // Unroll 8x so loop overhead stays small next to load latency
            unsafe {
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
                p = *(p as *const usize);
            }
            if p == END_MARK {
                break;
            }
        }
        // Prevent dead code elimination of the chase
        black_box(p);
        laps += 1;

        if finished.load(Ordering::Relaxed) {
            return laps;
        }
    }
}
