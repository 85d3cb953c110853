//! CPU placement for the benchmark thread.
//!
//! Pinning to the allocation CPU before the region is touched puts its pages on that CPU's
//! memory node (first-touch). Pinning again to the run CPU before the traversal picks the core
//! whose caches are measured. Failures are logged, not fatal.
use log::{info, warn};

/// Pin the calling thread to `cpu`. Returns whether the pin took effect.
pub fn pin_current(cpu: usize) -> bool {
    let visible = cpu_count();
    if visible > 0 && cpu >= visible {
        warn!("CPU {cpu} is not among the {visible} CPUs visible to this process");
    }
    let pinned = core_affinity::set_for_current(core_affinity::CoreId { id: cpu });
    if pinned {
        info!("Pinned to CPU {cpu}");
    } else {
        warn!("Couldn't pin to CPU {cpu} (NOTE: this is expected on macOS)");
    }
    pinned
}

/// Pin to `cpu` when one was requested; no-op otherwise.
pub fn pin_if_requested(cpu: Option<usize>) {
    if let Some(cpu) = cpu {
        pin_current(cpu);
    }
}

/// Raise the calling thread to maximum scheduling priority.
pub fn raise_priority() -> bool {
    let raised =
        thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_ok();
    if !raised {
        warn!("Couldn't set benchmark thread to maximum priority");
    }
    raised
}

/// Number of CPUs core_affinity can see, for validating `-a`/`-c` arguments.
pub fn cpu_count() -> usize {
    core_affinity::get_core_ids().map_or(0, |ids| ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_to_first_cpu() {
        // pinning can be refused on some hosts; it must not panic either way
        if let Some(first) = core_affinity::get_core_ids().and_then(|ids| ids.first().map(|c| c.id)) {
            let _ = pin_current(first);
        }
        pin_if_requested(None);
    }

    #[test]
    fn sees_at_least_one_cpu_on_linux() {
        if cfg!(target_os = "linux") {
            assert!(cpu_count() >= 1);
        }
    }
}
