//! Virtual to physical translation of a region, for verbose runs.
//!
//! Reads `/proc/self/pagemap`, one 64-bit entry per base page. Without `CAP_SYS_ADMIN` the kernel
//! reports the frame number as zero, in which case only presence is known.
use crate::region::{Region, page_size};
use log::info;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

const PRESENT: u64 = 1 << 63;
const PFN_MASK: u64 = (1 << 55) - 1;
const ENTRY: u64 = 8;

/// Where one page of a region lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapping {
    pub virt: usize,
    /// Physical address, `None` if the page isn't resident or the frame number is hidden.
    pub phys: Option<u64>,
}

/// Physical address for a pagemap `entry` of a page of `base_page` bytes.
pub fn decode(entry: u64, base_page: usize) -> Option<u64> {
    if entry & PRESENT == 0 {
        return None;
    }
    let pfn = entry & PFN_MASK;
    (pfn != 0).then(|| pfn * base_page as u64)
}

/// Translate every `step`-sized page of `[addr, addr + len)`.
pub fn translate(addr: usize, len: usize, step: usize) -> io::Result<Vec<PageMapping>> {
    let pagemap = File::open("/proc/self/pagemap")?;
    let base_page = page_size();
    let mut out = Vec::with_capacity(len.div_ceil(step));
    let mut buf = [0u8; ENTRY as usize];
    for virt in (addr..addr + len).step_by(step) {
        pagemap.read_exact_at(&mut buf, (virt / base_page) as u64 * ENTRY)?;
        out.push(PageMapping { virt, phys: decode(u64::from_ne_bytes(buf), base_page) });
    }
    Ok(out)
}

/// Log the physical address of every page backing `region`.
pub fn log_real_addresses(region: &Region, page: usize) -> io::Result<()> {
    for mapping in translate(region.addr(), region.size(), page)? {
        match mapping.phys {
            Some(phys) => info!("{:#018x} -> {:#018x}", mapping.virt, phys),
            None => info!("{:#018x} -> (unavailable)", mapping.virt),
        }
    }
    Ok(())
}
