//! # Region
//!
//! Page-aligned, zero-filled anonymous mappings that hold a chain. Normal regions are marked
//! `MADV_NOHUGEPAGE` so transparent huge pages don't change the page size under the TLB test;
//! huge regions are mapped from the hugetlb pool with `MAP_HUGETLB`.
use crate::chain::WORD;
use crate::error::{Error, Result};
use log::debug;
use std::fs;
use std::io;
use std::ptr::NonNull;

/// Backing page size of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageKind {
    #[default]
    Small,
    Huge,
}

impl PageKind {
    fn name(self) -> &'static str {
        match self {
            PageKind::Small => "small pages",
            PageKind::Huge => "huge pages",
        }
    }
}

/// Base page size of the host.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Default huge page size, read from `/proc/meminfo`.
pub fn huge_page_size() -> Result<usize> {
    let meminfo = fs::read_to_string("/proc/meminfo")
        .map_err(|e| Error::HugePagesUnavailable(format!("can't read /proc/meminfo: {e}")))?;
    parse_hugepagesize(&meminfo)
        .ok_or_else(|| Error::HugePagesUnavailable("no Hugepagesize in /proc/meminfo".to_string()))
}

/// `Hugepagesize:     2048 kB` in bytes.
pub fn parse_hugepagesize(meminfo: &str) -> Option<usize> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("Hugepagesize:")?;
        let kb = rest.trim().strip_suffix("kB")?.trim();
        kb.parse::<usize>().ok().filter(|kb| *kb > 0).map(|kb| kb * 1024)
    })
}

/// Page size a region of `kind` will be built from.
pub fn page_size_for(kind: PageKind) -> Result<usize> {
    match kind {
        PageKind::Small => Ok(page_size()),
        PageKind::Huge => huge_page_size(),
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// An anonymous mapping of at least `size` bytes, unmapped on drop.
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    size: usize,
    mapped: usize,
    kind: PageKind,
}

impl Region {
    /// Map a fresh zero-filled region of `size` bytes.
    pub fn allocate(size: usize, kind: PageKind) -> Result<Self> {
        let page = page_size_for(kind)?;
        let mapped = align_up(size.max(1), page);
        let alloc_err = |source: io::Error| Error::Alloc { size, kind: kind.name(), source };

        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if kind == PageKind::Huge {
            flags |= huge_flag()?;
        }

        // SAFETY: anonymous mapping at a kernel-chosen address, no existing memory is affected
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(alloc_err(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| alloc_err(io::Error::other("mmap returned null")))?;
        let region = Region { ptr, size, mapped, kind };

        if kind == PageKind::Small {
            no_huge_pages(ptr, mapped).map_err(alloc_err)?;
        }

        debug!(
            "Mapped {} region of {} at {:p}",
            kind.name(),
            crate::format_size(mapped as f32),
            ptr
        );
        Ok(region)
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes actually mapped (size rounded up to the page size).
    pub fn mapped(&self) -> usize {
        self.mapped
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Start address of the mapping.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The region as machine words, `size / WORD` of them.
    pub fn words(&self) -> &[usize] {
        // SAFETY: the mapping is page aligned, readable, at least `size` bytes long and lives as
        // long as `self`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<usize>(), self.size / WORD) }
    }

    /// Mutable word view, see [`Region::words`].
    pub fn words_mut(&mut self) -> &mut [usize] {
        // SAFETY: as in `words`, and `&mut self` guarantees exclusive access
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<usize>(), self.size / WORD)
        }
    }

    /// Zero the whole region. Touching every page also faults it in before the chain is built.
    pub fn fill_zero(&mut self) {
        self.words_mut().fill(0);
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`mapped` describe a mapping created in `allocate` and not yet unmapped
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.mapped) };
        if rc != 0 {
            log::warn!("munmap of {} bytes failed: {}", self.mapped, io::Error::last_os_error());
        }
    }
}

#[cfg(target_os = "linux")]
fn huge_flag() -> Result<libc::c_int> {
    Ok(libc::MAP_HUGETLB)
}

#[cfg(not(target_os = "linux"))]
fn huge_flag() -> Result<libc::c_int> {
    Err(Error::HugePagesUnavailable("MAP_HUGETLB is Linux only".to_string()))
}

#[cfg(target_os = "linux")]
fn no_huge_pages(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    // SAFETY: advisory call on a mapping we own
    let rc = unsafe { libc::madvise(ptr.as_ptr().cast(), len, libc::MADV_NOHUGEPAGE) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // EINVAL: kernel built without transparent huge pages, nothing to opt out of
    if err.raw_os_error() == Some(libc::EINVAL) {
        log::warn!("madvise(MADV_NOHUGEPAGE) not supported, continuing without it");
        return Ok(());
    }
    Err(err)
}

#[cfg(not(target_os = "linux"))]
fn no_huge_pages(_ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
    Ok(())
}
