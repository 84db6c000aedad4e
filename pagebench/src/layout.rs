use std::fmt::{self, Display, Formatter};

use libc::c_int;

use crate::error::ConfigError;

/// Flags passed to mmap. Private anonymous mapping, optionally backed by huge pages
/// of a specific size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapFlags(c_int);

impl MapFlags {
    pub(crate) const STANDARD: MapFlags = MapFlags(libc::MAP_PRIVATE | libc::MAP_ANONYMOUS);

    // the size of the huge page is encoded as log2 in the bits starting from MAP_HUGE_SHIFT.
    // hosts with several huge page sizes would otherwise pick the default one, not the minimal.
    pub(crate) fn huge(page_size: usize) -> Self {
        let log2 = page_size.trailing_zeros() as c_int;
        MapFlags(Self::STANDARD.0 | libc::MAP_HUGETLB | (log2 << libc::MAP_HUGE_SHIFT))
    }

    pub(crate) fn is_huge(&self) -> bool {
        self.0 & libc::MAP_HUGETLB != 0
    }

    pub(crate) fn bits(&self) -> c_int {
        self.0
    }
}

impl Display for MapFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_huge() {
            write!(f, "MAP_PRIVATE|MAP_ANONYMOUS|MAP_HUGETLB({:#x})", self.0)
        } else {
            write!(f, "MAP_PRIVATE|MAP_ANONYMOUS({:#x})", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageLayout {
    pub(crate) page_size: usize,
    pub(crate) flags: MapFlags,
}

impl PageLayout {
    pub(crate) fn small(page_size: usize) -> Self {
        PageLayout {
            page_size,
            flags: MapFlags::STANDARD,
        }
    }

    pub(crate) fn large(page_size: usize) -> Self {
        PageLayout {
            page_size,
            flags: MapFlags::huge(page_size),
        }
    }
}

/// Picks the page size for the mapping.
///
/// Large pages are best effort: they are used only when they were requested, the lock-memory
/// capability was granted and the host reports a non-zero large page size. Any other combination
/// silently falls back to small pages. A large page size that is not a power of two is treated
/// as unreported.
pub(crate) fn resolve(requested: bool, granted: bool, large_minimum: usize, small: usize) -> PageLayout {
    if requested && granted && large_minimum != 0 && large_minimum.is_power_of_two() {
        PageLayout::large(large_minimum)
    } else {
        PageLayout::small(small)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocationPlan {
    pub(crate) size: usize,
}

/// Rounds requested bytes up to the exact multiple of the page size.
pub(crate) fn normalize(requested: u64, page_size: usize) -> Result<AllocationPlan, ConfigError> {
    let overflow = || ConfigError::RoundingOverflow { requested, page_size };
    let bytes = usize::try_from(requested).map_err(|_| overflow())?;
    let pages = bytes.div_ceil(page_size);
    let size = pages.checked_mul(page_size).ok_or_else(overflow)?;
    Ok(AllocationPlan { size })
}
