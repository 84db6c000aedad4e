use std::{
    fmt::{self, Display, Formatter},
    io,
    iter::StepBy,
    ops::Range,
    ptr::{self, NonNull},
    str::FromStr,
};

use tracing::warn;

use crate::layout::MapFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum TouchMode {
    // private anonymous pages get physical backing only after a write.
    #[default]
    Write,
    // read fault on anonymous memory maps the shared zero page, so this measures
    // fault cost without committing physical memory. hugetlb mappings are backed either way.
    Read,
}

impl TouchMode {
    pub(crate) fn verb(&self) -> &'static str {
        match self {
            TouchMode::Write => "writing",
            TouchMode::Read => "reading",
        }
    }
}

impl FromStr for TouchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(TouchMode::Write),
            "read" => Ok(TouchMode::Read),
            _ => anyhow::bail!("invalid touch mode {}. expected write or read", s),
        }
    }
}

impl Display for TouchMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TouchMode::Write => write!(f, "write"),
            TouchMode::Read => write!(f, "read"),
        }
    }
}

/// Memory that can be faulted in one byte at a time.
///
/// Implementations must be safe to touch concurrently at distinct offsets.
pub(crate) trait Pages: Sync {
    fn len(&self) -> usize;

    /// Touches a byte at offset. The access must not be elided by the compiler.
    fn touch(&self, offset: usize, mode: TouchMode);
}

/// Contiguous range of a region, identified by offset from the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl Span {
    pub(crate) fn new(offset: usize, len: usize) -> Self {
        Span { offset, len }
    }

    pub(crate) fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Offsets of every stride within the span that are below the limit.
    ///
    /// The sequence is finite and can be restarted by calling this again.
    pub(crate) fn strides(&self, stride: usize, limit: usize) -> StepBy<Range<usize>> {
        let end = self.end().min(limit);
        let start = self.offset.min(end);
        (start..end).step_by(stride)
    }
}

/// Anonymous memory mapping owned by the benchmark.
#[derive(Debug)]
pub(crate) struct Region {
    base: NonNull<u8>,
    len: usize,
}

// region is never aliased outside of this type. concurrent touches land on distinct bytes.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Reserves and commits len bytes with read and write access.
    ///
    /// Zero length doesn't call mmap, it returns an empty region.
    pub(crate) fn map(len: usize, flags: MapFlags) -> io::Result<Self> {
        if len == 0 {
            return Ok(Region {
                base: NonNull::dangling(),
                len,
            });
        }
        let rst = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags.bits(),
                -1,
                0,
            )
        };
        if rst == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(rst as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Region { base, len })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Pages for Region {
    fn len(&self) -> usize {
        self.len
    }

    fn touch(&self, offset: usize, mode: TouchMode) {
        assert!(offset < self.len, "touch at {} is outside of region {}", offset, self.len);
        let ptr = unsafe { self.base.as_ptr().add(offset) };
        match mode {
            TouchMode::Write => unsafe { ptr::write_volatile(ptr, 1) },
            TouchMode::Read => {
                let _ = unsafe { ptr::read_volatile(ptr) };
            }
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        if unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) } != 0 {
            warn!("munmap region of {} bytes: {}", self.len, io::Error::last_os_error());
        }
    }
}
