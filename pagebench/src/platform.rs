use std::{fs, io, path::Path};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::{
    layout::MapFlags,
    region::{Pages, Region},
    registrar::{BufferRegistrar, IoUring},
};

const HUGEPAGES_DIR: &str = "/sys/kernel/mm/hugepages";
const MEMINFO: &str = "/proc/meminfo";

/// Operating system capabilities used by the benchmark.
///
/// Passed explicitly into the benchmark so that the flow can be exercised without
/// privileges or huge pages on the host.
pub(crate) trait Platform {
    type Region: Pages;
    type Registrar: BufferRegistrar<Region = Self::Region>;

    fn small_page_size(&self) -> usize;

    /// Asks for the capability to lock memory. Errors when it is denied.
    fn escalate_privilege(&self) -> Result<()>;

    /// Smallest large page size supported by the host, zero if there is none.
    fn large_page_minimum(&self) -> usize;

    fn provision(&self, size: usize, flags: MapFlags) -> io::Result<Self::Region>;

    fn buffer_registrar(&self) -> Result<Self::Registrar>;
}

#[derive(Debug)]
pub(crate) struct Linux {
    page_size: usize,
}

impl Linux {
    pub(crate) fn new() -> Result<Self> {
        Ok(Linux {
            page_size: page_size()?,
        })
    }
}

impl Platform for Linux {
    type Region = Region;
    type Registrar = IoUring;

    fn small_page_size(&self) -> usize {
        self.page_size
    }

    fn escalate_privilege(&self) -> Result<()> {
        raise_memlock_rlimit()
    }

    fn large_page_minimum(&self) -> usize {
        let dir = Path::new(HUGEPAGES_DIR);
        match hugepages_minimum(dir) {
            Ok(Some(size)) => {
                match hugepages_pool(dir, size) {
                    Ok(pool) => debug!(
                        "{} byte huge pages: {} reserved, {} free",
                        size, pool.reserved, pool.free
                    ),
                    Err(err) => debug!("huge page pool of {} byte pages: {:#}", size, err),
                }
                return size;
            }
            Ok(None) => debug!("no huge page sizes in {}", HUGEPAGES_DIR),
            Err(err) => debug!("scan {}: {:#}", HUGEPAGES_DIR, err),
        }
        match fs::read_to_string(MEMINFO) {
            Ok(meminfo) => parse_meminfo_hugepagesize(&meminfo).unwrap_or(0),
            Err(err) => {
                debug!("read {}: {}", MEMINFO, err);
                0
            }
        }
    }

    fn provision(&self, size: usize, flags: MapFlags) -> io::Result<Region> {
        Region::map(size, flags)
    }

    fn buffer_registrar(&self) -> Result<IoUring> {
        // registered buffers are pinned and accounted against RLIMIT_MEMLOCK
        if let Err(err) = raise_memlock_rlimit() {
            debug!("registration may fail for large regions: {:#}", err);
        }
        let ring = IoUring::setup(1).context("io_uring_setup")?;
        debug!("io_uring features {:#x}", ring.features());
        Ok(ring)
    }
}

fn page_size() -> Result<usize> {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        -1 => bail!("sysconf _SC_PAGESIZE failed"),
        x => Ok(x as usize),
    }
}

fn raise_memlock_rlimit() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!(
            "failed to lift RLIMIT_MEMLOCK (missing CAP_SYS_RESOURCE?): {}",
            io::Error::last_os_error()
        );
    }

    Ok(())
}

fn hugepages_minimum(dir: &Path) -> Result<Option<usize>> {
    let mut minimum: Option<usize> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(size) = parse_hugepages_dir_name(&name.to_string_lossy()) {
            minimum = Some(minimum.map_or(size, |current| current.min(size)));
        }
    }
    Ok(minimum)
}

#[derive(Debug, PartialEq, Eq)]
struct HugepagesPool {
    reserved: u64,
    free: u64,
}

// an empty pool makes mmap with MAP_HUGETLB fail even though the size is supported
fn hugepages_pool(dir: &Path, size: usize) -> Result<HugepagesPool> {
    let sizedir = dir.join(format!("hugepages-{}kB", size / 1024));
    let read = |name: &str| -> Result<u64> {
        let path = sizedir.join(name);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        raw.trim()
            .parse::<u64>()
            .with_context(|| format!("parse {} from {}", raw.trim(), path.display()))
    };
    Ok(HugepagesPool {
        reserved: read("nr_hugepages")?,
        free: read("free_hugepages")?,
    })
}

// example: hugepages-2048kB
fn parse_hugepages_dir_name(name: &str) -> Option<usize> {
    let kb = name.strip_prefix("hugepages-")?.strip_suffix("kB")?.parse::<usize>().ok()?;
    kb.checked_mul(1024).filter(|size| size.is_power_of_two())
}

// example line:
// Hugepagesize:       2048 kB
fn parse_meminfo_hugepagesize(meminfo: &str) -> Option<usize> {
    let line = meminfo.lines().find(|line| line.starts_with("Hugepagesize:"))?;
    let mut parts = line.split_whitespace().skip(1);
    let kb = parts.next()?.parse::<usize>().ok()?;
    if parts.next() != Some("kB") {
        return None;
    }
    kb.checked_mul(1024).filter(|size| size.is_power_of_two())
}
