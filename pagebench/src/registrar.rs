use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use anyhow::{Context, Result};
use libc::{c_void, iovec};
use tracing::debug;

use crate::region::{Pages, Region};

// kernel refuses fixed buffers larger than 1GB
const MAX_BUFFER_LEN: usize = 1 << 30;

// values from include/uapi/linux/io_uring.h
const IORING_REGISTER_BUFFERS: u32 = 0;
const IORING_UNREGISTER_BUFFERS: u32 = 1;

/// Registers memory with a kernel-bypass I/O subsystem, and releases it right away.
///
/// Used to capture the cost of pinning and mapping the region as part of provisioning.
pub(crate) trait BufferRegistrar {
    type Region;

    fn register(&mut self, region: &Self::Region) -> Result<()>;
    fn deregister(&mut self) -> Result<()>;
}

// io_uring_params. the kernel fills everything after the first two words,
// sq_off and cq_off are kept opaque since rings are never mapped.
#[repr(C)]
#[derive(Debug, Default)]
#[allow(dead_code)]
struct IoUringParams {
    sq_entries: u32,
    cq_entries: u32,
    flags: u32,
    sq_thread_cpu: u32,
    sq_thread_idle: u32,
    features: u32,
    wq_fd: u32,
    resv: [u32; 3],
    sq_off: [u64; 5],
    cq_off: [u64; 5],
}

/// io_uring instance that is only used to register fixed buffers.
#[derive(Debug)]
pub(crate) struct IoUring {
    fd: OwnedFd,
    features: u32,
    registered: bool,
}

impl IoUring {
    pub(crate) fn setup(entries: u32) -> io::Result<Self> {
        let mut params = IoUringParams::default();
        let rst = unsafe { libc::syscall(libc::SYS_io_uring_setup, entries, &mut params as *mut IoUringParams) };
        match rst {
            rst @ 0.. => Ok(IoUring {
                fd: unsafe { OwnedFd::from_raw_fd(rst as i32) },
                features: params.features,
                registered: false,
            }),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(crate) fn features(&self) -> u32 {
        self.features
    }

    fn register_raw(&self, opcode: u32, arg: *const c_void, nr_args: u32) -> io::Result<()> {
        let rst = unsafe { libc::syscall(libc::SYS_io_uring_register, self.fd.as_raw_fd(), opcode, arg, nr_args) };
        match rst {
            0.. => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

fn iovecs(base: *mut u8, len: usize) -> Vec<iovec> {
    (0..len)
        .step_by(MAX_BUFFER_LEN)
        .map(|offset| iovec {
            iov_base: base.wrapping_add(offset) as *mut c_void,
            iov_len: MAX_BUFFER_LEN.min(len - offset),
        })
        .collect()
}

impl BufferRegistrar for IoUring {
    type Region = Region;

    fn register(&mut self, region: &Region) -> Result<()> {
        if region.is_empty() {
            debug!("region is empty. nothing to register");
            return Ok(());
        }
        let buffers = iovecs(region.as_ptr(), region.len());
        self.register_raw(
            IORING_REGISTER_BUFFERS,
            buffers.as_ptr() as *const c_void,
            buffers.len() as u32,
        )
        .with_context(|| format!("register {} buffers of {} bytes total", buffers.len(), region.len()))?;
        self.registered = true;
        Ok(())
    }

    fn deregister(&mut self) -> Result<()> {
        if !self.registered {
            return Ok(());
        }
        self.register_raw(IORING_UNREGISTER_BUFFERS, std::ptr::null(), 0)
            .context("unregister buffers")?;
        self.registered = false;
        Ok(())
    }
}
