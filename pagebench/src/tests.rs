use std::{
    cell::Cell,
    io,
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering},
};

use anyhow::{bail, Result};
use clap::Parser;

use crate::{
    bench,
    config::{Opt, RunConfig, MB},
    error::{BenchError, ConfigError, EXIT_ALLOCATION, EXIT_CONFIG},
    layout::MapFlags,
    platform::Platform,
    region::{Pages, TouchMode},
    registrar::BufferRegistrar,
    report::Report,
};

const KB: usize = 1 << 10;

/// Instrumented memory that counts touches per stride instead of faulting anything in.
#[derive(Debug)]
pub(crate) struct CountingPages {
    len: usize,
    stride: usize,
    counters: Vec<AtomicU32>,
    panic_at: Option<usize>,
}

impl CountingPages {
    pub(crate) fn new(len: usize, stride: usize) -> Self {
        CountingPages {
            len,
            stride,
            counters: (0..len.div_ceil(stride)).map(|_| AtomicU32::new(0)).collect(),
            panic_at: None,
        }
    }

    pub(crate) fn panic_at(mut self, offset: usize) -> Self {
        self.panic_at = Some(offset);
        self
    }

    pub(crate) fn distinct(&self) -> usize {
        self.counters.iter().filter(|c| c.load(Ordering::Relaxed) > 0).count()
    }

    pub(crate) fn assert_touched_once(&self) {
        for (page, counter) in self.counters.iter().enumerate() {
            assert_eq!(counter.load(Ordering::Relaxed), 1, "page {} touched unexpected number of times", page);
        }
    }
}

impl Pages for CountingPages {
    fn len(&self) -> usize {
        self.len
    }

    fn touch(&self, offset: usize, _mode: TouchMode) {
        if self.panic_at == Some(offset) {
            panic!("injected fault at {}", offset);
        }
        assert!(offset < self.len, "touch at {} is outside of {}", offset, self.len);
        assert_eq!(offset % self.stride, 0, "touch at {} is not aligned to stride", offset);
        self.counters[offset / self.stride].fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Registered {
    registered: Cell<usize>,
    deregistered: Cell<usize>,
}

#[derive(Debug)]
struct FakeRegistrar {
    calls: Rc<Registered>,
}

impl BufferRegistrar for FakeRegistrar {
    type Region = CountingPages;

    fn register(&mut self, region: &CountingPages) -> Result<()> {
        self.calls.registered.set(region.len());
        Ok(())
    }

    fn deregister(&mut self) -> Result<()> {
        self.calls.deregistered.set(self.calls.deregistered.get() + 1);
        Ok(())
    }
}

#[derive(Debug)]
struct FakePlatform {
    small: usize,
    privilege: bool,
    large_minimum: usize,
    registration: bool,
    provision_limit: usize,
    provisioned: Cell<Option<(usize, MapFlags)>>,
    calls: Rc<Registered>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        FakePlatform {
            small: 4 * KB,
            privilege: true,
            large_minimum: 2 * MB as usize,
            registration: true,
            provision_limit: usize::MAX,
            provisioned: Cell::new(None),
            calls: Rc::default(),
        }
    }
}

impl Platform for FakePlatform {
    type Region = CountingPages;
    type Registrar = FakeRegistrar;

    fn small_page_size(&self) -> usize {
        self.small
    }

    fn escalate_privilege(&self) -> Result<()> {
        if !self.privilege {
            bail!("denied");
        }
        Ok(())
    }

    fn large_page_minimum(&self) -> usize {
        self.large_minimum
    }

    fn provision(&self, size: usize, flags: MapFlags) -> io::Result<CountingPages> {
        if size > self.provision_limit {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.provisioned.set(Some((size, flags)));
        Ok(CountingPages::new(size, self.small))
    }

    fn buffer_registrar(&self) -> Result<FakeRegistrar> {
        if !self.registration {
            bail!("io_uring_setup: Operation not permitted");
        }
        Ok(FakeRegistrar {
            calls: self.calls.clone(),
        })
    }
}

fn config(args: &[&str]) -> (RunConfig, Vec<ConfigError>) {
    let opt = Opt::try_parse_from(std::iter::once("pagebench").chain(args.iter().copied())).unwrap();
    RunConfig::scan(&opt)
}

fn run(args: &[&str], platform: &FakePlatform) -> (Result<Report, BenchError>, Vec<ConfigError>) {
    let (cfg, errors) = config(args);
    (bench::run(&cfg, platform), errors)
}

fn assert_timing(report: &Report) {
    let parts = report.timing.allocation_ms() + report.timing.warm_up_ms();
    assert!(report.timing.total_ms() >= parts);
    assert!(report.timing.total_ms() <= parts + 1);
}

#[test]
fn test_small_pages() {
    let platform = FakePlatform::default();
    let (report, errors) = run(&["512"], &platform);
    let report = report.unwrap();
    assert!(errors.is_empty());
    assert!(report.to_string().starts_with("512mb via 4k pages: "), "{}", report);
    assert_timing(&report);
    assert_eq!(platform.provisioned.get(), Some((512 << 20, MapFlags::STANDARD)));
}

#[test]
fn test_large_pages_granted() {
    let platform = FakePlatform::default();
    let (report, errors) = run(&["--large", "256"], &platform);
    let report = report.unwrap();
    assert!(errors.is_empty());
    assert!(report.to_string().starts_with("256mb via 2048k pages: "), "{}", report);
    let (size, flags) = platform.provisioned.get().unwrap();
    assert_eq!(size, 256 << 20);
    assert!(flags.is_huge());
}

#[test]
fn test_large_pages_round_up() {
    let platform = FakePlatform {
        large_minimum: 1 << 30,
        ..Default::default()
    };
    let (report, _) = run(&["--large", "1"], &platform);
    assert_eq!(report.unwrap().size, 1 << 30);
}

#[test]
fn test_large_pages_denied() {
    let platform = FakePlatform {
        privilege: false,
        ..Default::default()
    };
    let (report, errors) = run(&["--large", "64"], &platform);
    assert!(errors.is_empty());
    assert!(report.unwrap().to_string().starts_with("64mb via 4k pages: "));
    assert_eq!(platform.provisioned.get(), Some((64 << 20, MapFlags::STANDARD)));
}

#[test]
fn test_large_pages_unavailable() {
    let platform = FakePlatform {
        large_minimum: 0,
        ..Default::default()
    };
    let (report, _) = run(&["--large", "64"], &platform);
    assert!(report.unwrap().to_string().starts_with("64mb via 4k pages: "));
}

#[test]
fn test_unrecognized_argument_uses_default_size() {
    let platform = FakePlatform::default();
    let (report, errors) = run(&["abc"], &platform);
    assert_eq!(errors.len(), 1);
    assert!(report.unwrap().to_string().starts_with("1024mb via 4k pages: "));
    assert_eq!(crate::config_status(&errors), EXIT_CONFIG);
}

#[test]
fn test_allocation_failure() {
    let platform = FakePlatform {
        provision_limit: 1 << 30,
        ..Default::default()
    };
    let (report, errors) = run(&["4096"], &platform);
    assert!(errors.is_empty());
    let err = report.unwrap_err();
    assert!(matches!(err, BenchError::Allocation { size, .. } if size == 4 << 30));
    assert_eq!(err.exit_code(), EXIT_ALLOCATION);
    assert!(err.to_string().starts_with("allocation failed"));
}

#[test]
fn test_rounding_overflow_is_config_error() {
    let platform = FakePlatform::default();
    // 2^64 - 1MB can't be rounded up to 2MB pages
    let (report, errors) = run(&["--large", "17592186044415"], &platform);
    assert!(errors.is_empty());
    let err = report.unwrap_err();
    assert!(matches!(err, BenchError::Config(ConfigError::RoundingOverflow { .. })));
    assert_eq!(err.exit_code(), EXIT_CONFIG);
    assert!(platform.provisioned.get().is_none());
}

#[test]
fn test_buffer_registration() {
    let platform = FakePlatform::default();
    let (report, _) = run(&["--rio", "32"], &platform);
    report.unwrap();
    assert_eq!(platform.calls.registered.get(), 32 << 20);
    assert_eq!(platform.calls.deregistered.get(), 1);
}

#[test]
fn test_buffer_registration_unavailable() {
    let platform = FakePlatform {
        registration: false,
        ..Default::default()
    };
    let (report, _) = run(&["--rio", "32"], &platform);
    assert!(report.unwrap().to_string().starts_with("32mb via 4k pages: "));
    assert_eq!(platform.calls.registered.get(), 0);
}

#[test]
fn test_parallel_read_touch() {
    let platform = FakePlatform::default();
    let (report, _) = run(&["--threads", "--workers", "5", "--touch", "read", "64"], &platform);
    let report = report.unwrap();
    assert!(report.to_string().ends_with("ms reading)"), "{}", report);
    assert_timing(&report);
}

#[test]
fn test_zero_size() {
    let platform = FakePlatform::default();
    let (report, _) = run(&["--threads", "0"], &platform);
    assert!(report.unwrap().to_string().starts_with("0mb via 4k pages: "));
}
