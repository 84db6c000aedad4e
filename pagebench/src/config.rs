use clap::Parser;

use crate::{error::ConfigError, region::TouchMode};

pub(crate) const MB: u64 = 1 << 20;
pub(crate) const DEFAULT_SIZE_MB: u64 = 1024;

const LARGE: &str = "--large";
const RIO: &str = "--rio";
const THREADS: &str = "--threads";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about,
    after_help = "Prints one line on stdout:\n  \
                  <N>mb via <K>k pages: <total>ms (<alloc>ms mmap, <warm>ms writing|reading)\n\
                  The allocation phase is labelled mmap, the call that provisions the memory."
)]
pub(crate) struct Opt {
    #[clap(long, help = "try to provision memory with the smallest large page size of the host")]
    large: bool,

    #[clap(
        long,
        help = "register and release the memory with io_uring fixed buffers as part of the allocation phase"
    )]
    rio: bool,

    #[clap(long, help = "touch memory from one thread per logical processor")]
    threads: bool,

    #[clap(
        long,
        help = "override the number of threads used with --threads. clamped to 1..=64"
    )]
    workers: Option<usize>,

    #[clap(
        long,
        default_value = "write",
        help = "how every page is touched. write commits physical memory, read maps zero page for anonymous memory"
    )]
    touch: TouchMode,

    #[clap(
        allow_hyphen_values = true,
        help = "total size in MB, default 1024. the last numeric argument wins, anything else is reported as unrecognized"
    )]
    args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunConfig {
    pub(crate) total_requested_bytes: u64,
    pub(crate) use_large_pages: bool,
    pub(crate) use_buffer_registration: bool,
    pub(crate) use_parallel_warm_up: bool,
    pub(crate) touch: TouchMode,
    pub(crate) workers: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            total_requested_bytes: DEFAULT_SIZE_MB * MB,
            use_large_pages: false,
            use_buffer_registration: false,
            use_parallel_warm_up: false,
            touch: TouchMode::default(),
            workers: None,
        }
    }
}

impl RunConfig {
    /// Builds configuration from the parsed command line.
    ///
    /// Free arguments are scanned in order. Errors don't stop the scan, they are collected
    /// and the configuration is built from everything that was recognized.
    pub(crate) fn scan(opt: &Opt) -> (RunConfig, Vec<ConfigError>) {
        let mut cfg = RunConfig {
            use_large_pages: opt.large,
            use_buffer_registration: opt.rio,
            use_parallel_warm_up: opt.threads,
            touch: opt.touch,
            workers: opt.workers,
            ..Default::default()
        };
        let mut errors = vec![];
        for arg in opt.args.iter() {
            // flags that follow a free argument are collected together with it
            match arg.as_str() {
                LARGE => cfg.use_large_pages = true,
                RIO => cfg.use_buffer_registration = true,
                THREADS => cfg.use_parallel_warm_up = true,
                arg if is_number(arg) => match parse_megabytes(arg) {
                    Some(bytes) => cfg.total_requested_bytes = bytes,
                    None => errors.push(ConfigError::SizeOverflow(arg.to_string())),
                },
                arg => errors.push(ConfigError::Unrecognized(arg.to_string())),
            }
        }
        (cfg, errors)
    }
}

fn is_number(arg: &str) -> bool {
    !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit())
}

fn parse_megabytes(arg: &str) -> Option<u64> {
    arg.parse::<u64>().ok()?.checked_mul(MB)
}
