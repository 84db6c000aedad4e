use std::io;

// exit statuses are part of the command line contract, they are negative so the
// process reports 255 and 254 respectively
pub(crate) const EXIT_CONFIG: i32 = -1;
pub(crate) const EXIT_ALLOCATION: i32 = -2;
pub(crate) const EXIT_FATAL: i32 = 1;

#[derive(thiserror::Error, Debug)]
pub(crate) enum ConfigError {
    #[error("unrecognized argument \"{0}\"")]
    Unrecognized(String),
    #[error("size of {0}mb does not fit into 64 bits")]
    SizeOverflow(String),
    #[error("{requested} bytes can't be rounded up to a multiple of {page_size} byte pages")]
    RoundingOverflow { requested: u64, page_size: usize },
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("allocation failed. requested {size} bytes: {source}")]
    Allocation { size: usize, source: io::Error },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl BenchError {
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) => EXIT_CONFIG,
            BenchError::Allocation { .. } => EXIT_ALLOCATION,
            BenchError::Fatal(_) => EXIT_FATAL,
        }
    }
}
