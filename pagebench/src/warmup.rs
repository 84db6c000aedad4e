use std::{
    any::Any,
    fmt::{self, Display, Formatter},
    panic,
    thread::available_parallelism,
};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::region::{Pages, Span, TouchMode};

/// Upper bound on parallel warm-up workers.
pub(crate) const MAX_WORKERS: usize = 64;

// last bytes of the region are never touched. stride is at least a small page,
// so no page start falls into the margin.
pub(crate) const TAIL_MARGIN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    Serial,
    Parallel { workers: usize },
}

impl Strategy {
    /// Parallel strategy with one worker per logical processor, unless overridden.
    /// Worker count is clamped to 1..=MAX_WORKERS.
    pub(crate) fn parallel(workers: Option<usize>) -> Self {
        let workers = workers
            .or_else(|| available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1);
        Strategy::Parallel {
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Serial => write!(f, "serial"),
            Strategy::Parallel { workers } => write!(f, "parallel({})", workers),
        }
    }
}

/// Splits len bytes into exactly workers contiguous spans.
///
/// Whole strides are spread evenly, the first spans take one extra stride each until the
/// leftover strides run out. Every span starts at a multiple of stride, so that each page
/// start belongs to exactly one span. The last span also absorbs the sub-stride remainder.
pub(crate) fn partition(len: usize, workers: usize, stride: usize) -> Vec<Span> {
    let workers = workers.max(1);
    let strides = len / stride;
    let (base, extra) = (strides / workers, strides % workers);
    let mut spans = Vec::with_capacity(workers);
    let mut offset = 0;
    for i in 0..workers {
        let mut chunk = (base + usize::from(i < extra)) * stride;
        if i == workers - 1 {
            chunk = len - offset;
        }
        spans.push(Span::new(offset, chunk));
        offset += chunk;
    }
    spans
}

/// Touches every stride of the pages with the selected strategy.
///
/// Returns once every page was touched. Parallel workers are joined before returning;
/// panic in any of them is resumed on the calling thread.
#[instrument(skip(pages))]
pub(crate) fn warm_up(pages: &impl Pages, strategy: Strategy, stride: usize, mode: TouchMode) -> Result<()> {
    let limit = pages.len().saturating_sub(TAIL_MARGIN);
    match strategy {
        Strategy::Serial => {
            touch(pages, Span::new(0, pages.len()), stride, limit, mode);
            Ok(())
        }
        Strategy::Parallel { workers } => {
            let spans = partition(pages.len(), workers, stride);
            let rst = crossbeam::thread::scope(|scope| -> Result<()> {
                for (i, span) in spans.into_iter().enumerate() {
                    debug!("worker {} touches {:?}", i, span);
                    scope
                        .builder()
                        .name(format!("warm-up-{}", i))
                        .spawn(move |_| touch(pages, span, stride, limit, mode))
                        .with_context(|| format!("spawn warm-up worker {}", i))?;
                }
                Ok(())
            });
            match rst {
                Ok(spawned) => spawned,
                Err(payload) => panic::resume_unwind(first_panic(payload)),
            }
        }
    }
}

// crossbeam collects payloads of all panicked workers into a vec
fn first_panic(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
    match payload.downcast::<Vec<Box<dyn Any + Send>>>() {
        Ok(mut panics) if !panics.is_empty() => panics.swap_remove(0),
        Ok(panics) => panics as Box<dyn Any + Send>,
        Err(payload) => payload,
    }
}

fn touch(pages: &impl Pages, span: Span, stride: usize, limit: usize, mode: TouchMode) {
    for offset in span.strides(stride, limit) {
        pages.touch(offset, mode);
    }
}
